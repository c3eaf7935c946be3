//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Shader reflection failed (malformed or unsupported SPIR-V).
    #[error("Shader reflection failed: {0}")]
    Reflection(String),

    /// A shader declared a descriptor set outside the supported slot range.
    #[error("descriptor set {set} is out of range (the layout model supports sets 0..{max})")]
    SetIndexOutOfRange { set: u32, max: u32 },

    /// Two stages declared the same (set, binding) with different descriptor kinds.
    #[error(
        "descriptor kind conflict at set {set}, binding {binding}: {first:?} vs {second:?}"
    )]
    BindingConflict {
        set: u32,
        binding: u32,
        first: vk::DescriptorType,
        second: vk::DescriptorType,
    },

    /// Descriptor pool allocation failed even after rolling to a fresh pool.
    #[error("descriptor pool exhausted: {0}")]
    DescriptorPoolExhausted(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// The swapchain is stale and must be rebuilt before the next frame.
    #[error("swapchain is out of date and must be rebuilt")]
    SwapchainOutOfDate,

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error while writing a diagnostic artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error while writing a diagnostic artifact.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
