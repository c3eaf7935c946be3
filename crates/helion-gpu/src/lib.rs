//! Vulkan resource synthesis core for the Helion engine.
//!
//! This crate provides:
//! - Per-stage shader reflection merged into a 4-slot descriptor-set model
//! - Pipeline layout construction from the merged model
//! - Pooled descriptor set allocation with transparent pool rollover
//! - Per-frame synchronization and swapchain lifecycle management
//!
//! Device and instance bootstrap, window-system integration, and render-pass
//! topology live outside this crate; the core consumes those handles through
//! [`DeviceContext`] and [`SwapchainDesc`].

pub mod command;
pub mod descriptors;
pub mod device;
pub mod diagnostics;
pub mod draw_queue;
pub mod error;
pub mod frame;
pub mod layout;
pub mod memory;
pub mod reflect;
pub mod swapchain;
pub mod sync;

pub use command::{CommandPool, CommandPools};
pub use descriptors::{write_combined_image_sampler, write_uniform_buffer, DescriptorAllocator};
pub use device::{DeviceContext, QueueRecord, QueueType};
pub use diagnostics::{write_report, MemoryReport};
pub use draw_queue::DrawQueue;
pub use error::{GpuError, Result};
pub use frame::{ActiveFrame, FrameOutcome, FrameScheduler};
pub use layout::PipelineLayout;
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use reflect::{
    reflect_and_merge, BindingDescriptor, DescriptorSetSlot, MergedLayout, ShaderStage,
    StageBindings,
};
pub use swapchain::{FrameSlot, Swapchain, SwapchainDesc, MAX_FRAMES_IN_FLIGHT};
pub use sync::{create_fence, create_semaphore, FramePhase, SlotSync};
