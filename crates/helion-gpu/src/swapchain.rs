//! Swapchain and per-image frame resources.
//!
//! Each swapchain image owns a [`FrameSlot`]: one command buffer, the
//! acquire/present semaphores, the frame fence, and a depth attachment.
//! Recreation builds the replacement chain completely before the old one is
//! torn down so in-flight command buffers never reference freed resources.

use crate::command::CommandPool;
use crate::error::{GpuError, Result};
use crate::memory::{GpuAllocator, GpuImage};
use crate::sync::{FramePhase, SlotSync};
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Upper bound on buffered frames regardless of what the surface allows.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 3;

/// Per-swapchain-image resources.
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub sync: SlotSync,
    pub depth_image: GpuImage,
    pub depth_view: vk::ImageView,
    pub phase: FramePhase,
}

/// Everything the bootstrap layer decided about the presentable surface.
#[derive(Clone, Copy)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub depth_format: vk::Format,
    /// Desired buffering count; clamped to surface limits and
    /// [`MAX_FRAMES_IN_FLIGHT`].
    pub buffered_frames: u32,
}

/// Swapchain together with its per-image frame slots.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub frame_slots: Vec<FrameSlot>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Clamp the requested buffering count to what the surface supports.
pub fn clamp_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
    let mut count = desired
        .max(capabilities.min_image_count)
        .min(MAX_FRAMES_IN_FLIGHT.max(capabilities.min_image_count));
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    count
}

impl Swapchain {
    /// Create a swapchain and one fully populated frame slot per image.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        desc: &SwapchainDesc,
        graphics_queue_family: u32,
        command_pool: &CommandPool,
        allocator: &mut GpuAllocator,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let image_count = clamp_image_count(&desc.capabilities, desc.buffered_frames);

        let queue_families = [graphics_queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(desc.surface)
            .min_image_count(image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(desc.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = swapchain_loader.get_swapchain_images(swapchain)?;

        let image_views: Vec<_> = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(desc.format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                device.create_image_view(&view_info, None)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let frame_slots = match build_frame_slots(
            device,
            images.len(),
            desc,
            command_pool,
            allocator,
        ) {
            Ok(slots) => slots,
            Err(e) => {
                for &view in &image_views {
                    device.destroy_image_view(view, None);
                }
                swapchain_loader.destroy_swapchain(swapchain, None);
                return Err(e);
            }
        };

        tracing::info!(
            width = desc.extent.width,
            height = desc.extent.height,
            images = images.len(),
            "swapchain created"
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            frame_slots,
            format: desc.format.format,
            extent: desc.extent,
        })
    }

    /// Acquire the next image.
    ///
    /// Out-of-date surfaces and acquire timeouts surface as
    /// [`GpuError::SwapchainOutOfDate`], a recoverable rebuild signal.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        let result = swapchain_loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            Err(
                vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::TIMEOUT | vk::Result::NOT_READY,
            ) => Err(GpuError::SwapchainOutOfDate),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image. Returns `true` when the swapchain needs a rebuild.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = swapchain_loader.queue_present(queue, &present_info);

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Rebuild the swapchain in place without a resource gap.
    ///
    /// The replacement chain and every frame slot are built first (the old
    /// handle is passed as `old_swapchain`); only then is the old chain torn
    /// down. On failure the old chain is left untouched.
    ///
    /// # Safety
    /// All handles must be valid and no frame slot may be in flight.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn recreate(
        &mut self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        desc: &SwapchainDesc,
        graphics_queue_family: u32,
        command_pool: &CommandPool,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        let new = Self::new(
            device,
            swapchain_loader,
            desc,
            graphics_queue_family,
            command_pool,
            allocator,
            Some(self.swapchain),
        )?;

        let mut old = std::mem::replace(self, new);
        old.destroy(device, swapchain_loader, command_pool, allocator)?;

        tracing::info!(
            width = desc.extent.width,
            height = desc.extent.height,
            "swapchain recreated"
        );

        Ok(())
    }

    /// Destroy the swapchain and every frame slot.
    ///
    /// Teardown order: sync objects, then command buffers back to the shared
    /// pool, then depth views/images, then the swapchain handle.
    ///
    /// # Safety
    /// All handles must be valid and nothing may be in use.
    pub unsafe fn destroy(
        &mut self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        command_pool: &CommandPool,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        for slot in &self.frame_slots {
            slot.sync.destroy(device);
        }

        let command_buffers: Vec<vk::CommandBuffer> = self
            .frame_slots
            .iter()
            .map(|slot| slot.command_buffer)
            .collect();
        if !command_buffers.is_empty() {
            command_pool.free_command_buffers(device, &command_buffers);
        }

        for slot in &mut self.frame_slots {
            device.destroy_image_view(slot.depth_view, None);
            allocator.free_image(&mut slot.depth_image)?;
        }
        self.frame_slots.clear();

        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);

        Ok(())
    }
}

/// Build one frame slot per swapchain image, unwinding on failure.
///
/// # Safety
/// All handles must be valid.
unsafe fn build_frame_slots(
    device: &ash::Device,
    count: usize,
    desc: &SwapchainDesc,
    command_pool: &CommandPool,
    allocator: &mut GpuAllocator,
) -> Result<Vec<FrameSlot>> {
    let mut slots: Vec<FrameSlot> = Vec::with_capacity(count);

    for index in 0..count {
        match build_frame_slot(device, index, desc, command_pool, allocator) {
            Ok(slot) => slots.push(slot),
            Err(e) => {
                for slot in &mut slots {
                    slot.sync.destroy(device);
                    command_pool.free_command_buffers(device, &[slot.command_buffer]);
                    device.destroy_image_view(slot.depth_view, None);
                    let _ = allocator.free_image(&mut slot.depth_image);
                }
                return Err(e);
            }
        }
    }

    Ok(slots)
}

/// Build the resources for a single frame slot.
///
/// # Safety
/// All handles must be valid.
unsafe fn build_frame_slot(
    device: &ash::Device,
    index: usize,
    desc: &SwapchainDesc,
    command_pool: &CommandPool,
    allocator: &mut GpuAllocator,
) -> Result<FrameSlot> {
    let command_buffer =
        command_pool.allocate_command_buffer(device, vk::CommandBufferLevel::PRIMARY)?;
    let sync = SlotSync::new(device)?;

    let depth_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(desc.depth_format)
        .extent(vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let depth_image = allocator.create_image(
        &depth_info,
        MemoryLocation::GpuOnly,
        &format!("frame depth {index}"),
    )?;

    let view_info = vk::ImageViewCreateInfo::default()
        .image(depth_image.image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(desc.depth_format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::DEPTH)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );
    let depth_view = device.create_image_view(&view_info, None)?;

    Ok(FrameSlot {
        command_buffer,
        sync,
        depth_image,
        depth_view,
        phase: FramePhase::Idle,
    })
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    // Prefer SRGB
    for format in available {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return *format;
        }
    }

    available[0]
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        vk::PresentModeKHR::FIFO
    } else {
        for &mode in available {
            if mode == vk::PresentModeKHR::MAILBOX {
                return mode;
            }
        }
        for &mode in available {
            if mode == vk::PresentModeKHR::IMMEDIATE {
                return mode;
            }
        }
        // FIFO is always supported
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn image_count_respects_surface_and_global_limits() {
        assert_eq!(clamp_image_count(&caps(2, 8), 3), 3);
        // Desired below the surface minimum gets raised.
        assert_eq!(clamp_image_count(&caps(2, 8), 1), 2);
        // Desired above the global cap gets lowered.
        assert_eq!(clamp_image_count(&caps(2, 8), 6), 3);
        // A surface maximum of 0 means unbounded.
        assert_eq!(clamp_image_count(&caps(2, 0), 3), 3);
        // Surface maximum below the request wins.
        assert_eq!(clamp_image_count(&caps(1, 2), 3), 2);
    }

    #[test]
    fn extent_is_clamped_when_surface_leaves_it_open() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };

        let extent = calculate_extent(&capabilities, 16, 8192);
        assert_eq!(extent.width, 64);
        assert_eq!(extent.height, 4096);
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };

        let extent = calculate_extent(&capabilities, 1920, 1080);
        assert_eq!(extent.width, 1280);
        assert_eq!(extent.height, 720);
    }

    #[test]
    fn present_mode_selection_prefers_mailbox_without_vsync() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            select_present_mode(&available, false),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&available, true),
            vk::PresentModeKHR::FIFO
        );
    }
}
