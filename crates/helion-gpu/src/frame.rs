//! Per-frame acquire/submit/present orchestration.
//!
//! A single submitting thread drives the loop; the GPU runs asynchronously.
//! The only blocking points are the per-slot fence wait before a slot is
//! reused and the image acquire itself. With one slot per swapchain image,
//! the fence wait bounds the number of frames in flight to the image count.

use crate::command::{
    begin_command_buffer, end_command_buffer, submit_command_buffers, CommandPool,
};
use crate::device::{DeviceContext, QueueType};
use crate::error::{GpuError, Result};
use crate::memory::GpuAllocator;
use crate::swapchain::{Swapchain, SwapchainDesc};
use crate::sync::{reset_fence, wait_for_fence, FramePhase};
use ash::vk;

/// How long an acquire may block before it is treated as a rebuild signal.
const ACQUIRE_TIMEOUT_NS: u64 = 1_000_000_000;

/// A frame between `acquire_and_begin` and `submit_and_present`.
///
/// The command buffer is in the recording state and ready for draw commands.
pub struct ActiveFrame {
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
}

/// Result of presenting a frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was presented; the loop can continue.
    Rendered,
    /// Presentation reported a stale surface; call [`FrameScheduler::rebuild`].
    RebuildNeeded,
}

/// Drives the acquire -> record -> submit -> present cycle over the
/// swapchain's frame slots.
pub struct FrameScheduler {
    swapchain: Swapchain,
    current: usize,
    frame_count: u64,
}

impl FrameScheduler {
    /// Create the scheduler and its swapchain.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn new(
        ctx: &DeviceContext,
        swapchain_loader: &ash::khr::swapchain::Device,
        desc: &SwapchainDesc,
        command_pool: &CommandPool,
        allocator: &mut GpuAllocator,
    ) -> Result<Self> {
        let swapchain = Swapchain::new(
            ctx.device(),
            swapchain_loader,
            desc,
            ctx.queue_family(QueueType::Graphics),
            command_pool,
            allocator,
            None,
        )?;

        Ok(Self {
            swapchain,
            current: 0,
            frame_count: 0,
        })
    }

    /// The swapchain the scheduler is cycling over.
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Number of frames that can be in flight simultaneously.
    pub fn frames_in_flight(&self) -> usize {
        self.swapchain.frame_slots.len()
    }

    /// Total frames presented since creation.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Wait for the current slot, acquire an image, and begin recording.
    ///
    /// Returns `Ok(None)` when the swapchain is stale or the acquire timed
    /// out; the caller must [`rebuild`](Self::rebuild) and retry. The fence
    /// wait here is what guarantees a slot's command buffer is never
    /// re-recorded while its previous submission is still executing.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire_and_begin(
        &mut self,
        ctx: &DeviceContext,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) -> Result<Option<ActiveFrame>> {
        let device = ctx.device();
        let slot_index = self.current;

        let (image_acquired, frame_complete, command_buffer) = {
            let slot = &self.swapchain.frame_slots[slot_index];
            (
                slot.sync.image_acquired,
                slot.sync.frame_complete,
                slot.command_buffer,
            )
        };

        // Backpressure: the slot's previous frame must be done before reuse.
        wait_for_fence(device, frame_complete, u64::MAX)?;

        let acquired =
            self.swapchain
                .acquire_next_image(swapchain_loader, image_acquired, ACQUIRE_TIMEOUT_NS);
        let (image_index, suboptimal) = match acquired {
            Ok(pair) => pair,
            Err(GpuError::SwapchainOutOfDate) => return Ok(None),
            Err(e) => return Err(e),
        };

        if suboptimal {
            tracing::debug!("swapchain suboptimal on acquire");
        }

        {
            let slot = &mut self.swapchain.frame_slots[slot_index];
            slot.phase = slot.phase.advance_to(FramePhase::Acquired)?;
        }

        // Only reset once an image is actually acquired; a rebuild path must
        // find the fence still signaled.
        reset_fence(device, frame_complete)?;

        device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
        begin_command_buffer(
            device,
            command_buffer,
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        )?;

        Ok(Some(ActiveFrame {
            image_index,
            command_buffer,
        }))
    }

    /// End recording, submit, and present the frame.
    ///
    /// Submission waits on the image-acquired semaphore at the
    /// color-attachment-output stage, signals the render-complete semaphore
    /// and the frame fence; presentation waits on render-complete.
    ///
    /// # Safety
    /// All handles must be valid and `frame` must come from the matching
    /// [`acquire_and_begin`](Self::acquire_and_begin) call.
    pub unsafe fn submit_and_present(
        &mut self,
        ctx: &DeviceContext,
        swapchain_loader: &ash::khr::swapchain::Device,
        frame: ActiveFrame,
    ) -> Result<FrameOutcome> {
        let device = ctx.device();
        let graphics = ctx.queue(QueueType::Graphics);
        let slot_index = self.current;

        let (image_acquired, render_complete, frame_complete) = {
            let slot = &self.swapchain.frame_slots[slot_index];
            (
                slot.sync.image_acquired,
                slot.sync.render_complete,
                slot.sync.frame_complete,
            )
        };

        end_command_buffer(device, frame.command_buffer)?;

        {
            let slot = &mut self.swapchain.frame_slots[slot_index];
            slot.phase = slot.phase.advance_to(FramePhase::Submitted)?;
        }

        submit_command_buffers(
            device,
            graphics.queue,
            &[frame.command_buffer],
            &[image_acquired],
            &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            &[render_complete],
            frame_complete,
        )?;

        let needs_rebuild = self.swapchain.present(
            swapchain_loader,
            graphics.queue,
            frame.image_index,
            &[render_complete],
        )?;

        {
            let slot = &mut self.swapchain.frame_slots[slot_index];
            slot.phase = slot.phase.advance_to(FramePhase::Presented)?;
        }

        self.current = (self.current + 1) % self.swapchain.frame_slots.len();
        self.frame_count += 1;

        Ok(if needs_rebuild {
            FrameOutcome::RebuildNeeded
        } else {
            FrameOutcome::Rendered
        })
    }

    /// Rebuild the swapchain and every frame slot after a resize or an
    /// out-of-date signal.
    ///
    /// Blocks until every in-flight frame completes, then swaps in a fully
    /// constructed replacement before the old chain is destroyed. All slots
    /// restart the cycle at [`FramePhase::Idle`].
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn rebuild(
        &mut self,
        ctx: &DeviceContext,
        swapchain_loader: &ash::khr::swapchain::Device,
        desc: &SwapchainDesc,
        command_pool: &CommandPool,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        let device = ctx.device();

        for slot in &self.swapchain.frame_slots {
            wait_for_fence(device, slot.sync.frame_complete, u64::MAX)?;
        }

        self.swapchain.recreate(
            device,
            swapchain_loader,
            desc,
            ctx.queue_family(QueueType::Graphics),
            command_pool,
            allocator,
        )?;
        self.current = 0;

        Ok(())
    }

    /// Destroy the scheduler's swapchain and frame slots.
    ///
    /// # Safety
    /// All handles must be valid and no frame may be in flight.
    pub unsafe fn destroy(
        &mut self,
        ctx: &DeviceContext,
        swapchain_loader: &ash::khr::swapchain::Device,
        command_pool: &CommandPool,
        allocator: &mut GpuAllocator,
    ) -> Result<()> {
        self.swapchain
            .destroy(ctx.device(), swapchain_loader, command_pool, allocator)
    }
}
