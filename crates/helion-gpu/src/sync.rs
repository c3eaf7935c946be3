//! Synchronization primitives and the frame-slot state machine.

use crate::error::{GpuError, Result};
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Lifecycle of one frame slot between fence waits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquired,
    Submitted,
    Presented,
}

impl FramePhase {
    /// Validate a transition, returning the new phase.
    ///
    /// Legal cycle: Idle -> Acquired -> Submitted -> Presented -> Acquired.
    /// Presented -> Acquired is the implicit return to the top of the cycle.
    pub fn advance_to(self, next: FramePhase) -> Result<FramePhase> {
        use FramePhase::{Acquired, Idle, Presented, Submitted};

        let legal = matches!(
            (self, next),
            (Idle | Presented, Acquired) | (Acquired, Submitted) | (Submitted, Presented)
        );

        if legal {
            Ok(next)
        } else {
            Err(GpuError::InvalidState(format!(
                "invalid frame transition {self:?} -> {next:?}"
            )))
        }
    }
}

/// Synchronization objects owned by one frame slot.
pub struct SlotSync {
    /// Signaled when the swapchain image is available.
    pub image_acquired: vk::Semaphore,
    /// Signaled when rendering to the image is complete.
    pub render_complete: vk::Semaphore,
    /// Signaled when the whole frame has finished on the GPU.
    pub frame_complete: vk::Fence,
}

impl SlotSync {
    /// Create the sync objects for one slot. The fence starts signaled so
    /// the first wait on a fresh slot returns immediately.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        Ok(Self {
            image_acquired: create_semaphore(device)?,
            render_complete: create_semaphore(device)?,
            frame_complete: create_fence(device, true)?,
        })
    }

    /// Destroy the sync objects.
    ///
    /// # Safety
    /// The device must be valid and the objects must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_acquired, None);
        device.destroy_semaphore(self.render_complete, None);
        device.destroy_fence(self.frame_complete, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_cycle_advances() {
        let phase = FramePhase::Idle;
        let phase = phase.advance_to(FramePhase::Acquired).unwrap();
        let phase = phase.advance_to(FramePhase::Submitted).unwrap();
        let phase = phase.advance_to(FramePhase::Presented).unwrap();
        // Next cycle starts directly with another acquire.
        let phase = phase.advance_to(FramePhase::Acquired).unwrap();
        assert_eq!(phase, FramePhase::Acquired);
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        assert!(FramePhase::Idle.advance_to(FramePhase::Submitted).is_err());
        assert!(FramePhase::Acquired.advance_to(FramePhase::Presented).is_err());
        assert!(FramePhase::Submitted.advance_to(FramePhase::Acquired).is_err());
    }

    #[test]
    fn double_transitions_are_rejected() {
        assert!(FramePhase::Acquired.advance_to(FramePhase::Acquired).is_err());
        assert!(FramePhase::Submitted.advance_to(FramePhase::Submitted).is_err());
    }
}
