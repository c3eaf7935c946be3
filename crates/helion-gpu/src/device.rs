//! Device-boundary types.
//!
//! The core never creates the instance, device, or queues; the bootstrap
//! layer hands them in through [`DeviceContext`]. Queues are looked up by
//! [`QueueType`] rather than positional index, with the usual fallback chain
//! for devices without dedicated compute or transfer families.

use crate::error::{GpuError, Result};
use ash::vk;
use hashbrown::HashMap;
use std::sync::Arc;

/// Logical role of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// A queue handle together with the family it was created from.
#[derive(Clone, Copy, Debug)]
pub struct QueueRecord {
    pub queue: vk::Queue,
    pub family_index: u32,
}

/// Handles owned by the bootstrap layer, consumed by the core.
pub struct DeviceContext {
    device: Arc<ash::Device>,
    physical_device: vk::PhysicalDevice,
    queues: HashMap<QueueType, QueueRecord>,
}

impl DeviceContext {
    /// Wrap externally created device handles.
    ///
    /// A graphics queue record is required; compute and transfer fall back
    /// along the chain transfer -> compute -> graphics when absent.
    pub fn new(
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        queues: HashMap<QueueType, QueueRecord>,
    ) -> Result<Self> {
        if !queues.contains_key(&QueueType::Graphics) {
            return Err(GpuError::InvalidState(
                "device context requires a graphics queue".to_string(),
            ));
        }

        Ok(Self {
            device,
            physical_device,
            queues,
        })
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get a cloneable handle to the device.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Look up the queue record for a queue type, applying the fallback chain.
    pub fn queue(&self, ty: QueueType) -> QueueRecord {
        resolve_queue(&self.queues, ty)
    }

    /// Queue family index for a queue type, applying the fallback chain.
    pub fn queue_family(&self, ty: QueueType) -> u32 {
        self.queue(ty).family_index
    }
}

/// Resolve a queue record, falling back transfer -> compute -> graphics.
///
/// The graphics record must be present; `DeviceContext::new` enforces that.
fn resolve_queue(queues: &HashMap<QueueType, QueueRecord>, ty: QueueType) -> QueueRecord {
    if let Some(&record) = queues.get(&ty) {
        return record;
    }

    match ty {
        QueueType::Transfer => resolve_queue(queues, QueueType::Compute),
        QueueType::Compute | QueueType::Graphics => queues[&QueueType::Graphics],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(family: u32) -> QueueRecord {
        QueueRecord {
            queue: vk::Queue::null(),
            family_index: family,
        }
    }

    #[test]
    fn dedicated_queues_resolve_directly() {
        let mut queues = HashMap::new();
        queues.insert(QueueType::Graphics, record(0));
        queues.insert(QueueType::Compute, record(1));
        queues.insert(QueueType::Transfer, record(2));

        assert_eq!(resolve_queue(&queues, QueueType::Graphics).family_index, 0);
        assert_eq!(resolve_queue(&queues, QueueType::Compute).family_index, 1);
        assert_eq!(resolve_queue(&queues, QueueType::Transfer).family_index, 2);
    }

    #[test]
    fn transfer_falls_back_to_compute_then_graphics() {
        let mut queues = HashMap::new();
        queues.insert(QueueType::Graphics, record(0));
        queues.insert(QueueType::Compute, record(1));
        assert_eq!(resolve_queue(&queues, QueueType::Transfer).family_index, 1);

        let mut queues = HashMap::new();
        queues.insert(QueueType::Graphics, record(0));
        assert_eq!(resolve_queue(&queues, QueueType::Transfer).family_index, 0);
        assert_eq!(resolve_queue(&queues, QueueType::Compute).family_index, 0);
    }
}
