//! Command buffer management.

use crate::device::{DeviceContext, QueueType};
use crate::error::Result;
use ash::vk;
use hashbrown::HashMap;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(
        &self,
        device: &ash::Device,
        level: vk::CommandBufferLevel,
    ) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(1);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers[0])
    }

    /// Free command buffers back to this pool.
    ///
    /// # Safety
    /// The device must be valid and the buffers must not be in use.
    pub unsafe fn free_command_buffers(&self, device: &ash::Device, buffers: &[vk::CommandBuffer]) {
        device.free_command_buffers(self.pool, buffers);
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Command pools keyed by queue type.
///
/// Queue types that share a family (for example compute falling back to the
/// graphics family) still get their own pool; the key is the logical role,
/// not the family index.
pub struct CommandPools {
    pools: HashMap<QueueType, CommandPool>,
}

impl CommandPools {
    /// Create one pool per requested queue type.
    ///
    /// # Safety
    /// The device context must be valid.
    pub unsafe fn new(
        ctx: &DeviceContext,
        types: &[QueueType],
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let mut pools = HashMap::with_capacity(types.len());
        for &ty in types {
            let pool = CommandPool::new(ctx.device(), ctx.queue_family(ty), flags)?;
            pools.insert(ty, pool);
        }

        Ok(Self { pools })
    }

    /// Get the pool for a queue type, falling back to the graphics pool.
    pub fn get(&self, ty: QueueType) -> Option<&CommandPool> {
        self.pools
            .get(&ty)
            .or_else(|| self.pools.get(&QueueType::Graphics))
    }

    /// Destroy all pools.
    ///
    /// # Safety
    /// The device must be valid and no pooled command buffer may be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for pool in self.pools.values() {
            pool.destroy(device);
        }
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}
