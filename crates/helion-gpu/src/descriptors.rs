//! Pooled descriptor set allocation.
//!
//! Pools are sized with a fixed per-kind weighting of their set capacity and
//! are never freed individually; allocation always targets the most recently
//! created pool and rolls over to a fresh pool when it runs out.

use crate::error::{GpuError, Result};
use ash::vk;

/// Maximum descriptor sets per pool.
pub const POOL_MAX_SETS: u32 = 2000;

/// Per-kind weights applied to a pool's set capacity.
///
/// The mix follows a typical scene: many sampled images per set, few
/// standalone samplers or input attachments.
const POOL_WEIGHTS: &[(vk::DescriptorType, f32)] = &[
    (vk::DescriptorType::SAMPLER, 0.5),
    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
    (vk::DescriptorType::SAMPLED_IMAGE, 4.0),
    (vk::DescriptorType::STORAGE_IMAGE, 1.0),
    (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, 1.0),
    (vk::DescriptorType::STORAGE_TEXEL_BUFFER, 1.0),
    (vk::DescriptorType::UNIFORM_BUFFER, 2.0),
    (vk::DescriptorType::STORAGE_BUFFER, 2.0),
    (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 1.0),
    (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1.0),
    (vk::DescriptorType::INPUT_ATTACHMENT, 0.5),
];

/// Weighted pool sizes for a pool with the given set capacity.
pub fn pool_sizes(max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
    POOL_WEIGHTS
        .iter()
        .map(|&(ty, weight)| vk::DescriptorPoolSize {
            ty,
            descriptor_count: ((max_sets as f32 * weight) as u32).max(1),
        })
        .collect()
}

/// Descriptor set allocator backed by an ordered sequence of pools.
///
/// Pools are destroyed only at shutdown, in reverse creation order. The
/// allocation contract is transparent rollover: when the active pool is out
/// of sets or out of a descriptor kind, a fresh pool is created and the
/// allocation retried once before the error reaches the caller.
pub struct DescriptorAllocator {
    pools: Vec<vk::DescriptorPool>,
    max_sets: u32,
    allocated_in_active: u32,
}

impl DescriptorAllocator {
    /// Create an allocator; the first pool is created lazily on allocation.
    pub fn new(max_sets: u32) -> Self {
        Self {
            pools: Vec::new(),
            max_sets,
            allocated_in_active: 0,
        }
    }

    /// Create an allocator with the default pool capacity.
    pub fn with_default_capacity() -> Self {
        Self::new(POOL_MAX_SETS)
    }

    /// Number of pools created so far.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Whether the next allocation will create a new pool first.
    fn needs_new_pool(&self) -> bool {
        self.pools.is_empty() || self.allocated_in_active >= self.max_sets
    }

    /// Create a fresh pool and make it the active allocation target.
    ///
    /// # Safety
    /// The device must be valid.
    unsafe fn create_pool(&mut self, device: &ash::Device) -> Result<()> {
        let sizes = pool_sizes(self.max_sets);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(self.max_sets)
            .pool_sizes(&sizes);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        tracing::debug!(pool_count = self.pools.len() + 1, "created descriptor pool");
        self.pools.push(pool);
        self.allocated_in_active = 0;
        Ok(())
    }

    /// Allocate one descriptor set for the given layout.
    ///
    /// # Safety
    /// The device and layout must be valid.
    pub unsafe fn allocate(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        if self.needs_new_pool() {
            self.create_pool(device)?;
        }

        match self.try_allocate(device, layout) {
            Ok(set) => {
                self.allocated_in_active += 1;
                Ok(set)
            }
            Err(GpuError::Vulkan(
                vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL,
            )) => {
                // A descriptor kind ran out before the set budget did.
                self.create_pool(device)?;
                let set = self.try_allocate(device, layout).map_err(|e| {
                    GpuError::DescriptorPoolExhausted(format!(
                        "allocation failed against a fresh pool: {e}"
                    ))
                })?;
                self.allocated_in_active += 1;
                Ok(set)
            }
            Err(e) => Err(e),
        }
    }

    /// Allocate against the active (most recently created) pool.
    ///
    /// # Safety
    /// The device and layout must be valid.
    unsafe fn try_allocate(
        &self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let pool = self
            .pools
            .last()
            .copied()
            .ok_or_else(|| GpuError::InvalidState("no descriptor pool available".to_string()))?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = device.allocate_descriptor_sets(&alloc_info)?;
        Ok(sets[0])
    }

    /// Reset every pool, freeing all descriptor sets at once.
    ///
    /// # Safety
    /// The device must be valid and no allocated set may be in use.
    pub unsafe fn reset_all(&mut self, device: &ash::Device) -> Result<()> {
        for &pool in &self.pools {
            device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        self.allocated_in_active = 0;
        Ok(())
    }

    /// Destroy every pool in reverse creation order.
    ///
    /// # Safety
    /// The device must be valid and no allocated set may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for pool in self.pools.drain(..).rev() {
            device.destroy_descriptor_pool(pool, None);
        }
        self.allocated_in_active = 0;
    }
}

/// Write a uniform buffer descriptor.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write a combined image sampler descriptor.
///
/// # Safety
/// Device, image view, and sampler must be valid.
pub unsafe fn write_combined_image_sampler(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
    layout: vk::ImageLayout,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .sampler(sampler)
        .image_layout(layout);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(std::slice::from_ref(&image_info));

    device.update_descriptor_sets(&[write], &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_follow_the_weighting() {
        let sizes = pool_sizes(POOL_MAX_SETS);

        let count_for = |ty: vk::DescriptorType| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
                .unwrap()
        };

        assert_eq!(count_for(vk::DescriptorType::SAMPLER), 1000);
        assert_eq!(count_for(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 8000);
        assert_eq!(count_for(vk::DescriptorType::SAMPLED_IMAGE), 8000);
        assert_eq!(count_for(vk::DescriptorType::UNIFORM_BUFFER), 4000);
        assert_eq!(count_for(vk::DescriptorType::INPUT_ATTACHMENT), 1000);
    }

    #[test]
    fn pool_sizes_never_drop_to_zero() {
        for size in pool_sizes(1) {
            assert!(size.descriptor_count >= 1);
        }
    }

    #[test]
    fn allocation_at_capacity_rolls_to_a_new_pool() {
        // Contract: the 2001st set against a 2000-set pool must come from a
        // transparently created second pool, never an error.
        let mut allocator = DescriptorAllocator::new(POOL_MAX_SETS);
        assert!(allocator.needs_new_pool());

        allocator.pools.push(vk::DescriptorPool::null());
        allocator.allocated_in_active = POOL_MAX_SETS - 1;
        assert!(!allocator.needs_new_pool());

        allocator.allocated_in_active = POOL_MAX_SETS;
        assert!(allocator.needs_new_pool());
    }
}
