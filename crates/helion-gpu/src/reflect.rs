//! Shader reflection and per-stage binding merge.
//!
//! Reflection recovers the descriptor bindings and push-constant block a
//! compiled stage declares; the merge folds every stage of a pipeline into a
//! fixed 4-slot descriptor-set model. The merge operates on plain value
//! types so it can be exercised without a Vulkan device.

use crate::error::{GpuError, Result};
use ash::vk;

/// Number of descriptor set slots the layout model supports.
///
/// Slot convention: 0 = per-frame globals, 1 = per-pass, 2 = per-material,
/// 3 = per-object.
pub const MAX_DESCRIPTOR_SETS: usize = 4;

/// One compiled shader stage handed to reflection.
pub struct ShaderStage<'a> {
    /// SPIR-V words.
    pub code: &'a [u32],
    /// Stage bit this binary was compiled for.
    pub stage: vk::ShaderStageFlags,
}

/// A single reflected binding, flattened over array dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingDescriptor {
    /// Binding index within its set.
    pub binding: u32,
    /// Descriptor kind.
    pub kind: vk::DescriptorType,
    /// Flattened element count (product of array extents, at least 1).
    pub count: u32,
    /// Union of the stages that declare this binding.
    pub stages: vk::ShaderStageFlags,
}

/// Raw reflection output of one stage, before merging.
#[derive(Clone, Debug)]
pub struct StageBindings {
    /// Stage bit the bindings belong to.
    pub stage: vk::ShaderStageFlags,
    /// Declared bindings as (set, binding) pairs.
    pub bindings: Vec<(u32, BindingDescriptor)>,
    /// The stage's push-constant block, if it declares one.
    pub push_constant: Option<vk::PushConstantRange>,
}

/// One slot of the merged layout: bindings ordered by binding index.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetSlot {
    pub bindings: Vec<BindingDescriptor>,
}

impl DescriptorSetSlot {
    /// Whether any stage declared a binding in this slot.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Merge result for one shader-stage combination.
#[derive(Clone, Debug, Default)]
pub struct MergedLayout {
    /// Fixed slots 0..=3. Empty slots stay empty rather than being compacted.
    pub slots: [DescriptorSetSlot; MAX_DESCRIPTOR_SETS],
    /// One range per stage that declares a push-constant block.
    pub push_constants: Vec<vk::PushConstantRange>,
}

impl MergedLayout {
    /// Index of the highest slot with at least one binding.
    pub fn highest_occupied_slot(&self) -> Option<usize> {
        self.slots.iter().rposition(|slot| !slot.is_empty())
    }
}

/// Reflect one stage's SPIR-V into its declared bindings and push constants.
///
/// Only the first push-constant block is kept; additional blocks are dropped
/// with a warning.
pub fn reflect_stage(code: &[u32], stage: vk::ShaderStageFlags) -> Result<StageBindings> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| GpuError::Reflection(format!("{e:?}")))?;

    let mut out = StageBindings {
        stage,
        bindings: Vec::new(),
        push_constant: None,
    };

    for entry_point in &entry_points {
        for var in &entry_point.vars {
            match var {
                spirq::var::Variable::Descriptor {
                    desc_bind,
                    desc_ty,
                    nbind,
                    ..
                } => {
                    let kind = descriptor_kind(desc_ty)?;
                    // An unsized or zero-dimension array reflects as 0 elements.
                    let count = (*nbind).max(1);
                    out.bindings.push((
                        desc_bind.set(),
                        BindingDescriptor {
                            binding: desc_bind.bind(),
                            kind,
                            count,
                            stages: stage,
                        },
                    ));
                }
                spirq::var::Variable::PushConstant { ty, .. } => {
                    if out.push_constant.is_some() {
                        tracing::warn!(
                            ?stage,
                            "stage declares multiple push-constant blocks; keeping the first"
                        );
                        continue;
                    }
                    let size = ty.nbyte().unwrap_or(0) as u32;
                    out.push_constant = Some(vk::PushConstantRange {
                        stage_flags: stage,
                        offset: 0,
                        size,
                    });
                }
                _ => {}
            }
        }
    }

    Ok(out)
}

/// Map a spirq descriptor type to the Vulkan descriptor kind.
fn descriptor_kind(desc_ty: &spirq::ty::DescriptorType) -> Result<vk::DescriptorType> {
    use spirq::ty::DescriptorType;
    match desc_ty {
        DescriptorType::Sampler() => Ok(vk::DescriptorType::SAMPLER),
        DescriptorType::CombinedImageSampler() => Ok(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        DescriptorType::SampledImage() => Ok(vk::DescriptorType::SAMPLED_IMAGE),
        DescriptorType::StorageImage(_) => Ok(vk::DescriptorType::STORAGE_IMAGE),
        DescriptorType::UniformTexelBuffer() => Ok(vk::DescriptorType::UNIFORM_TEXEL_BUFFER),
        DescriptorType::StorageTexelBuffer(_) => Ok(vk::DescriptorType::STORAGE_TEXEL_BUFFER),
        DescriptorType::UniformBuffer() => Ok(vk::DescriptorType::UNIFORM_BUFFER),
        DescriptorType::StorageBuffer(_) => Ok(vk::DescriptorType::STORAGE_BUFFER),
        DescriptorType::InputAttachment(_) => Ok(vk::DescriptorType::INPUT_ATTACHMENT),
        DescriptorType::AccelStruct() => Ok(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR),
        other => Err(GpuError::Reflection(format!(
            "unsupported SPIR-V descriptor type: {other:?}"
        ))),
    }
}

/// Merge reflected stages into the 4-slot layout model.
///
/// Bindings shared across stages get a unioned stage mask; a descriptor-kind
/// mismatch for the same (set, binding) is a configuration error, as is any
/// set number outside the slot range. Each slot's binding list comes out
/// sorted by binding index so callers can hash layouts reproducibly.
pub fn merge_stages(stages: &[StageBindings]) -> Result<MergedLayout> {
    if stages.is_empty() {
        return Err(GpuError::InvalidState(
            "cannot merge zero shader stages".to_string(),
        ));
    }

    let mut merged = MergedLayout::default();

    for stage in stages {
        for &(set, binding) in &stage.bindings {
            let slot = merged
                .slots
                .get_mut(set as usize)
                .ok_or(GpuError::SetIndexOutOfRange {
                    set,
                    max: MAX_DESCRIPTOR_SETS as u32,
                })?;

            match slot.bindings.iter_mut().find(|b| b.binding == binding.binding) {
                Some(existing) => {
                    if existing.kind != binding.kind {
                        return Err(GpuError::BindingConflict {
                            set,
                            binding: binding.binding,
                            first: existing.kind,
                            second: binding.kind,
                        });
                    }
                    existing.stages |= binding.stages;
                    // Stages may disagree on array length; keep the widest.
                    existing.count = existing.count.max(binding.count);
                }
                None => slot.bindings.push(binding),
            }
        }

        if let Some(range) = stage.push_constant {
            merged.push_constants.push(range);
        }
    }

    for slot in &mut merged.slots {
        slot.bindings.sort_by_key(|b| b.binding);
    }

    Ok(merged)
}

/// Reflect and merge a full stage set in one call.
pub fn reflect_and_merge(stages: &[ShaderStage<'_>]) -> Result<MergedLayout> {
    if stages.is_empty() {
        return Err(GpuError::InvalidState(
            "cannot build a layout from zero shader stages".to_string(),
        ));
    }

    let reflected = stages
        .iter()
        .map(|s| reflect_stage(s.code, s.stage))
        .collect::<Result<Vec<_>>>()?;

    merge_stages(&reflected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(
        flags: vk::ShaderStageFlags,
        bindings: &[(u32, u32, vk::DescriptorType, u32)],
    ) -> StageBindings {
        StageBindings {
            stage: flags,
            bindings: bindings
                .iter()
                .map(|&(set, binding, kind, count)| {
                    (
                        set,
                        BindingDescriptor {
                            binding,
                            kind,
                            count,
                            stages: flags,
                        },
                    )
                })
                .collect(),
            push_constant: None,
        }
    }

    #[test]
    fn shared_binding_unions_stage_masks() {
        let vert = stage(
            vk::ShaderStageFlags::VERTEX,
            &[(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)],
        );
        let frag = stage(
            vk::ShaderStageFlags::FRAGMENT,
            &[(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)],
        );

        let merged = merge_stages(&[vert, frag]).unwrap();
        assert_eq!(merged.slots[0].bindings.len(), 1);
        assert_eq!(
            merged.slots[0].bindings[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn kind_mismatch_is_a_configuration_error() {
        let vert = stage(
            vk::ShaderStageFlags::VERTEX,
            &[(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)],
        );
        let frag = stage(
            vk::ShaderStageFlags::FRAGMENT,
            &[(0, 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1)],
        );

        let err = merge_stages(&[vert, frag]).unwrap_err();
        assert!(matches!(
            err,
            GpuError::BindingConflict {
                set: 0,
                binding: 0,
                ..
            }
        ));
    }

    #[test]
    fn set_outside_slot_range_is_a_configuration_error() {
        let frag = stage(
            vk::ShaderStageFlags::FRAGMENT,
            &[(4, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)],
        );

        let err = merge_stages(&[frag]).unwrap_err();
        assert!(matches!(
            err,
            GpuError::SetIndexOutOfRange { set: 4, max: 4 }
        ));
    }

    #[test]
    fn bindings_are_sorted_and_unique_within_a_slot() {
        let vert = stage(
            vk::ShaderStageFlags::VERTEX,
            &[
                (0, 3, vk::DescriptorType::STORAGE_BUFFER, 1),
                (0, 1, vk::DescriptorType::UNIFORM_BUFFER, 1),
            ],
        );
        let frag = stage(
            vk::ShaderStageFlags::FRAGMENT,
            &[
                (0, 2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
                (0, 1, vk::DescriptorType::UNIFORM_BUFFER, 1),
            ],
        );

        let merged = merge_stages(&[vert, frag]).unwrap();
        let indices: Vec<u32> = merged.slots[0].bindings.iter().map(|b| b.binding).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn zero_stages_is_an_error() {
        assert!(matches!(
            merge_stages(&[]).unwrap_err(),
            GpuError::InvalidState(_)
        ));
    }

    #[test]
    fn push_constants_flatten_to_one_range_per_stage() {
        let mut vert = stage(vk::ShaderStageFlags::VERTEX, &[]);
        vert.push_constant = Some(vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: 64,
        });
        let mut frag = stage(vk::ShaderStageFlags::FRAGMENT, &[]);
        frag.push_constant = Some(vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: 16,
        });

        let merged = merge_stages(&[vert, frag]).unwrap();
        assert_eq!(merged.push_constants.len(), 2);
        assert_eq!(merged.push_constants[0].size, 64);
        assert_eq!(
            merged.push_constants[1].stage_flags,
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn vertex_fragment_scenario_merges_as_expected() {
        // vertex: set 0 binding 0 uniform buffer
        // fragment: set 0 binding 0 uniform buffer, set 1 binding 0 sampler array[4]
        let vert = stage(
            vk::ShaderStageFlags::VERTEX,
            &[(0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1)],
        );
        let frag = stage(
            vk::ShaderStageFlags::FRAGMENT,
            &[
                (0, 0, vk::DescriptorType::UNIFORM_BUFFER, 1),
                (1, 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4),
            ],
        );

        let merged = merge_stages(&[vert, frag]).unwrap();

        assert_eq!(merged.slots[0].bindings.len(), 1);
        assert_eq!(
            merged.slots[0].bindings[0],
            BindingDescriptor {
                binding: 0,
                kind: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            }
        );

        assert_eq!(merged.slots[1].bindings.len(), 1);
        assert_eq!(
            merged.slots[1].bindings[0],
            BindingDescriptor {
                binding: 0,
                kind: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                count: 4,
                stages: vk::ShaderStageFlags::FRAGMENT,
            }
        );

        assert!(merged.slots[2].is_empty());
        assert!(merged.slots[3].is_empty());
        assert_eq!(merged.highest_occupied_slot(), Some(1));
    }
}
