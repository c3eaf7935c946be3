//! Pipeline layout construction from merged reflection data.
//!
//! Set layouts are created in ascending slot order so the pipeline layout's
//! set indices always match the shaders' `set = N` declarations. Empty slots
//! below the highest occupied slot get a placeholder empty layout rather
//! than being compacted away; shaders index sets positionally and a silent
//! shift would bind resources to the wrong set.

use crate::error::Result;
use crate::reflect::{BindingDescriptor, MergedLayout, MAX_DESCRIPTOR_SETS};
use ash::vk;

/// What to create for one slot of the merged layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotPlan {
    /// The slot has bindings and gets a real layout.
    Layout,
    /// Empty slot below an occupied one; gets an empty placeholder layout.
    Placeholder,
    /// Empty slot above the highest occupied one; not created at all.
    Skip,
}

/// One created set layout and the slot it belongs to.
pub struct SetLayoutSlot {
    pub slot: u32,
    pub layout: vk::DescriptorSetLayout,
    pub placeholder: bool,
}

/// A pipeline layout together with the set layouts it references.
pub struct PipelineLayout {
    pub layout: vk::PipelineLayout,
    /// Created set layouts in ascending slot order.
    pub set_layouts: Vec<SetLayoutSlot>,
    pub push_constants: Vec<vk::PushConstantRange>,
}

impl PipelineLayout {
    /// The set layout created for a slot, if the slot was not skipped.
    pub fn set_layout(&self, slot: u32) -> Option<vk::DescriptorSetLayout> {
        self.set_layouts
            .iter()
            .find(|s| s.slot == slot)
            .map(|s| s.layout)
    }

    /// Destroy the pipeline layout and its set layouts.
    ///
    /// # Safety
    /// The device must be valid and no pipeline may still reference this layout.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline_layout(self.layout, None);
        for set in &self.set_layouts {
            device.destroy_descriptor_set_layout(set.layout, None);
        }
    }
}

/// Decide per slot whether to create a layout, a placeholder, or nothing.
pub fn plan_slots(merged: &MergedLayout) -> [SlotPlan; MAX_DESCRIPTOR_SETS] {
    let mut plan = [SlotPlan::Skip; MAX_DESCRIPTOR_SETS];

    if let Some(highest) = merged.highest_occupied_slot() {
        for (i, slot) in merged.slots.iter().enumerate().take(highest + 1) {
            plan[i] = if slot.is_empty() {
                SlotPlan::Placeholder
            } else {
                SlotPlan::Layout
            };
        }
    }

    plan
}

fn to_vk_binding(b: &BindingDescriptor) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(b.binding)
        .descriptor_type(b.kind)
        .descriptor_count(b.count)
        .stage_flags(b.stages)
}

/// Build descriptor-set layouts and the combined pipeline layout.
///
/// Each call creates fresh device objects; nothing is cached across calls.
/// On any failure every object created so far is destroyed before the error
/// propagates, so a partially built layout is never observable.
///
/// # Safety
/// The device must be valid.
pub unsafe fn build(device: &ash::Device, merged: &MergedLayout) -> Result<PipelineLayout> {
    let plan = plan_slots(merged);
    let mut set_layouts: Vec<SetLayoutSlot> = Vec::new();

    let build_inner = |set_layouts: &mut Vec<SetLayoutSlot>| -> Result<vk::PipelineLayout> {
        for (slot_index, entry) in plan.iter().enumerate() {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = match entry {
                SlotPlan::Skip => continue,
                SlotPlan::Placeholder => Vec::new(),
                SlotPlan::Layout => merged.slots[slot_index]
                    .bindings
                    .iter()
                    .map(to_vk_binding)
                    .collect(),
            };

            let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            // SAFETY: Caller guarantees the device is valid.
            let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };
            set_layouts.push(SetLayoutSlot {
                slot: slot_index as u32,
                layout,
                placeholder: matches!(entry, SlotPlan::Placeholder),
            });
        }

        let handles: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(|s| s.layout).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&handles)
            .push_constant_ranges(&merged.push_constants);

        // SAFETY: Caller guarantees the device is valid.
        Ok(unsafe { device.create_pipeline_layout(&layout_info, None)? })
    };

    match build_inner(&mut set_layouts) {
        Ok(layout) => Ok(PipelineLayout {
            layout,
            set_layouts,
            push_constants: merged.push_constants.clone(),
        }),
        Err(e) => {
            for set in &set_layouts {
                device.destroy_descriptor_set_layout(set.layout, None);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::DescriptorSetSlot;

    fn slot_with_binding() -> DescriptorSetSlot {
        DescriptorSetSlot {
            bindings: vec![BindingDescriptor {
                binding: 0,
                kind: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
            }],
        }
    }

    #[test]
    fn occupied_slots_get_layouts_and_trailing_empties_are_skipped() {
        let mut merged = MergedLayout::default();
        merged.slots[0] = slot_with_binding();
        merged.slots[1] = slot_with_binding();

        assert_eq!(
            plan_slots(&merged),
            [
                SlotPlan::Layout,
                SlotPlan::Layout,
                SlotPlan::Skip,
                SlotPlan::Skip
            ]
        );
    }

    #[test]
    fn interior_gap_gets_a_placeholder_not_compaction() {
        let mut merged = MergedLayout::default();
        merged.slots[1] = slot_with_binding();
        merged.slots[3] = slot_with_binding();

        assert_eq!(
            plan_slots(&merged),
            [
                SlotPlan::Placeholder,
                SlotPlan::Layout,
                SlotPlan::Placeholder,
                SlotPlan::Layout
            ]
        );
    }

    #[test]
    fn fully_empty_layout_plans_nothing() {
        let merged = MergedLayout::default();
        assert_eq!(plan_slots(&merged), [SlotPlan::Skip; MAX_DESCRIPTOR_SETS]);
    }

    #[test]
    fn vertex_fragment_scenario_plans_two_layouts() {
        let mut merged = MergedLayout::default();
        merged.slots[0] = slot_with_binding();
        merged.slots[1] = slot_with_binding();

        let layouts = plan_slots(&merged)
            .iter()
            .filter(|p| **p != SlotPlan::Skip)
            .count();
        assert_eq!(layouts, 2);
    }
}
