use std::collections::{BTreeMap, BTreeSet};

use crate::backend::{
    AccelerationStructureHandle, BufferHandle, DescriptorBindingFlags, DescriptorResource,
    DescriptorSetHandle, DescriptorSetLayoutBinding, DescriptorType, DescriptorWrite,
    ImageViewHandle, ResourceState, SamplerHandle, ShaderStages,
};

/// One array element of a [`Descriptor`].
///
/// `element_index` of `None` appends after the current last element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubDescriptor {
    pub element_index: Option<u32>,
    pub resource: DescriptorResource,
}

impl SubDescriptor {
    pub fn new(resource: DescriptorResource) -> Self {
        Self {
            element_index: None,
            resource,
        }
    }

    /// A whole-buffer or sub-range buffer binding.
    pub fn buffer(buffer: BufferHandle, offset: u64, range: u64) -> Self {
        Self::new(DescriptorResource::Buffer {
            buffer,
            offset,
            range,
        })
    }

    pub fn image(view: ImageViewHandle, sampler: Option<SamplerHandle>) -> Self {
        Self::new(DescriptorResource::Image {
            view,
            sampler,
            state: ResourceState::ShaderResource,
        })
    }

    pub fn storage_image(view: ImageViewHandle) -> Self {
        Self::new(DescriptorResource::Image {
            view,
            sampler: None,
            state: ResourceState::UnorderedAccess,
        })
    }

    pub fn sampler(sampler: SamplerHandle) -> Self {
        Self::new(DescriptorResource::Sampler(sampler))
    }

    pub fn acceleration_structure(structure: AccelerationStructureHandle) -> Self {
        Self::new(DescriptorResource::AccelerationStructure(structure))
    }

    pub fn at(mut self, element_index: u32) -> Self {
        self.element_index = Some(element_index);
        self
    }
}

/// A binding slot in a descriptor set holding one or more sub-descriptors.
///
/// Every insertion marks its element dirty; the owning set writes dirty
/// elements on its next `apply_updates`.
#[derive(Debug, Clone)]
pub struct Descriptor {
    binding: u32,
    ty: DescriptorType,
    stages: ShaderStages,
    bindless: bool,
    count: Option<u32>,
    sub_descriptors: BTreeMap<u32, DescriptorResource>,
    dirty: BTreeSet<u32>,
}

impl Descriptor {
    pub fn new(binding: u32, ty: DescriptorType) -> Self {
        Self {
            binding,
            ty,
            stages: ShaderStages::ALL,
            bindless: false,
            count: None,
            sub_descriptors: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// A variable-count, partially bound array of `max_resources` elements.
    pub fn bindless(binding: u32, ty: DescriptorType, max_resources: u32) -> Self {
        let mut descriptor = Self::new(binding, ty);
        descriptor.bindless = true;
        descriptor.count = Some(max_resources);
        descriptor
    }

    pub fn with_stages(mut self, stages: ShaderStages) -> Self {
        self.stages = stages;
        self
    }

    /// Fix the array size up front instead of sizing it from the elements
    /// present when the set is created.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        self.ty
    }

    pub fn is_bindless(&self) -> bool {
        self.bindless
    }

    /// Array size of the binding. Until frozen by set creation this follows
    /// the highest element present.
    pub fn count(&self) -> u32 {
        self.count.unwrap_or_else(|| {
            self.sub_descriptors
                .keys()
                .next_back()
                .map_or(1, |last| last + 1)
        })
    }

    pub(crate) fn freeze_count(&mut self) {
        self.count = Some(self.count());
    }

    pub fn len(&self) -> usize {
        self.sub_descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_descriptors.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_elements(&self) -> impl Iterator<Item = u32> + '_ {
        self.dirty.iter().copied()
    }

    pub fn get_sub_descriptor(&self, element_index: u32) -> Option<&DescriptorResource> {
        self.sub_descriptors.get(&element_index)
    }

    /// Insert or replace an element, returning its index.
    pub fn add_sub_descriptor(&mut self, sub: SubDescriptor) -> u32 {
        let index = sub.element_index.unwrap_or_else(|| {
            self.sub_descriptors
                .keys()
                .next_back()
                .map_or(0, |last| last + 1)
        });
        if let Some(count) = self.count {
            assert!(
                index < count,
                "element {} out of range for binding {} of {} elements",
                index,
                self.binding,
                count
            );
        }
        self.check_resource(&sub.resource);
        self.sub_descriptors.insert(index, sub.resource);
        self.dirty.insert(index);
        index
    }

    /// Remove an element and cancel any pending write of it.
    pub fn remove_sub_descriptor(&mut self, element_index: u32) -> Option<DescriptorResource> {
        self.dirty.remove(&element_index);
        self.sub_descriptors.remove(&element_index)
    }

    pub fn mark_dirty(&mut self, element_index: u32) {
        if self.sub_descriptors.contains_key(&element_index) {
            self.dirty.insert(element_index);
        }
    }

    pub(crate) fn mark_all_dirty(&mut self) {
        self.dirty = self.sub_descriptors.keys().copied().collect();
    }

    pub(crate) fn layout_binding(&self) -> DescriptorSetLayoutBinding {
        let flags = if self.bindless {
            DescriptorBindingFlags::PARTIALLY_BOUND
                | DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
                | DescriptorBindingFlags::UPDATE_AFTER_BIND
        } else {
            DescriptorBindingFlags::empty()
        };
        DescriptorSetLayoutBinding {
            binding: self.binding,
            ty: self.ty,
            count: self.count(),
            stages: self.stages,
            flags,
        }
    }

    pub(crate) fn pending_writes(&self, set: DescriptorSetHandle) -> Vec<DescriptorWrite> {
        self.dirty
            .iter()
            .filter_map(|index| {
                self.sub_descriptors
                    .get(index)
                    .map(|resource| DescriptorWrite {
                        set,
                        binding: self.binding,
                        array_element: *index,
                        ty: self.ty,
                        resource: *resource,
                    })
            })
            .collect()
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    fn check_resource(&self, resource: &DescriptorResource) {
        let matches = match resource {
            DescriptorResource::Buffer { .. } => self.ty.is_buffer(),
            DescriptorResource::Image { sampler, .. } => match self.ty {
                DescriptorType::CombinedImageSampler => sampler.is_some(),
                DescriptorType::SampledImage | DescriptorType::StorageImage => true,
                _ => false,
            },
            DescriptorResource::Sampler(_) => self.ty == DescriptorType::Sampler,
            DescriptorResource::AccelerationStructure(_) => {
                self.ty == DescriptorType::AccelerationStructure
            }
        };
        assert!(
            matches,
            "resource {:?} cannot be bound to a {:?} descriptor",
            resource,
            self.ty
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(id: u64) -> SubDescriptor {
        SubDescriptor::buffer(BufferHandle(id), 0, 64)
    }

    #[test]
    fn test_auto_index_appends() {
        let mut descriptor = Descriptor::new(0, DescriptorType::StorageBuffer);
        assert_eq!(descriptor.add_sub_descriptor(buffer(1)), 0);
        assert_eq!(descriptor.add_sub_descriptor(buffer(2).at(4)), 4);
        assert_eq!(descriptor.add_sub_descriptor(buffer(3)), 5);
        assert_eq!(descriptor.count(), 6);
    }

    #[test]
    fn test_replace_keeps_index_unique() {
        let mut descriptor = Descriptor::new(0, DescriptorType::StorageBuffer);
        descriptor.add_sub_descriptor(buffer(1).at(2));
        descriptor.add_sub_descriptor(buffer(7).at(2));
        assert_eq!(descriptor.len(), 1);
        assert_eq!(
            descriptor.get_sub_descriptor(2),
            Some(&buffer(7).resource)
        );
    }

    #[test]
    fn test_remove_cancels_pending_write() {
        let mut descriptor = Descriptor::new(3, DescriptorType::UniformBuffer);
        descriptor.add_sub_descriptor(buffer(1));
        descriptor.add_sub_descriptor(buffer(2));
        descriptor.remove_sub_descriptor(0);

        let writes = descriptor.pending_writes(DescriptorSetHandle(9));
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].array_element, 1);
    }

    #[test]
    fn test_bindless_layout_flags() {
        let descriptor = Descriptor::bindless(0, DescriptorType::CombinedImageSampler, 4096);
        let binding = descriptor.layout_binding();
        assert_eq!(binding.count, 4096);
        assert!(binding
            .flags
            .contains(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT));
    }

    #[test]
    #[should_panic(expected = "cannot be bound")]
    fn test_type_mismatch_panics() {
        let mut descriptor = Descriptor::new(0, DescriptorType::AccelerationStructure);
        descriptor.add_sub_descriptor(buffer(1));
    }
}
