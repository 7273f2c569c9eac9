use crate::backend::{
    DescriptorSetHandle, DescriptorSetLayoutDesc, DescriptorSetLayoutHandle, DescriptorWrite,
    GpuBackend,
};
use crate::error::{RenderError, RenderResult};
use crate::lifecycle::{DeferredRelease, ReleasedObject};

use super::binding::Descriptor;
use super::index::DescriptorSetIndex;
use super::pool::DescriptorAllocator;

/// A set of descriptors with dirty tracking.
///
/// Descriptors are declared before [`create`](Self::create); afterwards only
/// their sub-descriptors change, and [`apply_updates`](Self::apply_updates)
/// writes the changed elements in one batch.
#[derive(Debug)]
pub struct DescriptorSet {
    index: DescriptorSetIndex,
    descriptors: Vec<Descriptor>,
    layout: Option<DescriptorSetLayoutHandle>,
    owns_layout: bool,
    handle: Option<DescriptorSetHandle>,
}

impl DescriptorSet {
    pub fn new(index: DescriptorSetIndex) -> Self {
        Self {
            index,
            descriptors: Vec::new(),
            layout: None,
            owns_layout: false,
            handle: None,
        }
    }

    pub fn index(&self) -> DescriptorSetIndex {
        self.index
    }

    /// Declare a binding. Bindings are unique within a set and fixed once the
    /// set is created.
    pub fn add_descriptor(&mut self, descriptor: Descriptor) -> &mut Descriptor {
        assert!(
            self.handle.is_none(),
            "descriptor added to {:?} after creation",
            self.index
        );
        assert!(
            self.get_descriptor(descriptor.binding()).is_none(),
            "binding {} declared twice in {:?}",
            descriptor.binding(),
            self.index
        );
        // A variable-count binding must be the last binding of its set.
        if let Some(bindless) = self.descriptors.iter().find(|d| d.is_bindless()) {
            assert!(
                !descriptor.is_bindless(),
                "{:?} already has bindless binding {}",
                self.index,
                bindless.binding()
            );
            assert!(
                descriptor.binding() < bindless.binding(),
                "binding {} in {:?} follows bindless binding {}",
                descriptor.binding(),
                self.index,
                bindless.binding()
            );
        } else if descriptor.is_bindless() {
            if let Some(last) = self.descriptors.last() {
                assert!(
                    descriptor.binding() > last.binding(),
                    "bindless binding {} in {:?} is not above binding {}",
                    descriptor.binding(),
                    self.index,
                    last.binding()
                );
            }
        }
        let position = self
            .descriptors
            .partition_point(|d| d.binding() < descriptor.binding());
        self.descriptors.insert(position, descriptor);
        &mut self.descriptors[position]
    }

    pub fn get_descriptor(&self, binding: u32) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.binding() == binding)
    }

    pub fn get_descriptor_mut(&mut self, binding: u32) -> Option<&mut Descriptor> {
        self.descriptors.iter_mut().find(|d| d.binding() == binding)
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn is_bindless(&self) -> bool {
        self.descriptors.iter().any(Descriptor::is_bindless)
    }

    pub fn is_dirty(&self) -> bool {
        self.descriptors.iter().any(Descriptor::is_dirty)
    }

    pub fn is_created(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> DescriptorSetHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("descriptor set {:?} used before create", self.index),
        }
    }

    pub fn layout(&self) -> Option<DescriptorSetLayoutHandle> {
        self.layout
    }

    pub fn layout_desc(&self) -> DescriptorSetLayoutDesc {
        DescriptorSetLayoutDesc {
            bindings: self.descriptors.iter().map(Descriptor::layout_binding).collect(),
            update_after_bind_pool: self.is_bindless(),
        }
    }

    /// Count of the variable-sized binding, which `add_descriptor` keeps last.
    fn variable_count(&self) -> Option<u32> {
        self.descriptors
            .last()
            .filter(|d| d.is_bindless())
            .map(Descriptor::count)
    }

    /// Build the layout, allocate the set and write every sub-descriptor.
    pub fn create(
        &mut self,
        backend: &mut dyn GpuBackend,
        allocator: &mut DescriptorAllocator,
    ) -> RenderResult<()> {
        self.create_with_layout(backend, allocator, None)
    }

    /// As [`create`](Self::create), reusing `shared_layout` when given. The
    /// set does not destroy a shared layout.
    pub fn create_with_layout(
        &mut self,
        backend: &mut dyn GpuBackend,
        allocator: &mut DescriptorAllocator,
        shared_layout: Option<DescriptorSetLayoutHandle>,
    ) -> RenderResult<()> {
        crate::assert_render_thread!();
        assert!(
            self.handle.is_none(),
            "descriptor set {:?} created twice",
            self.index
        );
        if self.is_bindless() && !backend.capabilities().bindless {
            return Err(RenderError::Unsupported(format!(
                "{:?} needs descriptor indexing for bindless resources",
                self.index
            )));
        }

        for descriptor in &mut self.descriptors {
            descriptor.freeze_count();
        }
        let (layout, owns_layout) = match shared_layout {
            Some(layout) => (layout, false),
            None => (backend.create_descriptor_set_layout(&self.layout_desc())?, true),
        };

        let handle = match allocator.allocate(
            backend,
            layout,
            self.is_bindless(),
            self.variable_count(),
        ) {
            Ok(handle) => handle,
            Err(err) => {
                if owns_layout {
                    backend.destroy_descriptor_set_layout(layout);
                }
                return Err(err);
            }
        };
        log::trace!("Allocated descriptor set {:?}", self.index);

        self.layout = Some(layout);
        self.owns_layout = owns_layout;
        self.handle = Some(handle);
        for descriptor in &mut self.descriptors {
            descriptor.mark_all_dirty();
        }
        self.apply_updates(backend)?;
        Ok(())
    }

    /// The writes `apply_updates` would issue.
    pub fn pending_writes(&self) -> Vec<DescriptorWrite> {
        let set = self.handle();
        self.descriptors
            .iter()
            .flat_map(|d| d.pending_writes(set))
            .collect()
    }

    /// Write every dirty sub-descriptor in a single backend call. Returns the
    /// number of elements written. Dirty state survives a failed write.
    pub fn apply_updates(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<usize> {
        crate::assert_render_thread!();
        if !self.is_dirty() {
            return Ok(0);
        }
        let writes = self.pending_writes();
        if !writes.is_empty() {
            backend.update_descriptor_sets(&writes)?;
        }
        for descriptor in &mut self.descriptors {
            descriptor.clear_dirty();
        }
        Ok(writes.len())
    }

    /// Destroy the layout. The set itself is freed with its pool.
    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        assert!(
            self.handle.take().is_some(),
            "descriptor set {:?} destroyed before create or twice",
            self.index
        );
        if let Some(layout) = self.layout.take() {
            if self.owns_layout {
                backend.destroy_descriptor_set_layout(layout);
            }
        }
    }

    pub fn release(&mut self, deferred: &DeferredRelease) {
        self.handle = None;
        if let Some(layout) = self.layout.take() {
            if self.owns_layout {
                deferred.release(ReleasedObject::DescriptorSetLayout(layout));
            }
        }
    }
}
