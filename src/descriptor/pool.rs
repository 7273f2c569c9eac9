use std::collections::BTreeMap;

use crate::backend::{
    CommandBufferHandle, DescriptorPoolDesc, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutDesc, DescriptorSetLayoutHandle, GpuBackend, PipelineBindPoint,
    PipelineLayoutHandle,
};
use crate::config::{RenderConfig, MAX_FRAMES_IN_FLIGHT};
use crate::error::{RenderError, RenderResult};

use super::index::DescriptorSetIndex;
use super::set::DescriptorSet;

/// Backend descriptor pools that grow on exhaustion.
///
/// Regular and update-after-bind sets come from separate pools. When the
/// newest pool of the needed kind is exhausted a new one with the same sizes is
/// created and the allocation retried, at most `growth_limit` times over the
/// allocator's lifetime.
#[derive(Debug)]
pub struct DescriptorAllocator {
    max_sets: u32,
    size_per_type: u32,
    bindless_size_per_type: u32,
    growth_limit: u32,
    growths: u32,
    pools: Vec<DescriptorPoolHandle>,
    update_after_bind_pools: Vec<DescriptorPoolHandle>,
}

impl DescriptorAllocator {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            max_sets: config.descriptor_pool_max_sets,
            size_per_type: config.descriptor_pool_size_per_type,
            bindless_size_per_type: config
                .descriptor_pool_size_per_type
                .max(config.max_bindless_resources * MAX_FRAMES_IN_FLIGHT as u32),
            growth_limit: config.descriptor_pool_growth_limit,
            growths: 0,
            pools: Vec::new(),
            update_after_bind_pools: Vec::new(),
        }
    }

    /// Number of pools created past the first of each kind.
    pub fn growths(&self) -> u32 {
        self.growths
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len() + self.update_after_bind_pools.len()
    }

    pub fn allocate(
        &mut self,
        backend: &mut dyn GpuBackend,
        layout: DescriptorSetLayoutHandle,
        update_after_bind: bool,
        variable_count: Option<u32>,
    ) -> RenderResult<DescriptorSetHandle> {
        let mut pool = match self.newest(update_after_bind) {
            Some(pool) => pool,
            None => self.create_pool(backend, update_after_bind)?,
        };
        loop {
            match backend
                .allocate_descriptor_set(pool, layout, variable_count)
                .map_err(RenderError::from)
            {
                Ok(set) => return Ok(set),
                Err(RenderError::NeedsReallocation) if self.growths < self.growth_limit => {
                    self.growths += 1;
                    log::info!(
                        "Descriptor pool exhausted, growing ({} of {})",
                        self.growths,
                        self.growth_limit
                    );
                    pool = self.create_pool(backend, update_after_bind)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn newest(&self, update_after_bind: bool) -> Option<DescriptorPoolHandle> {
        if update_after_bind {
            self.update_after_bind_pools.last().copied()
        } else {
            self.pools.last().copied()
        }
    }

    fn create_pool(
        &mut self,
        backend: &mut dyn GpuBackend,
        update_after_bind: bool,
    ) -> RenderResult<DescriptorPoolHandle> {
        let per_type = if update_after_bind {
            self.bindless_size_per_type
        } else {
            self.size_per_type
        };
        let pool = backend.create_descriptor_pool(&DescriptorPoolDesc::uniform(
            self.max_sets,
            per_type,
            update_after_bind,
        ))?;
        if update_after_bind {
            self.update_after_bind_pools.push(pool);
        } else {
            self.pools.push(pool);
        }
        log::debug!(
            "Created descriptor pool ({} sets, {} per type, update-after-bind: {})",
            self.max_sets,
            per_type,
            update_after_bind
        );
        Ok(pool)
    }

    /// Destroy every pool, freeing all sets allocated from them.
    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        for pool in self
            .pools
            .drain(..)
            .chain(self.update_after_bind_pools.drain(..))
        {
            backend.destroy_descriptor_pool(pool);
        }
        self.growths = 0;
    }
}

/// The engine's descriptor sets, keyed by [`DescriptorSetIndex`], and the
/// pools they are allocated from.
#[derive(Debug)]
pub struct DescriptorPool {
    allocator: DescriptorAllocator,
    sets: BTreeMap<DescriptorSetIndex, DescriptorSet>,
    empty_layout: Option<DescriptorSetLayoutHandle>,
    max_bindless_resources: u32,
}

impl DescriptorPool {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            allocator: DescriptorAllocator::new(config),
            sets: BTreeMap::new(),
            empty_layout: None,
            max_bindless_resources: config.max_bindless_resources,
        }
    }

    pub fn max_bindless_resources(&self) -> u32 {
        self.max_bindless_resources
    }

    pub fn allocator(&self) -> &DescriptorAllocator {
        &self.allocator
    }

    pub fn is_created(&self) -> bool {
        self.empty_layout.is_some()
    }

    /// Register a set, or return the one already registered at `index`.
    pub fn add_descriptor_set(&mut self, index: DescriptorSetIndex) -> &mut DescriptorSet {
        self.sets
            .entry(index)
            .or_insert_with(|| DescriptorSet::new(index))
    }

    pub fn get_descriptor_set(&self, index: DescriptorSetIndex) -> Option<&DescriptorSet> {
        self.sets.get(&index)
    }

    pub fn get_descriptor_set_mut(
        &mut self,
        index: DescriptorSetIndex,
    ) -> Option<&mut DescriptorSet> {
        self.sets.get_mut(&index)
    }

    /// The physical copy of `index` used by `frame_index`.
    pub fn descriptor_set_for_frame_mut(
        &mut self,
        index: DescriptorSetIndex,
        frame_index: usize,
    ) -> Option<&mut DescriptorSet> {
        self.sets.get_mut(&index.per_frame_index(frame_index))
    }

    pub fn descriptor_sets(&self) -> impl Iterator<Item = &DescriptorSet> {
        self.sets.values()
    }

    /// Create the placeholder layout and every registered set.
    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        if self.empty_layout.is_none() {
            self.empty_layout =
                Some(backend.create_descriptor_set_layout(&DescriptorSetLayoutDesc::default())?);
        }
        let pending: Vec<DescriptorSetIndex> = self
            .sets
            .iter()
            .filter(|(_, set)| !set.is_created())
            .map(|(index, _)| *index)
            .collect();
        for index in pending {
            self.create_descriptor_set(backend, index)?;
        }
        log::debug!(
            "Descriptor pool ready: {} sets in {} pools",
            self.sets.len(),
            self.allocator.pool_count()
        );
        Ok(())
    }

    /// Create one registered set. A per-frame copy reuses its base set's
    /// layout when both declare the same bindings.
    pub fn create_descriptor_set(
        &mut self,
        backend: &mut dyn GpuBackend,
        index: DescriptorSetIndex,
    ) -> RenderResult<()> {
        let shared_layout = if index.base_index() != index {
            let own_desc = self.sets.get(&index).map(DescriptorSet::layout_desc);
            self.sets
                .get(&index.base_index())
                .filter(|base| base.is_created() && Some(base.layout_desc()) == own_desc)
                .and_then(DescriptorSet::layout)
        } else {
            None
        };
        let Some(set) = self.sets.get_mut(&index) else {
            return Err(RenderError::NotCreated("descriptor set"));
        };
        set.create_with_layout(backend, &mut self.allocator, shared_layout)
    }

    /// Layout bound at `index`'s location: the base set's layout, or an empty
    /// placeholder when no such set is registered.
    pub fn layout_for(&self, index: DescriptorSetIndex) -> Option<DescriptorSetLayoutHandle> {
        self.sets
            .get(&index.base_index())
            .and_then(DescriptorSet::layout)
            .or(self.empty_layout)
    }

    /// Write the dirty elements of every created set.
    pub fn apply_updates(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<usize> {
        let mut written = 0;
        for set in self.sets.values_mut().filter(|set| set.is_created()) {
            written += set.apply_updates(backend)?;
        }
        Ok(written)
    }

    /// Bind the copy of `index` for `frame_index` at its known location.
    ///
    /// `dynamic_offsets` holds one byte offset per dynamic binding of the set,
    /// in binding order.
    #[allow(clippy::too_many_arguments)]
    pub fn bind_descriptor_set(
        &self,
        backend: &mut dyn GpuBackend,
        cmd: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        index: DescriptorSetIndex,
        frame_index: usize,
        dynamic_offsets: &[u32],
    ) {
        let physical = index.per_frame_index(frame_index);
        let Some(set) = self.sets.get(&physical) else {
            panic!("bind of unregistered descriptor set {:?}", physical);
        };
        let dynamic_count = set
            .descriptors()
            .iter()
            .filter(|d| d.descriptor_type().is_dynamic())
            .map(|d| d.count() as usize)
            .sum::<usize>();
        assert_eq!(
            dynamic_offsets.len(),
            dynamic_count,
            "{:?} needs {} dynamic offsets",
            physical,
            dynamic_count
        );
        backend.cmd_bind_descriptor_sets(
            cmd,
            bind_point,
            layout,
            index.binding_location(),
            &[set.handle()],
            dynamic_offsets,
        );
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        crate::assert_render_thread!();
        for set in self.sets.values_mut().filter(|set| set.is_created()) {
            set.destroy(backend);
        }
        self.allocator.destroy(backend);
        if let Some(layout) = self.empty_layout.take() {
            backend.destroy_descriptor_set_layout(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BufferDesc, BufferHandle, BufferUsage, DescriptorType, DeviceCapabilities, DummyBackend,
        DummyOp, MemoryLocation,
    };
    use crate::descriptor::{Descriptor, SubDescriptor};

    fn storage_buffer(backend: &mut DummyBackend) -> BufferHandle {
        backend
            .create_buffer(&BufferDesc::new(
                256,
                BufferUsage::STORAGE,
                MemoryLocation::CpuToGpu,
            ))
            .unwrap()
    }

    fn update_count(backend: &DummyBackend) -> usize {
        backend.count_ops(|op| matches!(op, DummyOp::UpdateDescriptorSets(_)))
    }

    #[test]
    fn test_apply_updates_is_idempotent() {
        let mut backend = DummyBackend::new();
        let buffer = storage_buffer(&mut backend);
        let mut pool = DescriptorPool::new(&RenderConfig::default());
        pool.add_descriptor_set(DescriptorSetIndex::Global)
            .add_descriptor(Descriptor::new(0, DescriptorType::StorageBuffer))
            .add_sub_descriptor(SubDescriptor::buffer(buffer, 0, 256));
        pool.create(&mut backend).unwrap();
        assert_eq!(update_count(&backend), 1);

        assert_eq!(pool.apply_updates(&mut backend).unwrap(), 0);
        assert_eq!(update_count(&backend), 1);

        pool.get_descriptor_set_mut(DescriptorSetIndex::Global)
            .unwrap()
            .get_descriptor_mut(0)
            .unwrap()
            .mark_dirty(0);
        assert_eq!(pool.apply_updates(&mut backend).unwrap(), 1);
        assert_eq!(update_count(&backend), 2);
        pool.destroy(&mut backend);
    }

    #[test]
    fn test_pool_grows_on_exhaustion() {
        let mut backend = DummyBackend::new();
        let config = RenderConfig::default().with_descriptor_pool_limits(2, 8);
        let mut pool = DescriptorPool::new(&config);
        for index in [
            DescriptorSetIndex::Global,
            DescriptorSetIndex::Scene,
            DescriptorSetIndex::Object,
            DescriptorSetIndex::Voxelizer,
        ] {
            pool.add_descriptor_set(index)
                .add_descriptor(Descriptor::new(0, DescriptorType::UniformBuffer));
        }
        pool.create(&mut backend).unwrap();
        assert_eq!(pool.allocator().growths(), 1);
        assert_eq!(pool.allocator().pool_count(), 2);
        pool.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_growth_limit_surfaces_reallocation() {
        let mut backend = DummyBackend::new();
        let config = RenderConfig::default()
            .with_descriptor_pool_limits(1, 8)
            .with_descriptor_pool_growth_limit(1);
        let mut pool = DescriptorPool::new(&config);
        for index in [
            DescriptorSetIndex::Global,
            DescriptorSetIndex::Scene,
            DescriptorSetIndex::Object,
        ] {
            pool.add_descriptor_set(index)
                .add_descriptor(Descriptor::new(0, DescriptorType::UniformBuffer));
        }
        let err = pool.create(&mut backend).unwrap_err();
        assert_eq!(err, RenderError::NeedsReallocation);
        pool.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_bindless_allocates_variable_count() {
        let mut backend = DummyBackend::new();
        let config = RenderConfig::default();
        let mut pool = DescriptorPool::new(&config);
        for index in DescriptorSetIndex::Bindless.frame_copies() {
            pool.add_descriptor_set(index).add_descriptor(Descriptor::bindless(
                0,
                DescriptorType::CombinedImageSampler,
                config.max_bindless_resources,
            ));
        }
        pool.create(&mut backend).unwrap();

        let counts: Vec<Option<u32>> = backend
            .ops()
            .iter()
            .filter_map(|op| match op {
                DummyOp::AllocateDescriptorSet { variable_count, .. } => Some(*variable_count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![Some(config.max_bindless_resources); 2]);

        // Both frame copies share one layout.
        let base = pool.get_descriptor_set(DescriptorSetIndex::Bindless).unwrap();
        let copy = pool
            .get_descriptor_set(DescriptorSetIndex::BindlessFrame1)
            .unwrap();
        assert_eq!(base.layout(), copy.layout());
        pool.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_bindless_without_descriptor_indexing_is_unsupported() {
        let mut backend = DummyBackend::new().with_capabilities(DeviceCapabilities {
            bindless: false,
            ..DeviceCapabilities::default()
        });
        let mut pool = DescriptorPool::new(&RenderConfig::default());
        pool.add_descriptor_set(DescriptorSetIndex::Bindless)
            .add_descriptor(Descriptor::bindless(0, DescriptorType::SampledImage, 16));
        let err = pool.create(&mut backend).unwrap_err();
        assert!(matches!(err, RenderError::Unsupported(_)));
        pool.destroy(&mut backend);
    }

    #[test]
    fn test_bind_uses_frame_copy() {
        let mut backend = DummyBackend::new();
        let mut pool = DescriptorPool::new(&RenderConfig::default());
        for index in DescriptorSetIndex::Object.frame_copies() {
            pool.add_descriptor_set(index)
                .add_descriptor(Descriptor::new(0, DescriptorType::StorageBufferDynamic));
        }
        pool.create(&mut backend).unwrap();
        let frame1 = pool
            .get_descriptor_set(DescriptorSetIndex::ObjectFrame1)
            .unwrap()
            .handle();

        let layout = backend
            .create_pipeline_layout(&crate::backend::PipelineLayoutDesc::default())
            .unwrap();
        let mut commands = crate::frame::SingleTimeCommands::new();
        let pool_ref = &pool;
        commands.push(move |backend, cmd| {
            pool_ref.bind_descriptor_set(
                backend,
                cmd,
                PipelineBindPoint::Compute,
                layout,
                DescriptorSetIndex::Object,
                1,
                &[128],
            );
            Ok(())
        });
        commands.execute(&mut backend).unwrap();

        assert!(backend.ops().iter().any(|op| matches!(
            op,
            DummyOp::BindDescriptorSets { first_set: 2, sets, dynamic_offsets, .. }
                if sets == &vec![frame1] && dynamic_offsets == &vec![128]
        )));
        backend.destroy_pipeline_layout(layout);
        pool.destroy(&mut backend);
    }

    #[test]
    fn test_variable_count_follows_last_binding() {
        let mut backend = DummyBackend::new();
        let config = RenderConfig::default();
        let mut pool = DescriptorPool::new(&config);
        let set = pool.add_descriptor_set(DescriptorSetIndex::MaterialTextures);
        set.add_descriptor(Descriptor::new(0, DescriptorType::Sampler));
        set.add_descriptor(Descriptor::bindless(1, DescriptorType::SampledImage, 64));
        pool.create(&mut backend).unwrap();

        assert!(backend.ops().iter().any(|op| matches!(
            op,
            DummyOp::AllocateDescriptorSet { variable_count: Some(64), .. }
        )));
        pool.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    #[should_panic(expected = "follows bindless binding")]
    fn test_binding_after_bindless_panics() {
        let mut pool = DescriptorPool::new(&RenderConfig::default());
        let set = pool.add_descriptor_set(DescriptorSetIndex::MaterialTextures);
        set.add_descriptor(Descriptor::bindless(1, DescriptorType::SampledImage, 64));
        set.add_descriptor(Descriptor::new(2, DescriptorType::Sampler));
    }

    #[test]
    #[should_panic(expected = "is not above binding")]
    fn test_bindless_below_existing_binding_panics() {
        let mut pool = DescriptorPool::new(&RenderConfig::default());
        let set = pool.add_descriptor_set(DescriptorSetIndex::MaterialTextures);
        set.add_descriptor(Descriptor::new(3, DescriptorType::Sampler));
        set.add_descriptor(Descriptor::bindless(1, DescriptorType::SampledImage, 64));
    }

    #[test]
    #[should_panic(expected = "already has bindless binding")]
    fn test_second_bindless_binding_panics() {
        let mut pool = DescriptorPool::new(&RenderConfig::default());
        let set = pool.add_descriptor_set(DescriptorSetIndex::MaterialTextures);
        set.add_descriptor(Descriptor::bindless(0, DescriptorType::SampledImage, 64));
        set.add_descriptor(Descriptor::bindless(1, DescriptorType::StorageImage, 64));
    }
}
