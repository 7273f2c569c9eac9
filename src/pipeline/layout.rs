use crate::backend::{
    CommandBufferHandle, DescriptorSetLayoutHandle, GpuBackend, PipelineBindPoint,
    PipelineLayoutDesc, PipelineLayoutHandle, PushConstantRange,
};
use crate::descriptor::{DescriptorPool, DescriptorSetIndex};
use crate::error::{RenderError, RenderResult};
use crate::lifecycle::{DeferredRelease, ReleasedObject};

/// A pipeline layout covering known descriptor set locations
/// `0..=max(location of each used set)`.
///
/// Locations a pipeline does not use still get the pool's layout (or the
/// empty placeholder), so set numbers agree across every pipeline.
#[derive(Debug)]
pub struct PipelineLayout {
    used_sets: Vec<DescriptorSetIndex>,
    push_constants: Vec<PushConstantRange>,
    set_layouts: Vec<DescriptorSetLayoutHandle>,
    handle: Option<PipelineLayoutHandle>,
}

impl PipelineLayout {
    pub fn new(used_sets: &[DescriptorSetIndex], push_constants: &[PushConstantRange]) -> Self {
        Self {
            used_sets: used_sets.iter().map(|index| index.base_index()).collect(),
            push_constants: push_constants.to_vec(),
            set_layouts: Vec::new(),
            handle: None,
        }
    }

    pub fn used_sets(&self) -> &[DescriptorSetIndex] {
        &self.used_sets
    }

    pub fn set_layouts(&self) -> &[DescriptorSetLayoutHandle] {
        &self.set_layouts
    }

    pub fn is_created(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> PipelineLayoutHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("pipeline layout used before create"),
        }
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend, pool: &DescriptorPool) -> RenderResult<()> {
        assert!(self.handle.is_none(), "pipeline layout created twice");
        let location_count = self
            .used_sets
            .iter()
            .map(|index| index.binding_location() + 1)
            .max()
            .unwrap_or(0) as usize;
        if location_count > backend.capabilities().max_bound_descriptor_sets as usize {
            return Err(RenderError::Unsupported(format!(
                "{} descriptor set locations, device binds at most {}",
                location_count,
                backend.capabilities().max_bound_descriptor_sets
            )));
        }

        let mut set_layouts = Vec::with_capacity(location_count);
        for index in &DescriptorSetIndex::KNOWN_LAYOUT_ORDER[..location_count] {
            match pool.layout_for(*index) {
                Some(layout) => set_layouts.push(layout),
                None => return Err(RenderError::NotCreated("descriptor pool")),
            }
        }

        let handle = backend.create_pipeline_layout(&PipelineLayoutDesc {
            set_layouts: set_layouts.clone(),
            push_constants: self.push_constants.clone(),
        })?;
        self.set_layouts = set_layouts;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        let Some(handle) = self.handle.take() else {
            panic!("pipeline layout destroyed before create or twice");
        };
        backend.destroy_pipeline_layout(handle);
        self.set_layouts.clear();
    }

    pub fn release(&mut self, deferred: &DeferredRelease) {
        if let Some(handle) = self.handle.take() {
            deferred.release(ReleasedObject::PipelineLayout(handle));
        }
        self.set_layouts.clear();
    }

    /// Bind the frame's copy of `index`.
    ///
    /// The set must have been declared when the layout was built and its
    /// layout must still be the one the pipeline layout was created with.
    #[allow(clippy::too_many_arguments)]
    pub fn bind_descriptor_set(
        &self,
        backend: &mut dyn GpuBackend,
        cmd: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pool: &DescriptorPool,
        index: DescriptorSetIndex,
        frame_index: usize,
        dynamic_offsets: &[u32],
    ) {
        let location = index.binding_location() as usize;
        assert!(
            self.used_sets.contains(&index.base_index()),
            "{:?} is not part of this pipeline layout",
            index
        );
        let expected = self.set_layouts.get(location).copied();
        let bound = pool
            .get_descriptor_set(index.per_frame_index(frame_index))
            .and_then(|set| set.layout());
        assert!(
            bound.is_some() && bound == expected,
            "{:?} layout is incompatible with the pipeline layout at set {}",
            index,
            location
        );
        pool.bind_descriptor_set(
            backend,
            cmd,
            bind_point,
            self.handle(),
            index,
            frame_index,
            dynamic_offsets,
        );
    }
}
