use crate::backend::{
    CommandBufferHandle, ComputePipelineDesc, GpuBackend, PipelineBindPoint, PipelineHandle,
    PushConstantRange, ShaderStages,
};
use crate::descriptor::{DescriptorPool, DescriptorSetIndex};
use crate::error::RenderResult;

use super::layout::PipelineLayout;

/// A compute pipeline and the layout it owns.
#[derive(Debug)]
pub struct ComputePipeline {
    label: String,
    spirv: Vec<u32>,
    entry_point: String,
    layout: PipelineLayout,
    handle: Option<PipelineHandle>,
}

impl ComputePipeline {
    pub fn new(
        label: impl Into<String>,
        spirv: Vec<u32>,
        used_sets: &[DescriptorSetIndex],
        push_constants: &[PushConstantRange],
    ) -> Self {
        Self {
            label: label.into(),
            spirv,
            entry_point: "main".to_string(),
            layout: PipelineLayout::new(used_sets, push_constants),
            handle: None,
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    pub fn handle(&self) -> PipelineHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("compute pipeline '{}' used before create", self.label),
        }
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend, pool: &DescriptorPool) -> RenderResult<()> {
        crate::assert_render_thread!();
        assert!(
            self.handle.is_none(),
            "compute pipeline '{}' created twice",
            self.label
        );
        self.layout.create(backend, pool)?;
        let result = backend.create_compute_pipeline(&ComputePipelineDesc {
            label: &self.label,
            layout: self.layout.handle(),
            spirv: &self.spirv,
            entry_point: &self.entry_point,
        });
        match result {
            Ok(handle) => {
                log::debug!("Created compute pipeline '{}'", self.label);
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.layout.destroy(backend);
                Err(err.into())
            }
        }
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        let Some(handle) = self.handle.take() else {
            panic!(
                "compute pipeline '{}' destroyed before create or twice",
                self.label
            );
        };
        backend.destroy_pipeline(handle);
        self.layout.destroy(backend);
    }

    pub fn bind(&self, backend: &mut dyn GpuBackend, cmd: CommandBufferHandle) {
        backend.cmd_bind_pipeline(cmd, PipelineBindPoint::Compute, self.handle());
    }

    pub fn bind_descriptor_set(
        &self,
        backend: &mut dyn GpuBackend,
        cmd: CommandBufferHandle,
        pool: &DescriptorPool,
        index: DescriptorSetIndex,
        frame_index: usize,
        dynamic_offsets: &[u32],
    ) {
        self.layout.bind_descriptor_set(
            backend,
            cmd,
            PipelineBindPoint::Compute,
            pool,
            index,
            frame_index,
            dynamic_offsets,
        );
    }

    pub fn push_constants(&self, backend: &mut dyn GpuBackend, cmd: CommandBufferHandle, data: &[u8]) {
        backend.cmd_push_constants(cmd, self.layout.handle(), ShaderStages::COMPUTE, 0, data);
    }

    pub fn dispatch(&self, backend: &mut dyn GpuBackend, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        backend.cmd_dispatch(cmd, x, y, z);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DescriptorType, DummyBackend, DummyOp};
    use crate::config::RenderConfig;
    use crate::descriptor::Descriptor;
    use crate::frame::SingleTimeCommands;

    fn pool_with_object_sets(backend: &mut DummyBackend) -> DescriptorPool {
        let mut pool = DescriptorPool::new(&RenderConfig::default());
        pool.add_descriptor_set(DescriptorSetIndex::Global)
            .add_descriptor(Descriptor::new(0, DescriptorType::UniformBuffer));
        for index in DescriptorSetIndex::Object.frame_copies() {
            pool.add_descriptor_set(index)
                .add_descriptor(Descriptor::new(0, DescriptorType::StorageBuffer));
        }
        pool.create(backend).unwrap();
        pool
    }

    #[test]
    fn test_layout_fills_unused_locations() {
        let mut backend = DummyBackend::new();
        let mut pool = pool_with_object_sets(&mut backend);
        let mut pipeline = ComputePipeline::new(
            "cull",
            vec![0x0723_0203],
            &[DescriptorSetIndex::Object],
            &[],
        );
        pipeline.create(&mut backend, &pool).unwrap();

        // Global and Scene precede Object; Scene falls back to the placeholder.
        let layouts = pipeline.layout().set_layouts();
        assert_eq!(layouts.len(), 3);
        assert_eq!(
            Some(layouts[0]),
            pool.get_descriptor_set(DescriptorSetIndex::Global)
                .unwrap()
                .layout()
        );
        assert_eq!(Some(layouts[1]), pool.layout_for(DescriptorSetIndex::Scene));

        pipeline.destroy(&mut backend);
        pool.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_bind_and_dispatch() {
        let mut backend = DummyBackend::new();
        let mut pool = pool_with_object_sets(&mut backend);
        let mut pipeline = ComputePipeline::new(
            "cull",
            vec![0x0723_0203],
            &[DescriptorSetIndex::Object],
            &[],
        );
        pipeline.create(&mut backend, &pool).unwrap();

        let mut commands = SingleTimeCommands::new();
        let (pipeline_ref, pool_ref) = (&pipeline, &pool);
        commands.push(move |backend, cmd| {
            pipeline_ref.bind(backend, cmd);
            pipeline_ref.bind_descriptor_set(
                backend,
                cmd,
                pool_ref,
                DescriptorSetIndex::Object,
                1,
                &[],
            );
            pipeline_ref.dispatch(backend, cmd, 8, 1, 1);
            Ok(())
        });
        commands.execute(&mut backend).unwrap();
        assert_eq!(
            backend.count_ops(|op| matches!(op, DummyOp::BindDescriptorSets { first_set: 2, .. })),
            1
        );
        assert_eq!(
            backend.count_ops(|op| matches!(op, DummyOp::Dispatch { x: 8, .. })),
            1
        );

        pipeline.destroy(&mut backend);
        pool.destroy(&mut backend);
    }

    #[test]
    fn test_failed_pipeline_releases_layout() {
        let mut backend = DummyBackend::new();
        let mut pool = pool_with_object_sets(&mut backend);
        let mut pipeline = ComputePipeline::new("empty", Vec::new(), &[DescriptorSetIndex::Global], &[]);
        assert!(pipeline.create(&mut backend, &pool).is_err());
        assert!(!pipeline.layout().is_created());
        pool.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }
}
