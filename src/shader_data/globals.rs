use std::mem::size_of;

use crate::backend::{DescriptorType, GpuBackend, ShaderStages};
use crate::config::RenderConfig;
use crate::descriptor::{Descriptor, DescriptorPool, DescriptorSetIndex};
use crate::error::{RenderError, RenderResult};
use crate::lifecycle::GpuObject;
use crate::memory::BufferType;

use super::data::{ShaderData, ShaderDataArray};
use super::structs::{
    CameraShaderData, EntityShaderData, EnvGridShaderData, EnvProbeShaderData, LightShaderData,
    MaterialShaderData, SceneShaderData, ShadowShaderData, SkeletonShaderData,
};
use super::ticket::Ticket;

/// Binding numbers of the shader-data arrays inside their descriptor sets.
pub mod binding {
    pub const SCENE_SCENES: u32 = 0;
    pub const SCENE_CAMERAS: u32 = 1;
    pub const SCENE_LIGHTS: u32 = 2;
    pub const SCENE_ENV_GRIDS: u32 = 3;
    pub const SCENE_SHADOW_MAPS: u32 = 4;
    pub const SCENE_ENV_PROBES: u32 = 5;

    pub const OBJECT_MATERIALS: u32 = 0;
    pub const OBJECT_ENTITIES: u32 = 1;
    pub const OBJECT_SKELETONS: u32 = 2;
}

/// Every shader-data array the renderer exposes to shaders.
///
/// Scenes and cameras live in uniform buffers read through dynamic offsets;
/// everything else is a storage buffer indexed by ticket. Every array lives in
/// a per-frame set, so each frame in flight reads its own buffers.
#[derive(Debug)]
pub struct ShaderGlobals {
    pub scenes: ShaderData<SceneShaderData>,
    pub cameras: ShaderData<CameraShaderData>,
    pub materials: ShaderData<MaterialShaderData>,
    pub entities: ShaderData<EntityShaderData>,
    pub lights: ShaderData<LightShaderData>,
    pub skeletons: ShaderData<SkeletonShaderData>,
    pub shadow_maps: ShaderData<ShadowShaderData>,
    pub env_probes: ShaderData<EnvProbeShaderData>,
    pub env_grids: ShaderData<EnvGridShaderData>,
}

impl ShaderGlobals {
    pub fn new(config: &RenderConfig) -> Self {
        let budgets = &config.shader_data_budgets;
        Self {
            scenes: ShaderData::new("scenes", BufferType::Uniform, budgets.scenes),
            cameras: ShaderData::new("cameras", BufferType::Uniform, budgets.cameras),
            materials: ShaderData::new("materials", BufferType::Storage, budgets.materials),
            entities: ShaderData::new("entities", BufferType::Storage, budgets.entities),
            lights: ShaderData::new("lights", BufferType::Storage, budgets.lights),
            skeletons: ShaderData::new("skeletons", BufferType::Storage, budgets.skeletons),
            shadow_maps: ShaderData::new("shadow maps", BufferType::Storage, budgets.shadow_maps),
            env_probes: ShaderData::new("env probes", BufferType::Storage, budgets.env_probes),
            env_grids: ShaderData::new("env grids", BufferType::Storage, budgets.env_grids),
        }
    }

    fn arrays(&self) -> [&dyn ShaderDataArray; 9] {
        [
            &self.scenes,
            &self.cameras,
            &self.materials,
            &self.entities,
            &self.lights,
            &self.skeletons,
            &self.shadow_maps,
            &self.env_probes,
            &self.env_grids,
        ]
    }

    fn arrays_mut(&mut self) -> [&mut dyn ShaderDataArray; 9] {
        [
            &mut self.scenes,
            &mut self.cameras,
            &mut self.materials,
            &mut self.entities,
            &mut self.lights,
            &mut self.skeletons,
            &mut self.shadow_maps,
            &mut self.env_probes,
            &mut self.env_grids,
        ]
    }

    pub fn is_created(&self) -> bool {
        self.arrays().iter().all(|array| array.is_created())
    }

    /// Create every buffer. Buffers created before a failure are destroyed.
    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        let alignment = backend.capabilities().min_uniform_buffer_offset_alignment;
        for (name, stride) in [
            ("scenes", size_of::<SceneShaderData>() as u64),
            ("cameras", size_of::<CameraShaderData>() as u64),
        ] {
            if alignment > 0 && stride % alignment != 0 {
                return Err(RenderError::Unsupported(format!(
                    "{} stride {} is not a multiple of the uniform offset alignment {}",
                    name, stride, alignment
                )));
            }
        }

        let mut arrays = self.arrays_mut();
        for i in 0..arrays.len() {
            if let Err(err) = arrays[i].create(backend) {
                log::error!("Failed to create shader data '{}': {}", arrays[i].name(), err);
                for created in arrays[..i].iter_mut() {
                    created.destroy(backend);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        for array in self.arrays_mut() {
            if array.is_created() {
                array.destroy(backend);
            }
        }
    }

    /// Upload the dirty range of every array into the buffers of
    /// `frame_index`. Returns how many arrays were written.
    pub fn update_all(
        &self,
        backend: &mut dyn GpuBackend,
        frame_index: usize,
    ) -> RenderResult<usize> {
        let mut uploaded = 0;
        for array in self.arrays() {
            if array.update_buffer(backend, frame_index)? {
                uploaded += 1;
            }
        }
        Ok(uploaded)
    }

    /// Declare the array descriptors in every frame copy of the Scene and
    /// Object sets, copy `f` pointing at the buffers of frame `f`. Must run
    /// after [`ShaderGlobals::create`] and before the pool creates those sets.
    pub fn publish(&self, pool: &mut DescriptorPool) {
        for (frame, index) in DescriptorSetIndex::Scene.frame_copies().into_iter().enumerate() {
            let set = pool.add_descriptor_set(index);
            for (binding, ty, sub_descriptor) in [
                (
                    binding::SCENE_SCENES,
                    DescriptorType::UniformBufferDynamic,
                    self.scenes.element_sub_descriptor(frame),
                ),
                (
                    binding::SCENE_CAMERAS,
                    DescriptorType::UniformBufferDynamic,
                    self.cameras.element_sub_descriptor(frame),
                ),
                (
                    binding::SCENE_LIGHTS,
                    DescriptorType::StorageBuffer,
                    self.lights.sub_descriptor(frame),
                ),
                (
                    binding::SCENE_ENV_GRIDS,
                    DescriptorType::StorageBuffer,
                    self.env_grids.sub_descriptor(frame),
                ),
                (
                    binding::SCENE_SHADOW_MAPS,
                    DescriptorType::StorageBuffer,
                    self.shadow_maps.sub_descriptor(frame),
                ),
                (
                    binding::SCENE_ENV_PROBES,
                    DescriptorType::StorageBuffer,
                    self.env_probes.sub_descriptor(frame),
                ),
            ] {
                set.add_descriptor(Descriptor::new(binding, ty).with_stages(ShaderStages::ALL))
                    .add_sub_descriptor(sub_descriptor);
            }
        }

        for (frame, index) in DescriptorSetIndex::Object.frame_copies().into_iter().enumerate() {
            let set = pool.add_descriptor_set(index);
            for (binding, sub_descriptor) in [
                (binding::OBJECT_MATERIALS, self.materials.sub_descriptor(frame)),
                (binding::OBJECT_ENTITIES, self.entities.sub_descriptor(frame)),
                (binding::OBJECT_SKELETONS, self.skeletons.sub_descriptor(frame)),
            ] {
                set.add_descriptor(
                    Descriptor::new(binding, DescriptorType::StorageBuffer)
                        .with_stages(ShaderStages::ALL),
                )
                .add_sub_descriptor(sub_descriptor);
            }
        }
    }

    /// Dynamic offsets for binding a Scene set, in binding order.
    pub fn scene_dynamic_offsets(&self, scene: Ticket, camera: Ticket) -> [u32; 2] {
        [
            self.scenes.dynamic_offset(scene),
            self.cameras.dynamic_offset(camera),
        ]
    }
}

impl GpuObject for ShaderGlobals {
    fn name(&self) -> &str {
        "shader globals"
    }

    fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        ShaderGlobals::create(self, backend)
    }

    fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        ShaderGlobals::destroy(self, backend)
    }
}

static_assertions::assert_impl_all!(ShaderGlobals: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, DummyBackend, DummyOp};
    use crate::config::ShaderDataBudgets;
    use crate::shader_data::structs::MaterialShaderData;
    use glam::Vec4;

    fn config() -> RenderConfig {
        RenderConfig::default().with_shader_data_budgets(ShaderDataBudgets::small())
    }

    #[test]
    fn test_material_upload_lands_in_slot_one() {
        let mut backend = DummyBackend::new();
        let mut globals = ShaderGlobals::new(&config());
        globals.create(&mut backend).unwrap();
        backend.clear_ops();

        let ticket = globals.materials.acquire_ticket().unwrap();
        assert_eq!(ticket, 1);
        globals.materials.get_mut(ticket).albedo = Vec4::new(1.0, 0.5, 0.25, 1.0);
        assert_eq!(globals.update_all(&mut backend, 0).unwrap(), 1);

        let size = size_of::<MaterialShaderData>() as u64;
        let writes: Vec<_> = backend
            .ops()
            .iter()
            .filter_map(|op| match op {
                DummyOp::WriteBuffer { buffer, offset, size } => Some((*buffer, *offset, *size)),
                _ => None,
            })
            .collect();
        assert_eq!(
            writes,
            vec![(globals.materials.buffer(0).handle(), size, size)]
        );

        // The other frame catches up on its own turn.
        backend.clear_ops();
        assert_eq!(globals.update_all(&mut backend, 1).unwrap(), 1);
        assert_eq!(globals.update_all(&mut backend, 1).unwrap(), 0);
        assert_eq!(
            backend.count_ops(|op| matches!(
                op,
                DummyOp::WriteBuffer { buffer, .. } if *buffer == globals.materials.buffer(1).handle()
            )),
            1
        );

        globals.destroy(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_partial_create_failure_cleans_up() {
        let mut backend = DummyBackend::new();
        let mut globals = ShaderGlobals::new(&config());
        backend.fail_call("create_buffer", 4, BackendError::OutOfMemory);
        assert!(globals.create(&mut backend).is_err());
        assert!(!globals.is_created());
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_publish_fills_both_frame_copies() {
        let mut backend = DummyBackend::new();
        let mut globals = ShaderGlobals::new(&config());
        globals.create(&mut backend).unwrap();
        let mut pool = DescriptorPool::new(&config());
        globals.publish(&mut pool);
        pool.create(&mut backend).unwrap();

        for index in [DescriptorSetIndex::Scene, DescriptorSetIndex::SceneFrame1] {
            let set = pool.get_descriptor_set(index).unwrap();
            let cameras = set.get_descriptor(binding::SCENE_CAMERAS).unwrap();
            assert_eq!(
                cameras.descriptor_type(),
                DescriptorType::UniformBufferDynamic
            );
            assert_eq!(cameras.len(), 1);
        }
        assert_eq!(globals.scene_dynamic_offsets(2, 3), [512, 768]);

        // Each frame copy reads the buffers of its own frame.
        for (frame, index) in DescriptorSetIndex::Object.frame_copies().into_iter().enumerate() {
            let materials = pool
                .get_descriptor_set(index)
                .and_then(|set| set.get_descriptor(binding::OBJECT_MATERIALS))
                .and_then(|descriptor| descriptor.get_sub_descriptor(0))
                .unwrap();
            assert_eq!(*materials, globals.materials.sub_descriptor(frame).resource);
        }
        assert_ne!(
            globals.materials.sub_descriptor(0),
            globals.materials.sub_descriptor(1)
        );

        pool.destroy(&mut backend);
        globals.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }
}
