//! Descriptor sets end to end: declaration, allocation, element writes and
//! per-frame binding.

mod common;

use rstest::rstest;

use common::{init_logger, test_config};
use render_core::backend::{
    BufferDesc, BufferHandle, BufferUsage, CommandBufferLevel, CommandBufferUsage,
    DescriptorResource, DescriptorType, DescriptorWrite,
    DummyBackend, DummyOp, GpuBackend, MemoryLocation, PipelineBindPoint, PipelineLayoutDesc,
};
use render_core::config::MAX_FRAMES_IN_FLIGHT;
use render_core::shader_data::ShaderGlobals;
use render_core::{Descriptor, DescriptorPool, DescriptorSetIndex, RenderConfig, SubDescriptor};

fn storage_buffer(backend: &mut DummyBackend, size: u64) -> BufferHandle {
    backend
        .create_buffer(&BufferDesc::new(
            size,
            BufferUsage::STORAGE,
            MemoryLocation::CpuToGpu,
        ))
        .unwrap()
}

fn written(backend: &DummyBackend) -> Vec<DescriptorWrite> {
    backend
        .ops()
        .iter()
        .filter_map(|op| match op {
            DummyOp::UpdateDescriptorSets(writes) => Some(writes.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn test_two_elements_produce_two_writes() {
    init_logger();
    let mut backend = DummyBackend::new();
    let a = storage_buffer(&mut backend, 256);
    let b = storage_buffer(&mut backend, 512);

    let mut pool = DescriptorPool::new(&RenderConfig::default());
    let descriptor = pool
        .add_descriptor_set(DescriptorSetIndex::Global)
        .add_descriptor(Descriptor::new(5, DescriptorType::StorageBuffer).with_count(2));
    descriptor.add_sub_descriptor(SubDescriptor::buffer(a, 0, 256).at(0));
    descriptor.add_sub_descriptor(SubDescriptor::buffer(b, 0, 512).at(1));
    pool.create(&mut backend).unwrap();

    let writes = written(&backend);
    assert_eq!(writes.len(), 2);
    let set = pool
        .get_descriptor_set(DescriptorSetIndex::Global)
        .unwrap()
        .handle();
    for (element, (buffer, range)) in [(a, 256), (b, 512)].into_iter().enumerate() {
        let write = writes
            .iter()
            .find(|w| w.array_element == element as u32)
            .unwrap();
        assert_eq!(write.set, set);
        assert_eq!(write.binding, 5);
        assert_eq!(write.ty, DescriptorType::StorageBuffer);
        assert_eq!(
            write.resource,
            DescriptorResource::Buffer {
                buffer,
                offset: 0,
                range
            }
        );
    }

    pool.destroy(&mut backend);
    backend.destroy_buffer(a);
    backend.destroy_buffer(b);
    assert_eq!(backend.live_object_count(), 0);
}

#[test]
fn test_replacing_one_element_rewrites_only_that_element() {
    let mut backend = DummyBackend::new();
    let a = storage_buffer(&mut backend, 256);
    let b = storage_buffer(&mut backend, 256);
    let c = storage_buffer(&mut backend, 256);

    let mut pool = DescriptorPool::new(&RenderConfig::default());
    let descriptor = pool
        .add_descriptor_set(DescriptorSetIndex::Global)
        .add_descriptor(Descriptor::new(0, DescriptorType::StorageBuffer).with_count(2));
    descriptor.add_sub_descriptor(SubDescriptor::buffer(a, 0, 256).at(0));
    descriptor.add_sub_descriptor(SubDescriptor::buffer(b, 0, 256).at(1));
    pool.create(&mut backend).unwrap();
    backend.clear_ops();

    pool.get_descriptor_set_mut(DescriptorSetIndex::Global)
        .and_then(|set| set.get_descriptor_mut(0))
        .unwrap()
        .add_sub_descriptor(SubDescriptor::buffer(c, 0, 256).at(1));
    assert_eq!(pool.apply_updates(&mut backend).unwrap(), 1);
    let writes = written(&backend);
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].array_element, 1);

    backend.clear_ops();
    assert_eq!(pool.apply_updates(&mut backend).unwrap(), 0);
    assert!(written(&backend).is_empty());

    pool.destroy(&mut backend);
    for buffer in [a, b, c] {
        backend.destroy_buffer(buffer);
    }
}

#[rstest]
fn test_per_frame_index_round_trips(
    #[values(
        DescriptorSetIndex::Global,
        DescriptorSetIndex::Scene,
        DescriptorSetIndex::Object,
        DescriptorSetIndex::SceneFrame1,
        DescriptorSetIndex::ObjectFrame1,
        DescriptorSetIndex::Bindless,
        DescriptorSetIndex::BindlessFrame1,
        DescriptorSetIndex::Voxelizer,
        DescriptorSetIndex::Raytracing,
        DescriptorSetIndex::MaterialTextures
    )]
    index: DescriptorSetIndex,
    #[values(0, 1, 2, 3)] frame: usize,
) {
    let physical = index.per_frame_index(frame);
    assert_eq!(physical.base_index(), index.base_index());
    assert_eq!(physical.binding_location(), index.binding_location());
    if index.is_per_frame() {
        assert_eq!(index.frame_copies().len(), MAX_FRAMES_IN_FLIGHT);
        assert_eq!(physical, index.frame_copies()[frame % MAX_FRAMES_IN_FLIGHT]);
    } else {
        assert_eq!(physical, index);
    }
}

#[test]
fn test_known_sets_have_distinct_locations() {
    let locations: std::collections::HashSet<u32> = DescriptorSetIndex::KNOWN_LAYOUT_ORDER
        .iter()
        .map(|index| index.binding_location())
        .collect();
    assert_eq!(locations.len(), DescriptorSetIndex::KNOWN_LAYOUT_ORDER.len());
}

#[test]
fn test_scene_set_binds_per_frame_copy_with_dynamic_offsets() {
    init_logger();
    let mut backend = DummyBackend::new();
    let config = test_config();
    let mut globals = ShaderGlobals::new(&config);
    globals.create(&mut backend).unwrap();
    let mut pool = DescriptorPool::new(&config);
    globals.publish(&mut pool);
    pool.create(&mut backend).unwrap();

    let layouts: Vec<_> = DescriptorSetIndex::KNOWN_LAYOUT_ORDER
        .iter()
        .filter_map(|&index| pool.layout_for(index))
        .collect();
    assert_eq!(layouts.len(), DescriptorSetIndex::KNOWN_LAYOUT_ORDER.len());
    let layout = backend
        .create_pipeline_layout(&PipelineLayoutDesc {
            set_layouts: layouts,
            push_constants: Vec::new(),
        })
        .unwrap();

    let scene = globals.scenes.acquire_ticket().unwrap();
    let camera = globals.cameras.acquire_ticket().unwrap();
    let offsets = globals.scene_dynamic_offsets(scene, camera);
    assert_eq!(offsets, [256, 256]);

    let cmd = backend
        .allocate_command_buffer(CommandBufferLevel::Primary)
        .unwrap();
    backend
        .begin_command_buffer(cmd, CommandBufferUsage::ONE_TIME_SUBMIT, None)
        .unwrap();
    for frame in 0..MAX_FRAMES_IN_FLIGHT {
        pool.bind_descriptor_set(
            &mut backend,
            cmd,
            PipelineBindPoint::Graphics,
            layout,
            DescriptorSetIndex::Scene,
            frame,
            &offsets,
        );
    }

    let bound: Vec<_> = backend
        .ops()
        .iter()
        .filter_map(|op| match op {
            DummyOp::BindDescriptorSets {
                first_set,
                sets,
                dynamic_offsets,
                ..
            } => Some((*first_set, sets.clone(), dynamic_offsets.clone())),
            _ => None,
        })
        .collect();
    let expected_sets: Vec<_> = DescriptorSetIndex::Scene
        .frame_copies()
        .into_iter()
        .map(|index| pool.get_descriptor_set(index).unwrap().handle())
        .collect();
    assert_eq!(bound.len(), MAX_FRAMES_IN_FLIGHT);
    assert_ne!(expected_sets[0], expected_sets[1]);
    for (frame, (first_set, sets, dynamic_offsets)) in bound.into_iter().enumerate() {
        assert_eq!(first_set, DescriptorSetIndex::Scene.binding_location());
        assert_eq!(sets, vec![expected_sets[frame]]);
        assert_eq!(dynamic_offsets, offsets.to_vec());
    }

    backend.end_command_buffer(cmd).unwrap();
    backend.free_command_buffer(cmd);
    backend.destroy_pipeline_layout(layout);
    pool.destroy(&mut backend);
    globals.destroy(&mut backend);
    assert_eq!(backend.live_object_count(), 0);
}

#[rstest]
#[case::no_growth(8, 0)]
#[case::one_growth(3, 1)]
#[case::many_growths(1, 3)]
fn test_pool_growth(#[case] max_sets: u32, #[case] growths: u32) {
    let mut backend = DummyBackend::new();
    let config = RenderConfig::default().with_descriptor_pool_limits(max_sets, 64);
    let mut pool = DescriptorPool::new(&config);
    for index in [
        DescriptorSetIndex::Global,
        DescriptorSetIndex::Voxelizer,
        DescriptorSetIndex::Raytracing,
        DescriptorSetIndex::MaterialTextures,
    ] {
        pool.add_descriptor_set(index)
            .add_descriptor(Descriptor::new(0, DescriptorType::UniformBuffer));
    }
    pool.create(&mut backend).unwrap();
    assert_eq!(pool.allocator().growths(), growths);
    assert!(pool.descriptor_sets().all(|set| set.is_created()));

    pool.destroy(&mut backend);
    assert_eq!(backend.live_object_count(), 0);
}
