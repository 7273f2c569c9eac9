//! Shader-data arrays against the recording backend: ticket handout, dirty
//! spans and what actually gets uploaded.

mod common;

use std::collections::HashSet;
use std::mem::size_of;
use std::sync::Arc;

use glam::Vec4;
use rstest::rstest;

use common::{buffer_writes, init_logger, test_config};
use render_core::backend::{DummyBackend, DummyOp};
use render_core::memory::BufferType;
use render_core::shader_data::{
    LightShaderData, MaterialShaderData, ShaderData, ShaderGlobals, TicketAllocator, NULL_TICKET,
};
use render_core::RenderError;

fn materials(capacity: usize) -> ShaderData<MaterialShaderData> {
    ShaderData::new(
        "materials",
        BufferType::Storage,
        capacity * size_of::<MaterialShaderData>(),
    )
}

fn material(red: f32) -> MaterialShaderData {
    MaterialShaderData {
        albedo: Vec4::new(red, 0.5, 0.25, 1.0),
        alpha_threshold: 0.5,
        ..bytemuck::Zeroable::zeroed()
    }
}

#[rstest]
#[case::tiny(2)]
#[case::small(16)]
#[case::large(1024)]
fn test_tickets_are_unique_and_never_null(#[case] capacity: usize) {
    let allocator = TicketAllocator::new("items", capacity);
    let tickets: Vec<_> = (1..capacity)
        .map(|_| allocator.acquire().unwrap())
        .collect();

    let unique: HashSet<_> = tickets.iter().copied().collect();
    assert_eq!(unique.len(), capacity - 1);
    assert!(!unique.contains(&NULL_TICKET));
    assert!(tickets.iter().all(|&t| (t as usize) < capacity));

    assert_eq!(
        allocator.acquire().unwrap_err(),
        RenderError::CapacityExceeded {
            what: "items",
            capacity
        }
    );
}

#[test]
fn test_concurrent_acquire_never_duplicates() {
    let allocator = Arc::new(TicketAllocator::new("items", 4001));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            std::thread::spawn(move || {
                (0..1000)
                    .map(|_| allocator.acquire().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for ticket in handle.join().unwrap() {
            assert!(seen.insert(ticket), "ticket {} issued twice", ticket);
        }
    }
    assert_eq!(seen.len(), 4000);
    assert_eq!(allocator.live_count(), 4000);
}

#[test]
fn test_released_ticket_is_reused() {
    let allocator = TicketAllocator::new("items", 8);
    let a = allocator.acquire().unwrap();
    let _b = allocator.acquire().unwrap();
    assert!(allocator.release(a));
    assert!(!allocator.release(NULL_TICKET));
    assert_eq!(allocator.acquire().unwrap(), a);
    assert_eq!(allocator.high_water_mark(), 3);
}

#[test]
fn test_single_material_uploads_one_element() {
    init_logger();
    let mut backend = DummyBackend::new();
    let mut data = materials(16);
    data.create(&mut backend).unwrap();
    backend.clear_ops();

    let ticket = data.acquire_ticket().unwrap();
    assert_eq!(ticket, 1);
    data.set(ticket, material(1.0));
    assert!(data.update_buffer(&mut backend, 0).unwrap());

    let stride = size_of::<MaterialShaderData>() as u64;
    assert_eq!(
        buffer_writes(&backend, data.buffer(0).handle()),
        vec![(stride, stride)]
    );
    let bytes = backend.buffer_data(data.buffer(0).handle());
    let uploaded: MaterialShaderData =
        bytemuck::pod_read_unaligned(&bytes[stride as usize..2 * stride as usize]);
    assert_eq!(uploaded, material(1.0));

    data.destroy(&mut backend);
    assert_eq!(backend.live_object_count(), 0);
}

#[rstest]
#[case::adjacent(&[3, 4], 3, 2)]
#[case::gap(&[2, 7], 2, 6)]
#[case::reversed(&[9, 5, 6], 5, 5)]
#[case::repeated(&[4, 4, 4], 4, 1)]
fn test_dirty_span_covers_touched_elements(
    #[case] touched: &[u32],
    #[case] start: usize,
    #[case] len: usize,
) {
    let mut backend = DummyBackend::new();
    let mut data = materials(16);
    data.create(&mut backend).unwrap();
    for _ in 0..15 {
        data.acquire_ticket().unwrap();
    }
    backend.clear_ops();

    for &ticket in touched {
        data.mark_dirty(ticket);
    }
    let range = data.dirty_range(0);
    assert_eq!((range.start(), range.len()), (start, len));

    data.update_buffer(&mut backend, 0).unwrap();
    let stride = size_of::<MaterialShaderData>() as u64;
    assert_eq!(
        buffer_writes(&backend, data.buffer(0).handle()),
        vec![(start as u64 * stride, len as u64 * stride)]
    );
    data.destroy(&mut backend);
}

#[test]
fn test_clean_update_is_a_no_op() {
    let mut backend = DummyBackend::new();
    let mut data = materials(4);
    data.create(&mut backend).unwrap();
    let ticket = data.acquire_ticket().unwrap();
    data.set(ticket, material(0.5));
    assert!(data.update_buffer(&mut backend, 0).unwrap());
    backend.clear_ops();

    assert!(!data.update_buffer(&mut backend, 0).unwrap());
    assert!(data.dirty_range(0).is_empty());
    assert!(backend.ops().is_empty());
    data.destroy(&mut backend);
}

#[test]
fn test_release_zeroes_the_slot_on_the_gpu() {
    let mut backend = DummyBackend::new();
    let mut data = materials(4);
    data.create(&mut backend).unwrap();
    let ticket = data.acquire_ticket().unwrap();
    data.set(ticket, material(1.0));
    data.update_buffer(&mut backend, 0).unwrap();

    data.release_ticket(ticket);
    assert_eq!(data.live_count(), 0);
    assert!(data.update_buffer(&mut backend, 0).unwrap());

    let stride = size_of::<MaterialShaderData>();
    let bytes = backend.buffer_data(data.buffer(0).handle());
    assert!(bytes[ticket as usize * stride..(ticket as usize + 1) * stride]
        .iter()
        .all(|&b| b == 0));
    data.destroy(&mut backend);
}

#[test]
fn test_failed_upload_keeps_the_dirty_span() {
    let mut backend = DummyBackend::new();
    let mut data = materials(4);
    data.create(&mut backend).unwrap();
    let ticket = data.acquire_ticket().unwrap();
    *data.get_mut(ticket) = material(0.25);

    backend.fail_call(
        "write_buffer",
        0,
        render_core::BackendError::OutOfMemory,
    );
    assert!(data.update_buffer(&mut backend, 0).is_err());
    assert_eq!(data.dirty_range(0).range(), Some(1..2));

    assert!(data.update_buffer(&mut backend, 0).unwrap());
    assert!(data.dirty_range(0).is_empty());
    data.destroy(&mut backend);
}

#[test]
fn test_each_frame_buffer_receives_the_edit() {
    let mut backend = DummyBackend::new();
    let mut data = materials(4);
    data.create(&mut backend).unwrap();
    let ticket = data.acquire_ticket().unwrap();
    data.set(ticket, material(0.5));
    backend.clear_ops();

    assert!(data.update_buffer(&mut backend, 0).unwrap());
    assert!(buffer_writes(&backend, data.buffer(1).handle()).is_empty());
    assert_eq!(data.dirty_range(1).range(), Some(1..2));

    assert!(data.update_buffer(&mut backend, 1).unwrap());
    assert!(!data.update_buffer(&mut backend, 0).unwrap());
    let stride = size_of::<MaterialShaderData>();
    for frame in 0..2 {
        let bytes = backend.buffer_data(data.buffer(frame).handle());
        let uploaded: MaterialShaderData =
            bytemuck::pod_read_unaligned(&bytes[stride..2 * stride]);
        assert_eq!(uploaded, material(0.5));
    }
    data.destroy(&mut backend);
    assert_eq!(backend.live_buffer_count(), 0);
}

#[test]
fn test_globals_upload_only_touched_arrays() {
    init_logger();
    let mut backend = DummyBackend::new();
    let mut globals = ShaderGlobals::new(&test_config());
    globals.create(&mut backend).unwrap();
    backend.clear_ops();

    let light = globals.lights.acquire_ticket().unwrap();
    globals.lights.set(
        light,
        LightShaderData {
            position_intensity: Vec4::new(0.0, 2.0, 0.0, 10.0),
            ..bytemuck::Zeroable::zeroed()
        },
    );
    let material_ticket = globals.materials.acquire_ticket().unwrap();
    globals.materials.set(material_ticket, material(0.75));

    assert_eq!(globals.update_all(&mut backend, 0).unwrap(), 2);
    assert_eq!(
        backend.count_ops(|op| matches!(op, DummyOp::WriteBuffer { .. })),
        2
    );
    assert_eq!(globals.update_all(&mut backend, 0).unwrap(), 0);

    globals.destroy(&mut backend);
    assert_eq!(backend.live_buffer_count(), 0);
}
