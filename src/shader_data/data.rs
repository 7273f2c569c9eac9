use std::mem::size_of;

use bytemuck::Pod;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::backend::GpuBackend;
use crate::config::MAX_FRAMES_IN_FLIGHT;
use crate::descriptor::SubDescriptor;
use crate::error::RenderResult;
use crate::lifecycle::DeferredRelease;
use crate::memory::{BufferType, GpuBuffer};

use super::dirty::DirtyRange;
use super::ticket::{Ticket, TicketAllocator, NULL_TICKET};

struct Slots<T> {
    items: Vec<T>,
    // One span per frame in flight: an edit reaches every buffer, each on its
    // own frame.
    dirty: [DirtyRange; MAX_FRAMES_IN_FLIGHT],
}

impl<T> Slots<T> {
    fn mark(&mut self, index: usize) {
        for range in &mut self.dirty {
            range.mark(index);
        }
    }
}

/// A fixed-capacity array of shader structs mirrored into one host-visible
/// GPU buffer per frame in flight.
///
/// Every CPU-side object owning GPU-visible state holds a [`Ticket`] into one
/// of these arrays. Edits land in the CPU mirror and widen the dirty range of
/// every frame; [`ShaderData::update_buffer`] then copies exactly that range
/// into the buffer of the frame being recorded, so a buffer still read by the
/// other frame in flight is never written.
///
/// Ticket acquire/release may happen on any thread. Uploads are render-thread
/// only.
pub struct ShaderData<T: Pod> {
    name: &'static str,
    buffers: [GpuBuffer; MAX_FRAMES_IN_FLIGHT],
    tickets: TicketAllocator,
    slots: Mutex<Slots<T>>,
}

impl<T: Pod> ShaderData<T> {
    /// An array of `budget_bytes / size_of::<T>()` elements, slot 0 included.
    pub fn new(name: &'static str, ty: BufferType, budget_bytes: usize) -> Self {
        let capacity = budget_bytes / size_of::<T>();
        Self {
            name,
            buffers: std::array::from_fn(|frame| {
                GpuBuffer::new(ty).with_label(format!("{} (frame {})", name, frame))
            }),
            tickets: TicketAllocator::new(name, capacity),
            slots: Mutex::new(Slots {
                items: vec![T::zeroed(); capacity],
                dirty: [DirtyRange::new(); MAX_FRAMES_IN_FLIGHT],
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Element capacity, counting the reserved slot 0.
    pub fn capacity(&self) -> usize {
        self.tickets.capacity()
    }

    pub fn element_size(&self) -> usize {
        size_of::<T>()
    }

    /// Size of each per-frame buffer.
    pub fn byte_size(&self) -> u64 {
        (self.capacity() * size_of::<T>()) as u64
    }

    /// The buffer read by frame slot `frame_index`.
    pub fn buffer(&self, frame_index: usize) -> &GpuBuffer {
        &self.buffers[frame_index % MAX_FRAMES_IN_FLIGHT]
    }

    pub fn buffers(&self) -> &[GpuBuffer] {
        &self.buffers
    }

    pub fn is_created(&self) -> bool {
        self.buffers.iter().all(GpuBuffer::is_created)
    }

    pub fn live_count(&self) -> usize {
        self.tickets.live_count()
    }

    /// Create every per-frame buffer and upload the whole CPU mirror into
    /// each. Buffers created before a failure are destroyed.
    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        let byte_size = self.byte_size();
        let mut slots = self.slots.lock();
        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            let buffer = &mut self.buffers[frame];
            let result = buffer
                .create(backend, byte_size)
                .and_then(|_| buffer.copy(backend, bytemuck::cast_slice(&slots.items)));
            if let Err(err) = result {
                for buffer in self.buffers[..=frame].iter_mut() {
                    if buffer.is_created() {
                        buffer.destroy(backend);
                    }
                }
                return Err(err);
            }
        }
        slots.dirty = [DirtyRange::new(); MAX_FRAMES_IN_FLIGHT];
        log::debug!(
            "Created shader data '{}': {} x {} bytes, {} buffers",
            self.name,
            self.capacity(),
            size_of::<T>(),
            MAX_FRAMES_IN_FLIGHT
        );
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        for buffer in &mut self.buffers {
            buffer.destroy(backend);
        }
    }

    pub fn release(&mut self, deferred: &DeferredRelease) {
        for buffer in &mut self.buffers {
            buffer.release(deferred);
        }
    }

    pub fn acquire_ticket(&self) -> RenderResult<Ticket> {
        self.tickets.acquire()
    }

    /// Zero the slot, schedule the zeroes for upload and return the ticket to
    /// the free list. The null ticket is ignored.
    pub fn release_ticket(&self, ticket: Ticket) {
        if ticket == NULL_TICKET {
            return;
        }
        {
            let mut slots = self.slots.lock();
            let index = self.checked_index(&slots, ticket);
            slots.items[index] = T::zeroed();
            slots.mark(index);
        }
        self.tickets.release(ticket);
    }

    pub fn set(&self, ticket: Ticket, value: T) {
        let mut slots = self.slots.lock();
        let index = self.checked_index(&slots, ticket);
        slots.items[index] = value;
        slots.mark(index);
    }

    pub fn get(&self, ticket: Ticket) -> T {
        let slots = self.slots.lock();
        let index = self.checked_index(&slots, ticket);
        slots.items[index]
    }

    /// Borrow the slot for in-place edits. The slot is marked dirty.
    ///
    /// The array is locked while the guard lives.
    pub fn get_mut(&self, ticket: Ticket) -> MappedMutexGuard<'_, T> {
        let mut slots = self.slots.lock();
        let index = self.checked_index(&slots, ticket);
        slots.mark(index);
        MutexGuard::map(slots, |slots| &mut slots.items[index])
    }

    pub fn mark_dirty(&self, ticket: Ticket) {
        let mut slots = self.slots.lock();
        let index = self.checked_index(&slots, ticket);
        slots.mark(index);
    }

    /// Elements not yet uploaded to the buffer of `frame_index`.
    pub fn dirty_range(&self, frame_index: usize) -> DirtyRange {
        self.slots.lock().dirty[frame_index % MAX_FRAMES_IN_FLIGHT]
    }

    /// Copy the dirty range of `frame_index` into that frame's buffer in one
    /// write. Returns whether anything was copied. The range is kept when the
    /// write fails.
    ///
    /// Call once per frame after the slot's fence has been waited on.
    pub fn update_buffer(
        &self,
        backend: &mut dyn GpuBackend,
        frame_index: usize,
    ) -> RenderResult<bool> {
        crate::assert_render_thread!();
        let frame = frame_index % MAX_FRAMES_IN_FLIGHT;
        let mut slots = self.slots.lock();
        let Some(range) = slots.dirty[frame].range() else {
            return Ok(false);
        };
        let offset = (range.start * size_of::<T>()) as u64;
        self.buffers[frame].copy_at(
            backend,
            offset,
            bytemuck::cast_slice(&slots.items[range.clone()]),
        )?;
        log::trace!(
            "Uploaded '{}' elements {}..{} for frame {}",
            self.name,
            range.start,
            range.end,
            frame
        );
        slots.dirty[frame].reset();
        Ok(true)
    }

    /// A descriptor element covering the whole array of `frame_index`.
    pub fn sub_descriptor(&self, frame_index: usize) -> SubDescriptor {
        SubDescriptor::buffer(self.buffer(frame_index).handle(), 0, self.byte_size())
    }

    /// A descriptor element covering one element of `frame_index`'s array,
    /// to be indexed with [`ShaderData::dynamic_offset`].
    pub fn element_sub_descriptor(&self, frame_index: usize) -> SubDescriptor {
        SubDescriptor::buffer(
            self.buffer(frame_index).handle(),
            0,
            size_of::<T>() as u64,
        )
    }

    pub fn dynamic_offset(&self, ticket: Ticket) -> u32 {
        (ticket as usize * size_of::<T>()) as u32
    }

    fn checked_index(&self, slots: &Slots<T>, ticket: Ticket) -> usize {
        let index = ticket as usize;
        assert!(
            ticket != NULL_TICKET && index < slots.items.len(),
            "'{}' ticket {} out of range 1..{}",
            self.name,
            ticket,
            slots.items.len()
        );
        index
    }
}

impl<T: Pod> std::fmt::Debug for ShaderData<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderData")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("live", &self.live_count())
            .field("buffers", &self.buffers)
            .finish()
    }
}

/// Type-erased view of a [`ShaderData`] array, for code that walks every
/// array regardless of element type.
pub trait ShaderDataArray {
    fn name(&self) -> &'static str;

    fn is_created(&self) -> bool;

    fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()>;

    fn destroy(&mut self, backend: &mut dyn GpuBackend);

    fn update_buffer(&self, backend: &mut dyn GpuBackend, frame_index: usize)
        -> RenderResult<bool>;
}

impl<T: Pod> ShaderDataArray for ShaderData<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_created(&self) -> bool {
        ShaderData::is_created(self)
    }

    fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        ShaderData::create(self, backend)
    }

    fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        ShaderData::destroy(self, backend)
    }

    fn update_buffer(
        &self,
        backend: &mut dyn GpuBackend,
        frame_index: usize,
    ) -> RenderResult<bool> {
        ShaderData::update_buffer(self, backend, frame_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BufferHandle, DummyBackend, DummyOp};
    use bytemuck::Zeroable;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct Item {
        value: [f32; 4],
    }

    fn item(v: f32) -> Item {
        Item { value: [v; 4] }
    }

    fn created(backend: &mut DummyBackend) -> ShaderData<Item> {
        let mut data = ShaderData::new("items", BufferType::Storage, 16 * 64);
        data.create(backend).unwrap();
        backend.clear_ops();
        data
    }

    fn writes(backend: &DummyBackend) -> Vec<(BufferHandle, u64, u64)> {
        backend
            .ops()
            .iter()
            .filter_map(|op| match op {
                DummyOp::WriteBuffer { buffer, offset, size } => Some((*buffer, *offset, *size)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_capacity_from_budget() {
        let data: ShaderData<Item> = ShaderData::new("items", BufferType::Storage, 1000);
        assert_eq!(data.capacity(), 62);
        assert_eq!(data.byte_size(), 62 * 16);
        assert_eq!(data.buffers().len(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_create_uploads_mirror_per_frame() {
        let mut backend = DummyBackend::new();
        let mut data: ShaderData<Item> = ShaderData::new("items", BufferType::Storage, 16 * 64);
        data.create(&mut backend).unwrap();
        let handles: Vec<_> = data.buffers().iter().map(GpuBuffer::handle).collect();
        assert_ne!(handles[0], handles[1]);
        assert_eq!(
            writes(&backend),
            handles.iter().map(|&h| (h, 0, 16 * 64)).collect::<Vec<_>>()
        );
        data.destroy(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_update_copies_exact_union() {
        let mut backend = DummyBackend::new();
        let mut data = created(&mut backend);
        let a = data.acquire_ticket().unwrap();
        let _b = data.acquire_ticket().unwrap();
        let c = data.acquire_ticket().unwrap();
        data.set(c, item(3.0));
        data.set(a, item(1.0));

        assert!(data.update_buffer(&mut backend, 0).unwrap());
        // Elements 1..4 at 16 bytes each.
        assert_eq!(writes(&backend), vec![(data.buffer(0).handle(), 16, 48)]);
        assert!(data.dirty_range(0).is_empty());

        let bytes = backend.buffer_data(data.buffer(0).handle());
        let uploaded: &[Item] = bytemuck::cast_slice(&bytes[16..64]);
        assert_eq!(uploaded, &[item(1.0), item(0.0), item(3.0)]);

        data.destroy(&mut backend);
    }

    #[test]
    fn test_update_writes_only_its_frame_buffer() {
        let mut backend = DummyBackend::new();
        let mut data = created(&mut backend);
        let ticket = data.acquire_ticket().unwrap();
        data.set(ticket, item(4.0));

        assert!(data.update_buffer(&mut backend, 1).unwrap());
        assert_eq!(writes(&backend), vec![(data.buffer(1).handle(), 16, 16)]);
        let frame0 = backend.buffer_data(data.buffer(0).handle());
        assert!(frame0[16..32].iter().all(|&b| b == 0));
        assert_eq!(data.dirty_range(0).range(), Some(1..2));
        assert!(data.dirty_range(1).is_empty());

        backend.clear_ops();
        assert!(data.update_buffer(&mut backend, 0).unwrap());
        assert_eq!(writes(&backend), vec![(data.buffer(0).handle(), 16, 16)]);
        for buffer in data.buffers() {
            let bytes = backend.buffer_data(buffer.handle());
            let uploaded: &[Item] = bytemuck::cast_slice(&bytes[16..32]);
            assert_eq!(uploaded, &[item(4.0)]);
        }

        data.destroy(&mut backend);
    }

    #[test]
    fn test_second_update_is_noop() {
        let mut backend = DummyBackend::new();
        let mut data = created(&mut backend);
        let ticket = data.acquire_ticket().unwrap();
        data.set(ticket, item(2.0));
        assert!(data.update_buffer(&mut backend, 0).unwrap());
        assert!(!data.update_buffer(&mut backend, 0).unwrap());
        assert_eq!(writes(&backend).len(), 1);
        data.destroy(&mut backend);
    }

    #[test]
    fn test_release_zeroes_slot() {
        let mut backend = DummyBackend::new();
        let mut data = created(&mut backend);
        let ticket = data.acquire_ticket().unwrap();
        data.set(ticket, item(5.0));
        data.update_buffer(&mut backend, 0).unwrap();

        data.release_ticket(ticket);
        assert_eq!(data.get(ticket), Item::zeroed());
        assert_eq!(data.dirty_range(0).range(), Some(1..2));
        data.update_buffer(&mut backend, 0).unwrap();
        let bytes = backend.buffer_data(data.buffer(0).handle());
        assert!(bytes[16..32].iter().all(|&b| b == 0));
        assert_eq!(data.live_count(), 0);

        data.destroy(&mut backend);
    }

    #[test]
    fn test_get_mut_marks_dirty() {
        let mut backend = DummyBackend::new();
        let mut data = created(&mut backend);
        let ticket = data.acquire_ticket().unwrap();
        data.get_mut(ticket).value[2] = 7.0;
        for frame in 0..MAX_FRAMES_IN_FLIGHT {
            assert_eq!(data.dirty_range(frame).range(), Some(1..2));
        }
        assert_eq!(data.get(ticket).value, [0.0, 0.0, 7.0, 0.0]);
        data.destroy(&mut backend);
    }

    #[test]
    fn test_failed_write_keeps_range() {
        let mut backend = DummyBackend::new();
        let mut data = created(&mut backend);
        let ticket = data.acquire_ticket().unwrap();
        data.set(ticket, item(1.0));
        backend.fail_call("write_buffer", 0, BackendError::DeviceLost);
        assert!(data.update_buffer(&mut backend, 0).is_err());
        assert_eq!(data.dirty_range(0).range(), Some(1..2));
        assert!(data.update_buffer(&mut backend, 0).unwrap());
        data.destroy(&mut backend);
    }

    #[test]
    fn test_failed_create_destroys_earlier_frames() {
        let mut backend = DummyBackend::new();
        let mut data: ShaderData<Item> = ShaderData::new("items", BufferType::Storage, 256);
        backend.fail_call("create_buffer", 1, BackendError::OutOfMemory);
        assert!(data.create(&mut backend).is_err());
        assert!(!data.is_created());
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_null_ticket_set_panics() {
        let data: ShaderData<Item> = ShaderData::new("items", BufferType::Storage, 256);
        data.set(NULL_TICKET, item(1.0));
    }
}
