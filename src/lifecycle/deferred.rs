//! Deferred release of GPU objects.
//!
//! GPU commands run one to `MAX_FRAMES_IN_FLIGHT` frames behind the CPU, so an
//! object dropped by its owner may still be referenced by submitted work.
//! Released handles are parked in the queue of the frame they were released
//! in and only destroyed once that frame's fence has been waited on again.
//!
//! ```text
//! frame f      release(x)  -> queue[f % N]
//! frame f + N  advance_frame: fence of frame f waited, queue[f % N] destroyed
//! ```
//!
//! [`DeferredRelease::flush`] is the "flush render queue" barrier: it waits for
//! the device to go idle and destroys everything immediately. Swapchain
//! recreation and teardown go through it.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::backend::{
    AccelerationStructureHandle, BufferHandle, CommandBufferHandle, DescriptorPoolHandle,
    DescriptorSetLayoutHandle, FenceHandle, GpuBackend, ImageHandle, ImageViewHandle,
    PipelineHandle, PipelineLayoutHandle, SamplerHandle, SemaphoreHandle,
};
use crate::config::MAX_FRAMES_IN_FLIGHT;
use crate::error::RenderResult;

/// A GPU object waiting for destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasedObject {
    Buffer(BufferHandle),
    Image(ImageHandle),
    ImageView(ImageViewHandle),
    Sampler(SamplerHandle),
    DescriptorSetLayout(DescriptorSetLayoutHandle),
    DescriptorPool(DescriptorPoolHandle),
    PipelineLayout(PipelineLayoutHandle),
    Pipeline(PipelineHandle),
    CommandBuffer(CommandBufferHandle),
    Fence(FenceHandle),
    Semaphore(SemaphoreHandle),
    AccelerationStructure(AccelerationStructureHandle),
}

impl ReleasedObject {
    /// Destroy the object immediately.
    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        match self {
            ReleasedObject::Buffer(h) => backend.destroy_buffer(h),
            ReleasedObject::Image(h) => backend.destroy_image(h),
            ReleasedObject::ImageView(h) => backend.destroy_image_view(h),
            ReleasedObject::Sampler(h) => backend.destroy_sampler(h),
            ReleasedObject::DescriptorSetLayout(h) => backend.destroy_descriptor_set_layout(h),
            ReleasedObject::DescriptorPool(h) => backend.destroy_descriptor_pool(h),
            ReleasedObject::PipelineLayout(h) => backend.destroy_pipeline_layout(h),
            ReleasedObject::Pipeline(h) => backend.destroy_pipeline(h),
            ReleasedObject::CommandBuffer(h) => backend.free_command_buffer(h),
            ReleasedObject::Fence(h) => backend.destroy_fence(h),
            ReleasedObject::Semaphore(h) => backend.destroy_semaphore(h),
            ReleasedObject::AccelerationStructure(h) => {
                backend.destroy_acceleration_structure(h)
            }
        }
    }
}

/// Frame-indexed queues of objects pending destruction.
///
/// Enqueueing is thread safe; destruction happens on the render thread.
pub struct DeferredRelease {
    frame_queues: [Mutex<Vec<ReleasedObject>>; MAX_FRAMES_IN_FLIGHT],
    current_frame: AtomicUsize,
}

impl std::fmt::Debug for DeferredRelease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredRelease")
            .field("current_frame", &self.current_frame.load(Ordering::Relaxed))
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

impl DeferredRelease {
    pub fn new() -> Self {
        Self {
            frame_queues: Default::default(),
            current_frame: AtomicUsize::new(0),
        }
    }

    /// Queue an object for destruction once the current frame has retired.
    pub fn release(&self, object: ReleasedObject) {
        let frame = self.current_frame.load(Ordering::Acquire);
        self.frame_queues[frame % MAX_FRAMES_IN_FLIGHT]
            .lock()
            .push(object);
    }

    /// Queue several objects at once.
    pub fn release_all(&self, objects: impl IntoIterator<Item = ReleasedObject>) {
        let frame = self.current_frame.load(Ordering::Acquire);
        self.frame_queues[frame % MAX_FRAMES_IN_FLIGHT]
            .lock()
            .extend(objects);
    }

    /// Enter the next frame, destroying objects released `MAX_FRAMES_IN_FLIGHT`
    /// frames ago.
    ///
    /// Must be called after the fence of the frame slot being reused has been
    /// waited on.
    pub fn advance_frame(&self, backend: &mut dyn GpuBackend) {
        crate::assert_render_thread!();
        let next = self.current_frame.fetch_add(1, Ordering::AcqRel) + 1;
        let retired: Vec<_> = self.frame_queues[next % MAX_FRAMES_IN_FLIGHT]
            .lock()
            .drain(..)
            .collect();
        if !retired.is_empty() {
            log::trace!(
                "DeferredRelease: destroying {} objects at frame {}",
                retired.len(),
                next
            );
        }
        for object in retired {
            object.destroy(backend);
        }
    }

    /// Wait for the device to go idle and destroy every pending object.
    pub fn flush(&self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        backend.wait_idle()?;
        let mut total = 0;
        for queue in &self.frame_queues {
            let objects: Vec<_> = queue.lock().drain(..).collect();
            total += objects.len();
            for object in objects {
                object.destroy(backend);
            }
        }
        if total > 0 {
            log::debug!("DeferredRelease: flushed {} objects", total);
        }
        Ok(())
    }

    /// Number of objects currently pending destruction.
    pub fn pending_count(&self) -> usize {
        self.frame_queues.iter().map(|q| q.lock().len()).sum()
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame.load(Ordering::Relaxed)
    }
}

impl Default for DeferredRelease {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferDesc, BufferUsage, DummyBackend, MemoryLocation};

    fn buffer(backend: &mut DummyBackend) -> BufferHandle {
        backend
            .create_buffer(&BufferDesc::new(
                64,
                BufferUsage::UNIFORM,
                MemoryLocation::CpuToGpu,
            ))
            .unwrap()
    }

    #[test]
    fn test_release_waits_for_frames_in_flight() {
        let mut backend = DummyBackend::new();
        let release = DeferredRelease::new();
        let handle = buffer(&mut backend);

        release.release(ReleasedObject::Buffer(handle));
        for _ in 0..MAX_FRAMES_IN_FLIGHT - 1 {
            release.advance_frame(&mut backend);
            assert!(backend.is_live(handle.raw()));
        }
        release.advance_frame(&mut backend);
        assert!(!backend.is_live(handle.raw()));
        assert_eq!(release.pending_count(), 0);
    }

    #[test]
    fn test_flush_destroys_everything() {
        let mut backend = DummyBackend::new();
        let release = DeferredRelease::new();
        let a = buffer(&mut backend);
        let b = buffer(&mut backend);

        release.release(ReleasedObject::Buffer(a));
        release.advance_frame(&mut backend);
        release.release(ReleasedObject::Buffer(b));
        assert_eq!(release.pending_count(), 2);

        release.flush(&mut backend).unwrap();
        assert_eq!(release.pending_count(), 0);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_frame_cycling() {
        let mut backend = DummyBackend::new();
        let release = DeferredRelease::new();
        for i in 0..MAX_FRAMES_IN_FLIGHT * 2 {
            release.advance_frame(&mut backend);
            assert_eq!(release.current_frame(), i + 1);
        }
    }
}
