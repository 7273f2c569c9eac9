use std::sync::Arc;

use crate::backend::{CommandBufferHandle, Extent2d, GpuBackend, ImageHandle};
use crate::config::{RenderConfig, MAX_FRAMES_IN_FLIGHT};
use crate::error::{RenderError, RenderResult};
use crate::lifecycle::DeferredRelease;

use super::resolution::ResolutionDependent;
use super::slot::{Frame, FrameState};

/// Drives the acquire, record, submit and present cycle over
/// `MAX_FRAMES_IN_FLIGHT` round-robin frame slots.
///
/// ```text
/// prepare_frame -> begin_recording -> ... -> end_recording -> submit -> present -> next_frame
/// ```
///
/// `prepare_frame` and `present` report [`RenderError::SurfaceOutOfDate`]
/// separately from other failures; the caller then runs
/// [`recreate_swapchain`](Self::recreate_swapchain) and starts over.
pub struct FrameHandler {
    frames: Vec<Frame>,
    current: usize,
    acquired_image: Option<u32>,
    suboptimal: bool,
    frame_count: u64,
    fence_timeout_ns: u64,
    deferred: Arc<DeferredRelease>,
}

impl FrameHandler {
    pub fn new(config: &RenderConfig, deferred: Arc<DeferredRelease>) -> Self {
        Self {
            frames: (0..MAX_FRAMES_IN_FLIGHT).map(Frame::new).collect(),
            current: 0,
            acquired_image: None,
            suboptimal: false,
            frame_count: 0,
            fence_timeout_ns: config.fence_timeout_ns,
            deferred,
        }
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        for index in 0..self.frames.len() {
            if let Err(err) = self.frames[index].create(backend, &self.deferred) {
                for frame in &mut self.frames[..index] {
                    frame.destroy(backend);
                }
                return Err(err);
            }
        }
        log::debug!("Created {} frames in flight", self.frames.len());
        Ok(())
    }

    /// Wait for every slot, then destroy them.
    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        crate::assert_render_thread!();
        for frame in &mut self.frames {
            if frame.state() == FrameState::Submitted {
                if let Err(err) = frame.wait(backend, self.fence_timeout_ns) {
                    log::error!("Waiting on frame {} during teardown: {}", frame.index(), err);
                }
            }
            frame.destroy(backend);
        }
    }

    pub fn deferred(&self) -> &Arc<DeferredRelease> {
        &self.deferred
    }

    /// Index of the current frame slot, in `0..MAX_FRAMES_IN_FLIGHT`.
    pub fn current_frame_index(&self) -> usize {
        self.current
    }

    pub fn current_frame(&self) -> &Frame {
        &self.frames[self.current]
    }

    pub fn current_frame_mut(&mut self) -> &mut Frame {
        &mut self.frames[self.current]
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn acquired_image_index(&self) -> Option<u32> {
        self.acquired_image
    }

    /// The swapchain image acquired by the last `prepare_frame`.
    pub fn acquired_image(&self, backend: &dyn GpuBackend) -> Option<ImageHandle> {
        self.acquired_image.map(|index| backend.swapchain_image(index))
    }

    /// Whether the last acquire reported a suboptimal swapchain.
    pub fn is_suboptimal(&self) -> bool {
        self.suboptimal
    }

    /// Wait for the current slot's previous submission, acquire the next
    /// swapchain image and retire deferred releases.
    ///
    /// The fence is reset and deferred releases advance only after a
    /// successful acquire, so an out-of-date surface leaves the slot ready to
    /// be prepared again without retiring anything twice.
    pub fn prepare_frame(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<u32> {
        crate::assert_render_thread!();
        let timeout = self.fence_timeout_ns;
        let frame = &mut self.frames[self.current];
        frame.wait(backend, timeout)?;

        let acquire_semaphore = match frame.present_semaphores().wait_semaphores().first() {
            Some((semaphore, _)) => semaphore.handle(),
            None => return Err(RenderError::NotCreated("frame semaphores")),
        };
        let acquired = backend
            .acquire_next_image(acquire_semaphore)
            .map_err(RenderError::from)?;
        if acquired.suboptimal {
            log::debug!("Swapchain is suboptimal");
        }
        frame.fence().reset(backend)?;
        self.deferred.advance_frame(backend);

        self.acquired_image = Some(acquired.index);
        self.suboptimal = acquired.suboptimal;
        Ok(acquired.index)
    }

    pub fn begin_recording(
        &mut self,
        backend: &mut dyn GpuBackend,
    ) -> RenderResult<CommandBufferHandle> {
        self.frames[self.current].begin_capture(backend)
    }

    pub fn end_recording(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        self.frames[self.current].end_capture(backend)
    }

    pub fn submit(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        self.frames[self.current].submit(backend)
    }

    pub fn present(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        let Some(index) = self.acquired_image.take() else {
            panic!("present without an acquired swapchain image");
        };
        let waits = self.frames[self.current]
            .present_semaphores()
            .signal_handles();
        backend.present(index, &waits)?;
        self.frame_count += 1;
        Ok(())
    }

    /// Move on to the next frame slot.
    pub fn next_frame(&mut self) {
        self.current = (self.current + 1) % self.frames.len();
    }

    /// Rebuild the swapchain at `extent` and every resolution-dependent
    /// resource with it.
    ///
    /// Waits for the device to go idle, so nothing submitted before the call
    /// can still reference the old resources when they are destroyed.
    pub fn recreate_swapchain(
        &mut self,
        backend: &mut dyn GpuBackend,
        extent: Extent2d,
        dependents: &mut [&mut dyn ResolutionDependent],
    ) -> RenderResult<()> {
        crate::assert_render_thread!();
        log::info!(
            "Recreating swapchain at {}x{}",
            extent.width,
            extent.height
        );
        self.deferred.flush(backend)?;
        for frame in &mut self.frames {
            if frame.state() == FrameState::Submitted {
                frame.wait(backend, self.fence_timeout_ns)?;
            }
        }
        self.acquired_image = None;
        self.suboptimal = false;

        backend.recreate_swapchain(extent)?;
        for dependent in dependents.iter_mut() {
            dependent.on_resolution_changed(backend, &self.deferred, extent)?;
        }
        self.deferred.flush(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendError, BufferDesc, BufferUsage, DummyBackend, DummyOp, MemoryLocation,
    };
    use crate::lifecycle::ReleasedObject;

    fn handler(backend: &mut DummyBackend) -> FrameHandler {
        let mut handler = FrameHandler::new(
            &RenderConfig::default(),
            Arc::new(DeferredRelease::new()),
        );
        handler.create(backend).unwrap();
        handler
    }

    fn run_frame(handler: &mut FrameHandler, backend: &mut DummyBackend) -> RenderResult<()> {
        handler.prepare_frame(backend)?;
        handler.begin_recording(backend)?;
        handler.end_recording(backend)?;
        handler.submit(backend)?;
        handler.present(backend)?;
        handler.next_frame();
        Ok(())
    }

    #[test]
    fn test_frames_cycle_round_robin() {
        let mut backend = DummyBackend::new();
        let mut handler = handler(&mut backend);
        for i in 0..5 {
            assert_eq!(handler.current_frame_index(), i % MAX_FRAMES_IN_FLIGHT);
            run_frame(&mut handler, &mut backend).unwrap();
        }
        assert_eq!(handler.frame_count(), 5);
        assert_eq!(
            backend.count_ops(|op| matches!(op, DummyOp::Present(_))),
            5
        );
        handler.destroy(&mut backend);
        handler.deferred().flush(&mut backend).unwrap();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_out_of_date_is_reported_and_recoverable() {
        let mut backend = DummyBackend::new();
        let mut handler = handler(&mut backend);
        run_frame(&mut handler, &mut backend).unwrap();

        backend.force_out_of_date();
        let err = handler.prepare_frame(&mut backend).unwrap_err();
        assert_eq!(err, RenderError::SurfaceOutOfDate);

        handler
            .recreate_swapchain(&mut backend, Extent2d::new(640, 480), &mut [])
            .unwrap();
        assert_eq!(backend.swapchain_extent(), Extent2d::new(640, 480));
        run_frame(&mut handler, &mut backend).unwrap();
        handler.destroy(&mut backend);
    }

    #[test]
    fn test_device_loss_is_not_out_of_date() {
        let mut backend = DummyBackend::new();
        let mut handler = handler(&mut backend);
        backend.fail_call("acquire_next_image", 0, BackendError::DeviceLost);
        let err = handler.prepare_frame(&mut backend).unwrap_err();
        assert_eq!(err, RenderError::Backend(BackendError::DeviceLost));
        handler.destroy(&mut backend);
    }

    #[test]
    fn test_failed_acquire_does_not_retire_in_flight_releases() {
        let mut backend = DummyBackend::new();
        let mut handler = handler(&mut backend);
        run_frame(&mut handler, &mut backend).unwrap();

        // Frame slot 1 releases a buffer while it records, then stays in flight.
        handler.prepare_frame(&mut backend).unwrap();
        handler.begin_recording(&mut backend).unwrap();
        let buffer = backend
            .create_buffer(&BufferDesc::new(
                64,
                BufferUsage::STORAGE,
                MemoryLocation::CpuToGpu,
            ))
            .unwrap();
        handler
            .deferred()
            .release(ReleasedObject::Buffer(buffer));
        handler.end_recording(&mut backend).unwrap();
        handler.submit(&mut backend).unwrap();
        handler.present(&mut backend).unwrap();
        handler.next_frame();

        backend.force_out_of_date();
        for _ in 0..2 {
            let err = handler.prepare_frame(&mut backend).unwrap_err();
            assert_eq!(err, RenderError::SurfaceOutOfDate);
        }
        assert_eq!(handler.frames[1].state(), FrameState::Submitted);
        assert!(backend.is_live(buffer.raw()));

        handler
            .recreate_swapchain(&mut backend, Extent2d::new(640, 480), &mut [])
            .unwrap();
        assert!(!backend.is_live(buffer.raw()));
        handler.destroy(&mut backend);
    }
}
