use crate::backend::{Extent2d, GpuBackend};
use crate::error::RenderResult;
use crate::lifecycle::DeferredRelease;

/// A component whose GPU resources are sized by the swapchain.
///
/// Called by [`FrameHandler::recreate_swapchain`](super::FrameHandler::recreate_swapchain)
/// after the device has gone idle and the swapchain has been rebuilt. The
/// implementation releases everything tied to the old extent and recreates it
/// at `extent`.
pub trait ResolutionDependent {
    fn on_resolution_changed(
        &mut self,
        backend: &mut dyn GpuBackend,
        deferred: &DeferredRelease,
        extent: Extent2d,
    ) -> RenderResult<()>;
}
