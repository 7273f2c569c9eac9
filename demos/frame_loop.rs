//! Minimal frame loop on the Vulkan backend.
//!
//! Clears the swapchain image to a slowly cycling color using nothing but
//! barriers and a clear, and rebuilds the swapchain when the window is
//! resized or the surface goes out of date.
//!
//! ```bash
//! RUST_LOG=debug cargo run --example frame_loop
//! ```

use std::sync::Arc;
use std::time::Instant;

use render_core::backend::{
    Extent2d, GpuBackend, ImageAspect, ImageBarrier, ResourceState, SubresourceRange,
};
use render_core::{
    bind_current_thread, DeferredRelease, FrameHandler, RenderConfig, RenderError, RenderResult,
    ThreadRole, VulkanBackend,
};
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::{Window, WindowBuilder},
};

struct FrameLoop {
    // Dropped before the window: the surface must not outlive it.
    backend: VulkanBackend,
    frames: FrameHandler,
    extent: Extent2d,
    resize_pending: bool,
    started: Instant,
    window: Arc<Window>,
}

impl FrameLoop {
    fn new(window: Arc<Window>, config: &RenderConfig) -> RenderResult<Self> {
        let size = window.inner_size();
        let extent = Extent2d::new(size.width, size.height);
        let mut backend = VulkanBackend::new(window.as_ref(), extent, config)?;
        log::info!(
            "Running on {} ({} swapchain images)",
            backend.capabilities().device_name,
            backend.swapchain_image_count()
        );

        let mut frames = FrameHandler::new(config, Arc::new(DeferredRelease::new()));
        frames.create(&mut backend)?;
        Ok(Self {
            backend,
            frames,
            extent,
            resize_pending: false,
            started: Instant::now(),
            window,
        })
    }

    fn resized(&mut self, size: PhysicalSize<u32>) {
        self.extent = Extent2d::new(size.width, size.height);
        self.resize_pending = true;
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        self.frames
            .recreate_swapchain(&mut self.backend, self.extent, &mut [])?;
        self.resize_pending = false;
        Ok(())
    }

    /// Render one frame. A minimized window or an out-of-date surface skips
    /// the frame and schedules a swapchain rebuild.
    fn render(&mut self) -> RenderResult<()> {
        if self.extent.width == 0 || self.extent.height == 0 {
            return Ok(());
        }
        if self.resize_pending {
            self.recreate_swapchain()?;
        }

        match self.frames.prepare_frame(&mut self.backend) {
            Ok(_) => {}
            Err(RenderError::SurfaceOutOfDate) => {
                self.resize_pending = true;
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        let Some(image) = self.frames.acquired_image(&self.backend) else {
            return Ok(());
        };

        let cmd = self.frames.begin_recording(&mut self.backend)?;
        let range = SubresourceRange::single(ImageAspect::COLOR, 0, 0);
        self.backend.cmd_pipeline_barrier(
            cmd,
            &[],
            &[ImageBarrier {
                image,
                old_state: ResourceState::Undefined,
                new_state: ResourceState::CopyDst,
                range,
            }],
        );
        self.backend
            .cmd_clear_color_image(cmd, image, self.clear_color(), &range);
        self.backend.cmd_pipeline_barrier(
            cmd,
            &[],
            &[ImageBarrier {
                image,
                old_state: ResourceState::CopyDst,
                new_state: ResourceState::Present,
                range,
            }],
        );
        self.frames.end_recording(&mut self.backend)?;
        self.frames.submit(&mut self.backend)?;

        let presented = self.frames.present(&mut self.backend);
        self.frames.next_frame();
        match presented {
            Ok(()) => {
                if self.frames.is_suboptimal() {
                    self.resize_pending = true;
                }
                Ok(())
            }
            Err(RenderError::SurfaceOutOfDate) => {
                self.resize_pending = true;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn clear_color(&self) -> [f32; 4] {
        let t = self.started.elapsed().as_secs_f32();
        [
            0.5 + 0.5 * t.sin(),
            0.5 + 0.5 * (t + 2.1).sin(),
            0.5 + 0.5 * (t + 4.2).sin(),
            1.0,
        ]
    }

    fn shutdown(mut self) {
        if let Err(err) = self.backend.wait_idle() {
            log::error!("wait_idle during shutdown: {}", err);
        }
        self.frames.destroy(&mut self.backend);
        if let Err(err) = self.frames.deferred().flush(&mut self.backend) {
            log::error!("Flushing deferred releases: {}", err);
        }
        log::info!("Presented {} frames", self.frames.frame_count());
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    render_core::init();
    bind_current_thread(ThreadRole::Render);

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("render-core frame loop")
            .with_inner_size(PhysicalSize::new(1280, 720))
            .build(&event_loop)
            .expect("Failed to create window"),
    );

    let config = RenderConfig::default().with_app_name("frame_loop");
    let mut state = match FrameLoop::new(Arc::clone(&window), &config) {
        Ok(state) => Some(state),
        Err(err) => {
            log::error!("Failed to initialize renderer: {}", err);
            return;
        }
    };

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);
            let Some(frame_loop) = state.as_mut() else {
                return;
            };

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        if let Some(frame_loop) = state.take() {
                            frame_loop.shutdown();
                        }
                        elwt.exit();
                    }
                    WindowEvent::Resized(size) => frame_loop.resized(size),
                    WindowEvent::RedrawRequested => {
                        if let Err(err) = frame_loop.render() {
                            log::error!("Frame failed: {}", err);
                            if let Some(frame_loop) = state.take() {
                                frame_loop.shutdown();
                            }
                            elwt.exit();
                        }
                    }
                    _ => {}
                },
                Event::AboutToWait => frame_loop.window.request_redraw(),
                _ => {}
            }
        })
        .expect("Event loop failed");
}
