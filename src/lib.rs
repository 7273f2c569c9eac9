//! Render Core - GPU resource lifecycle and descriptor binding for a Vulkan renderer
//!
//! The crate keeps CPU-side scene data in sync with GPU buffers and images,
//! binds them through descriptor sets, and drives the frames-in-flight loop.
//!
//! # Features
//! - [`GpuBackend`] abstraction with a Vulkan implementation and a recording
//!   [`DummyBackend`] for headless tests
//! - Ticketed shader-data arrays with dirty-range uploads
//! - Descriptor pools with per-frame set copies, bindless sets and growth on
//!   exhaustion
//! - Frame slots with fence-gated reuse and swapchain recreation
//! - Deferred destruction and a dependency-ordered initialisation registry
//! - Bottom/top-level acceleration structures with refit support

pub mod backend;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod memory;
pub mod pipeline;
pub mod raytracing;
pub mod render_targets;
pub mod shader_data;
pub mod thread;

pub use backend::{BackendError, BackendResult, DummyBackend, GpuBackend};
#[cfg(feature = "vulkan")]
pub use backend::vulkan::VulkanBackend;
pub use config::{RenderConfig, ShaderDataBudgets, MAX_FRAMES_IN_FLIGHT};
pub use descriptor::{Descriptor, DescriptorPool, DescriptorSet, DescriptorSetIndex, SubDescriptor};
pub use error::{RenderError, RenderResult};
pub use frame::{FrameHandler, ResolutionDependent};
pub use lifecycle::{DeferredRelease, InitRegistry, PendingQueue};
pub use memory::{BufferType, GpuBuffer, GpuImage, ImageView, Sampler};
pub use shader_data::{ShaderData, ShaderDataArray, ShaderGlobals};
pub use thread::{bind_current_thread, ThreadRole};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the crate version. Call once after the logger is installed.
pub fn init() {
    log::info!("render-core v{}", VERSION);
}
