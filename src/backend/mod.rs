//! Backend abstraction layer
//!
//! Provides the [`GpuBackend`] trait with the Vulkan implementation and a
//! recording dummy implementation for tests and headless tools.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use dummy::{DummyBackend, DummyOp};
pub use traits::*;
pub use types::*;
