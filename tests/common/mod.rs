//! Shared setup for the integration tests.
//!
//! Everything runs against [`DummyBackend`], which records every backend call
//! so tests can assert on exactly what reached the driver.

#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;
use render_core::backend::{DummyBackend, DummyOp};
use render_core::config::{RenderConfig, ShaderDataBudgets};
use render_core::lifecycle::DeferredRelease;
use render_core::raytracing::AccelerationGeometry;
use render_core::FrameHandler;

/// Route `log` output through the test harness. Safe to call from every test.
pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

/// Default config with shader-data budgets small enough for tests.
pub fn test_config() -> RenderConfig {
    RenderConfig::default().with_shader_data_budgets(ShaderDataBudgets::small())
}

/// A created frame handler with its own deferred-release queue.
pub fn frame_handler(backend: &mut DummyBackend, config: &RenderConfig) -> FrameHandler {
    let mut handler = FrameHandler::new(config, Arc::new(DeferredRelease::new()));
    handler
        .create(backend)
        .expect("frame handler creation should succeed");
    handler
}

/// Byte writes into `buffer` as `(offset, size)` pairs, in call order.
pub fn buffer_writes(
    backend: &DummyBackend,
    buffer: render_core::backend::BufferHandle,
) -> Vec<(u64, u64)> {
    backend
        .ops()
        .iter()
        .filter_map(|op| match op {
            DummyOp::WriteBuffer {
                buffer: written,
                offset,
                size,
            } if *written == buffer => Some((*offset, *size)),
            _ => None,
        })
        .collect()
}

/// Single triangle offset along x so geometries are distinguishable.
pub fn triangle(offset: f32) -> AccelerationGeometry {
    let base = Vec3::new(offset, 0.0, 0.0);
    AccelerationGeometry::new(vec![base, base + Vec3::X, base + Vec3::Y], vec![0, 1, 2])
}
