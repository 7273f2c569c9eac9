//! Ray tracing acceleration structures.
//!
//! [`Blas`] wraps triangle geometry; [`Tlas`] owns the BLASes, the instance
//! buffer and the mesh descriptions that hit shaders index into.

mod blas;
mod build;
mod geometry;
mod instance;
mod tlas;

pub use blas::Blas;
pub use geometry::AccelerationGeometry;
pub use instance::{AccelerationInstance, MeshDescription, INSTANCE_FLAG_TRIANGLE_FACING_CULL_DISABLE};
pub use tlas::{BlasId, Tlas};
