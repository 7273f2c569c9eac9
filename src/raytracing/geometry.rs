use std::mem::size_of;

use glam::Vec3;

use crate::backend::{AccelerationStructureGeometry, GpuBackend};
use crate::error::{RenderError, RenderResult};
use crate::lifecycle::DeferredRelease;
use crate::memory::{BufferType, GpuBuffer};

/// Indexed triangle geometry uploaded for acceleration structure builds.
#[derive(Debug)]
pub struct AccelerationGeometry {
    positions: Vec<Vec3>,
    indices: Vec<u32>,
    opaque: bool,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
}

impl AccelerationGeometry {
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            opaque: true,
            vertex_buffer: GpuBuffer::new(BufferType::Vertex).with_label("as vertices"),
            index_buffer: GpuBuffer::new(BufferType::Index).with_label("as indices"),
        }
    }

    pub fn with_opaque(mut self, opaque: bool) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn primitive_count(&self) -> u32 {
        self.index_count() / 3
    }

    pub fn is_created(&self) -> bool {
        self.vertex_buffer.is_created() && self.index_buffer.is_created()
    }

    pub fn vertex_buffer(&self) -> &GpuBuffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &GpuBuffer {
        &self.index_buffer
    }

    /// Upload vertices and indices into device-local buffers.
    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        if self.indices.is_empty() || self.indices.len() % 3 != 0 {
            return Err(RenderError::InvalidParameter(format!(
                "acceleration geometry needs a non-empty triangle list, got {} indices",
                self.indices.len()
            )));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= self.positions.len()) {
            return Err(RenderError::InvalidParameter(format!(
                "index {} out of range for {} vertices",
                bad,
                self.positions.len()
            )));
        }

        self.vertex_buffer
            .create_with_data(backend, bytemuck::cast_slice(&self.positions))?;
        if let Err(err) = self
            .index_buffer
            .create_with_data(backend, bytemuck::cast_slice(&self.indices))
        {
            self.vertex_buffer.destroy(backend);
            return Err(err);
        }
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        self.vertex_buffer.destroy(backend);
        self.index_buffer.destroy(backend);
    }

    pub fn release(&mut self, deferred: &DeferredRelease) {
        self.vertex_buffer.release(deferred);
        self.index_buffer.release(deferred);
    }

    pub fn vertex_address(&self, backend: &dyn GpuBackend) -> RenderResult<u64> {
        self.vertex_buffer.device_address(backend)
    }

    pub fn index_address(&self, backend: &dyn GpuBackend) -> RenderResult<u64> {
        self.index_buffer.device_address(backend)
    }

    pub fn build_geometry(&self, backend: &dyn GpuBackend) -> RenderResult<AccelerationStructureGeometry> {
        Ok(AccelerationStructureGeometry::Triangles {
            vertex_address: self.vertex_address(backend)?,
            vertex_stride: size_of::<Vec3>() as u64,
            max_vertex: self.vertex_count().saturating_sub(1),
            index_address: self.index_address(backend)?,
            primitive_count: self.primitive_count(),
            opaque: self.opaque,
        })
    }
}
