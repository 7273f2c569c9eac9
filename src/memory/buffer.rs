//! Typed GPU buffers.

use crate::backend::{
    BufferBarrier, BufferCopy, BufferDesc, BufferHandle, BufferUsage, CommandBufferHandle,
    GpuBackend, MemoryLocation, ResourceState,
};
use crate::error::{RenderError, RenderResult};
use crate::frame::SingleTimeCommands;
use crate::lifecycle::{DeferredRelease, ReleasedObject};

/// What a buffer is used for. Determines usage flags and memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Vertex,
    Index,
    Uniform,
    Storage,
    Staging,
    Indirect,
    ShaderBindingTable,
    /// Backing storage of an acceleration structure.
    AccelerationStructure,
    /// Instance records consumed by a top-level build.
    AccelerationStructureInstance,
    /// Per-geometry vertex/index addresses read by hit shaders.
    MeshDescription,
    /// Scratch memory for acceleration structure builds.
    Scratch,
}

impl BufferType {
    pub fn usage(self) -> BufferUsage {
        match self {
            BufferType::Vertex => {
                BufferUsage::VERTEX
                    | BufferUsage::STORAGE
                    | BufferUsage::TRANSFER_DST
                    | BufferUsage::SHADER_DEVICE_ADDRESS
                    | BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT
            }
            BufferType::Index => {
                BufferUsage::INDEX
                    | BufferUsage::STORAGE
                    | BufferUsage::TRANSFER_DST
                    | BufferUsage::SHADER_DEVICE_ADDRESS
                    | BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT
            }
            BufferType::Uniform => BufferUsage::UNIFORM,
            BufferType::Storage => {
                BufferUsage::STORAGE | BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST
            }
            BufferType::Staging => BufferUsage::TRANSFER_SRC,
            BufferType::Indirect => {
                BufferUsage::INDIRECT | BufferUsage::STORAGE | BufferUsage::TRANSFER_DST
            }
            BufferType::ShaderBindingTable => {
                BufferUsage::SHADER_BINDING_TABLE | BufferUsage::SHADER_DEVICE_ADDRESS
            }
            BufferType::AccelerationStructure => {
                BufferUsage::ACCELERATION_STRUCTURE_STORAGE | BufferUsage::SHADER_DEVICE_ADDRESS
            }
            BufferType::AccelerationStructureInstance => {
                BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT
                    | BufferUsage::SHADER_DEVICE_ADDRESS
            }
            BufferType::MeshDescription => {
                BufferUsage::STORAGE | BufferUsage::SHADER_DEVICE_ADDRESS
            }
            BufferType::Scratch => BufferUsage::STORAGE | BufferUsage::SHADER_DEVICE_ADDRESS,
        }
    }

    pub fn location(self) -> MemoryLocation {
        match self {
            BufferType::Vertex
            | BufferType::Index
            | BufferType::Indirect
            | BufferType::AccelerationStructure
            | BufferType::Scratch => MemoryLocation::GpuOnly,
            BufferType::Uniform
            | BufferType::Storage
            | BufferType::Staging
            | BufferType::ShaderBindingTable
            | BufferType::AccelerationStructureInstance
            | BufferType::MeshDescription => MemoryLocation::CpuToGpu,
        }
    }

    /// State a freshly created buffer of this type is treated as being in.
    pub fn initial_state(self) -> ResourceState {
        match self {
            BufferType::Staging => ResourceState::CopySrc,
            BufferType::AccelerationStructure => ResourceState::AccelerationStructureRead,
            _ => ResourceState::Undefined,
        }
    }
}

/// A buffer allocation with its tracked resource state.
///
/// Created with [`GpuBuffer::create`] and destroyed exactly once with
/// [`GpuBuffer::destroy`] or [`GpuBuffer::release`]. Host-visible buffers are
/// persistently mapped by the backend, so writes go straight through
/// [`GpuBuffer::copy`].
#[derive(Debug)]
pub struct GpuBuffer {
    ty: BufferType,
    label: String,
    handle: Option<BufferHandle>,
    size: u64,
    state: ResourceState,
}

impl GpuBuffer {
    pub fn new(ty: BufferType) -> Self {
        Self {
            ty,
            label: String::new(),
            handle: None,
            size: 0,
            state: ResourceState::Undefined,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn buffer_type(&self) -> BufferType {
        self.ty
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_created(&self) -> bool {
        self.handle.is_some()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// The backend handle. Panics if the buffer has not been created.
    pub fn handle(&self) -> BufferHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("buffer '{}' used before create", self.label),
        }
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend, size: u64) -> RenderResult<()> {
        crate::assert_render_thread!();
        assert!(
            self.handle.is_none(),
            "buffer '{}' created twice",
            self.label
        );
        if size == 0 {
            return Err(RenderError::InvalidParameter(format!(
                "buffer '{}' with zero size",
                self.label
            )));
        }
        let desc = BufferDesc::new(size, self.ty.usage(), self.ty.location())
            .with_label(self.label.clone());
        let handle = backend.create_buffer(&desc)?;
        log::trace!(
            "Created {:?} buffer '{}' ({} bytes)",
            self.ty,
            self.label,
            size
        );
        self.handle = Some(handle);
        self.size = size;
        self.state = self.ty.initial_state();
        Ok(())
    }

    /// Create the buffer and fill it with `data`, through a staging copy when
    /// the buffer is not host visible.
    pub fn create_with_data(
        &mut self,
        backend: &mut dyn GpuBackend,
        data: &[u8],
    ) -> RenderResult<()> {
        self.create(backend, data.len() as u64)?;
        if let Err(err) = self.upload(backend, 0, data) {
            self.destroy(backend);
            return Err(err);
        }
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        crate::assert_render_thread!();
        let Some(handle) = self.handle.take() else {
            panic!("buffer '{}' destroyed before create or twice", self.label);
        };
        backend.destroy_buffer(handle);
        self.size = 0;
        self.state = ResourceState::Undefined;
    }

    /// Hand the buffer to the deferred release queue instead of destroying it
    /// while frames in flight may still read it.
    pub fn release(&mut self, deferred: &DeferredRelease) {
        let Some(handle) = self.handle.take() else {
            panic!("buffer '{}' released before create or twice", self.label);
        };
        deferred.release(ReleasedObject::Buffer(handle));
        self.size = 0;
        self.state = ResourceState::Undefined;
    }

    /// Make sure the buffer holds at least `size` bytes, recreating it if not.
    /// The old allocation goes through `deferred` when given. Returns whether
    /// the buffer was recreated (and its contents lost).
    pub fn ensure_capacity(
        &mut self,
        backend: &mut dyn GpuBackend,
        deferred: Option<&DeferredRelease>,
        size: u64,
    ) -> RenderResult<bool> {
        if self.is_created() && self.size >= size {
            return Ok(false);
        }
        if self.is_created() {
            match deferred {
                Some(deferred) => self.release(deferred),
                None => self.destroy(backend),
            }
        }
        self.create(backend, size)?;
        Ok(true)
    }

    /// Copy `data` to the start of a host-visible buffer.
    pub fn copy(&self, backend: &mut dyn GpuBackend, data: &[u8]) -> RenderResult<()> {
        self.copy_at(backend, 0, data)
    }

    /// Copy `data` into a host-visible buffer at `offset`.
    pub fn copy_at(
        &self,
        backend: &mut dyn GpuBackend,
        offset: u64,
        data: &[u8],
    ) -> RenderResult<()> {
        assert!(
            offset + data.len() as u64 <= self.size,
            "copy of {} bytes at {} overruns buffer '{}' ({} bytes)",
            data.len(),
            offset,
            self.label,
            self.size
        );
        backend.write_buffer(self.handle(), offset, data)?;
        Ok(())
    }

    /// Read back from a host-visible buffer.
    pub fn read(
        &self,
        backend: &mut dyn GpuBackend,
        offset: u64,
        out: &mut [u8],
    ) -> RenderResult<()> {
        assert!(
            offset + out.len() as u64 <= self.size,
            "read past the end of buffer '{}'",
            self.label
        );
        backend.read_buffer(self.handle(), offset, out)?;
        Ok(())
    }

    /// Write `data` at `offset` whatever the memory location: directly for
    /// host-visible buffers, through a blocking staging copy otherwise.
    pub fn upload(
        &mut self,
        backend: &mut dyn GpuBackend,
        offset: u64,
        data: &[u8],
    ) -> RenderResult<()> {
        if self.ty.location().is_host_visible() {
            return self.copy_at(backend, offset, data);
        }

        let mut staging = GpuBuffer::new(BufferType::Staging)
            .with_label(format!("{} staging", self.label));
        staging.create(backend, data.len() as u64)?;
        let result = staging.copy(backend, data).and_then(|_| {
            let mut commands = SingleTimeCommands::new();
            let src = staging.handle();
            let dst = &mut *self;
            commands.push(move |backend, cmd| {
                dst.insert_barrier(backend, cmd, ResourceState::CopyDst);
                backend.cmd_copy_buffer(
                    cmd,
                    src,
                    dst.handle(),
                    &[BufferCopy {
                        src_offset: 0,
                        dst_offset: offset,
                        size: data.len() as u64,
                    }],
                );
                Ok(())
            });
            commands.execute(backend)
        });
        staging.destroy(backend);
        result
    }

    /// Device address for shader or acceleration-structure access.
    pub fn device_address(&self, backend: &dyn GpuBackend) -> RenderResult<u64> {
        Ok(backend.buffer_device_address(self.handle())?)
    }

    /// Record a whole-buffer barrier from the tracked state to `new_state`.
    pub fn insert_barrier(
        &mut self,
        backend: &mut dyn GpuBackend,
        cmd: CommandBufferHandle,
        new_state: ResourceState,
    ) {
        let barrier = BufferBarrier {
            buffer: self.handle(),
            old_state: self.state,
            new_state,
        };
        backend.cmd_pipeline_barrier(cmd, &[barrier], &[]);
        self.state = new_state;
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::error!(
                "GpuBuffer '{}' ({:?}) dropped without destroy; handle {:?} leaked",
                self.label,
                self.ty,
                handle
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyOp};

    #[test]
    fn test_create_and_copy() {
        let mut backend = DummyBackend::new();
        let mut buffer = GpuBuffer::new(BufferType::Storage).with_label("test");
        buffer.create(&mut backend, 16).unwrap();
        buffer.copy(&mut backend, &[1, 2, 3, 4]).unwrap();
        buffer.copy_at(&mut backend, 8, &[9]).unwrap();

        let mut out = [0u8; 9];
        buffer.read(&mut backend, 0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 0, 0, 0, 0, 9]);
        buffer.destroy(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    #[should_panic(expected = "destroyed before create or twice")]
    fn test_double_destroy_panics() {
        let mut backend = DummyBackend::new();
        let mut buffer = GpuBuffer::new(BufferType::Uniform);
        buffer.create(&mut backend, 16).unwrap();
        buffer.destroy(&mut backend);
        buffer.destroy(&mut backend);
    }

    #[test]
    fn test_device_local_upload_goes_through_staging() {
        let mut backend = DummyBackend::new();
        let mut buffer = GpuBuffer::new(BufferType::Vertex).with_label("vertices");
        buffer.create_with_data(&mut backend, &[5u8; 32]).unwrap();

        assert_eq!(backend.buffer_data(buffer.handle()), &[5u8; 32]);
        assert_eq!(
            backend.count_ops(|op| matches!(op, DummyOp::CopyBuffer { .. })),
            1
        );
        assert_eq!(buffer.state(), ResourceState::CopyDst);
        // Only the vertex buffer survives; staging is gone.
        assert_eq!(backend.live_buffer_count(), 1);
        buffer.destroy(&mut backend);
    }

    #[test]
    fn test_barrier_tracks_state() {
        let mut backend = DummyBackend::new();
        let mut buffer = GpuBuffer::new(BufferType::Storage);
        buffer.create(&mut backend, 64).unwrap();

        let mut commands = SingleTimeCommands::new();
        let target = &mut buffer;
        commands.push(move |backend, cmd| {
            target.insert_barrier(backend, cmd, ResourceState::UnorderedAccess);
            target.insert_barrier(backend, cmd, ResourceState::ShaderResource);
            Ok(())
        });
        commands.execute(&mut backend).unwrap();

        let barriers: Vec<_> = backend
            .ops()
            .iter()
            .filter_map(|op| match op {
                DummyOp::PipelineBarrier { buffers, .. } => Some(buffers[0]),
                _ => None,
            })
            .collect();
        assert_eq!(barriers[0].old_state, ResourceState::Undefined);
        assert_eq!(barriers[1].old_state, ResourceState::UnorderedAccess);
        assert_eq!(buffer.state(), ResourceState::ShaderResource);
        buffer.destroy(&mut backend);
    }

    #[test]
    fn test_ensure_capacity_defers_old_allocation() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut buffer = GpuBuffer::new(BufferType::MeshDescription);
        buffer.create(&mut backend, 16).unwrap();
        let old = buffer.handle();

        assert!(!buffer
            .ensure_capacity(&mut backend, Some(&deferred), 8)
            .unwrap());
        assert!(buffer
            .ensure_capacity(&mut backend, Some(&deferred), 64)
            .unwrap());
        assert_ne!(buffer.handle(), old);
        assert!(backend.is_live(old.raw()));
        deferred.flush(&mut backend).unwrap();
        assert!(!backend.is_live(old.raw()));
        buffer.destroy(&mut backend);
    }
}
