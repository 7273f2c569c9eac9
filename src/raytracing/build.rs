use crate::backend::{
    align_up, AccelerationStructureBuild, AccelerationStructureBuildFlags,
    AccelerationStructureBuildMode, AccelerationStructureDesc, AccelerationStructureGeometry,
    AccelerationStructureHandle, AccelerationStructureKind, GpuBackend, ResourceState,
};
use crate::error::RenderResult;
use crate::frame::SingleTimeCommands;
use crate::memory::{BufferType, GpuBuffer};

/// One build or refit of an acceleration structure.
pub(crate) struct BuildRequest<'a> {
    pub kind: AccelerationStructureKind,
    pub flags: AccelerationStructureBuildFlags,
    pub mode: AccelerationStructureBuildMode,
    pub dst: AccelerationStructureHandle,
    pub geometries: &'a [AccelerationStructureGeometry],
    pub scratch_size: u64,
}

/// Create the backing buffer and the structure object sized for `size` bytes.
pub(crate) fn create_storage(
    backend: &mut dyn GpuBackend,
    storage: &mut GpuBuffer,
    kind: AccelerationStructureKind,
    size: u64,
) -> RenderResult<AccelerationStructureHandle> {
    storage.create(backend, size)?;
    match backend.create_acceleration_structure(&AccelerationStructureDesc {
        kind,
        buffer: storage.handle(),
        offset: 0,
        size,
    }) {
        Ok(handle) => Ok(handle),
        Err(err) => {
            storage.destroy(backend);
            Err(err.into())
        }
    }
}

/// Record the build with a transient scratch buffer and wait for it.
///
/// An update refits `dst` in place, so `src == dst`.
pub(crate) fn run_build(
    backend: &mut dyn GpuBackend,
    storage: &mut GpuBuffer,
    label: &str,
    request: BuildRequest<'_>,
) -> RenderResult<()> {
    let alignment = backend
        .capabilities()
        .min_acceleration_structure_scratch_offset_alignment;
    let mut scratch = GpuBuffer::new(BufferType::Scratch).with_label(format!("{} scratch", label));
    scratch.create(backend, request.scratch_size.max(1) + alignment)?;

    let result = scratch.device_address(backend).and_then(|address| {
        let scratch_address = align_up(address, alignment);
        let src = match request.mode {
            AccelerationStructureBuildMode::Build => None,
            AccelerationStructureBuildMode::Update => Some(request.dst),
        };
        let mut commands = SingleTimeCommands::new();
        commands.push(move |backend, cmd| {
            storage.insert_barrier(backend, cmd, ResourceState::AccelerationStructureWrite);
            backend.cmd_build_acceleration_structure(
                cmd,
                &AccelerationStructureBuild {
                    kind: request.kind,
                    flags: request.flags,
                    mode: request.mode,
                    src,
                    dst: request.dst,
                    geometries: request.geometries,
                    scratch_address,
                },
            );
            storage.insert_barrier(backend, cmd, ResourceState::AccelerationStructureRead);
            Ok(())
        });
        commands.execute(backend)
    });
    scratch.destroy(backend);

    if result.is_ok() {
        log::trace!(
            "{:?} {:?} of '{}' ({} geometries)",
            request.mode,
            request.kind,
            label,
            request.geometries.len()
        );
    }
    result
}
