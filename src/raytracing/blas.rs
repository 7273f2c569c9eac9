use glam::Mat4;

use crate::backend::{
    AccelerationStructureBuildFlags, AccelerationStructureBuildMode, AccelerationStructureGeometry,
    AccelerationStructureHandle, AccelerationStructureKind, GpuBackend,
};
use crate::error::{RenderError, RenderResult};
use crate::lifecycle::{DeferredRelease, ReleasedObject};
use crate::memory::{BufferType, GpuBuffer};

use super::build::{create_storage, run_build, BuildRequest};
use super::geometry::AccelerationGeometry;

const BLAS_FLAGS: AccelerationStructureBuildFlags = AccelerationStructureBuildFlags::PREFER_FAST_TRACE;

pub(crate) fn require_raytracing(backend: &dyn GpuBackend) -> RenderResult<()> {
    if backend.capabilities().raytracing {
        Ok(())
    } else {
        Err(RenderError::Unsupported(
            "acceleration structures (VK_KHR_acceleration_structure)".to_string(),
        ))
    }
}

/// A bottom-level acceleration structure over one or more triangle geometries.
///
/// Geometry changes mark the structure dirty; [`Blas::update_structure`]
/// rebuilds it from scratch only when it is.
#[derive(Debug)]
pub struct Blas {
    label: String,
    geometries: Vec<AccelerationGeometry>,
    transform: Mat4,
    entity_index: u32,
    material_index: u32,
    mask: u8,
    storage: GpuBuffer,
    handle: Option<AccelerationStructureHandle>,
    created: bool,
    needs_rebuild: bool,
    generation: u64,
}

impl Blas {
    pub fn new(label: impl Into<String>, geometries: Vec<AccelerationGeometry>) -> Self {
        let label = label.into();
        Self {
            storage: GpuBuffer::new(BufferType::AccelerationStructure)
                .with_label(format!("{} storage", label)),
            label,
            geometries,
            transform: Mat4::IDENTITY,
            entity_index: 0,
            material_index: 0,
            mask: 0xFF,
            handle: None,
            created: false,
            needs_rebuild: false,
            generation: 0,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_entity_index(mut self, entity_index: u32) -> Self {
        self.entity_index = entity_index;
        self
    }

    pub fn with_material_index(mut self, material_index: u32) -> Self {
        self.material_index = material_index;
        self
    }

    pub fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn geometries(&self) -> &[AccelerationGeometry] {
        &self.geometries
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Move the instance. Needs no rebuild of this structure; the owning
    /// top-level structure refits.
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn entity_index(&self) -> u32 {
        self.entity_index
    }

    pub fn material_index(&self) -> u32 {
        self.material_index
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    /// True from a successful `create` until `destroy` or `release`, even
    /// while a failed regrow has left it without a structure.
    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn handle(&self) -> AccelerationStructureHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("BLAS '{}' used before create", self.label),
        }
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Bumped on every successful build.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn mark_dirty(&mut self) {
        self.needs_rebuild = true;
    }

    /// Swap the geometry set. Old buffers go through `deferred`.
    pub fn set_geometries(&mut self, deferred: &DeferredRelease, geometries: Vec<AccelerationGeometry>) {
        for mut old in std::mem::replace(&mut self.geometries, geometries) {
            if old.is_created() {
                old.release(deferred);
            }
        }
        self.needs_rebuild = true;
    }

    pub fn device_address(&self, backend: &dyn GpuBackend) -> RenderResult<u64> {
        Ok(backend.acceleration_structure_device_address(self.handle())?)
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        assert!(!self.created, "BLAS '{}' created twice", self.label);
        require_raytracing(backend)?;
        if self.geometries.is_empty() {
            return Err(RenderError::InvalidParameter(format!(
                "BLAS '{}' has no geometry",
                self.label
            )));
        }

        let fresh = self.create_pending_geometries(backend)?;
        if let Err(err) = self.build_new(backend) {
            for index in fresh {
                self.geometries[index].destroy(backend);
            }
            return Err(err);
        }
        self.created = true;
        log::debug!(
            "Created BLAS '{}' ({} geometries)",
            self.label,
            self.geometries.len()
        );
        Ok(())
    }

    /// Rebuild if marked dirty. Returns whether a build was issued.
    ///
    /// A structure lost to a failed regrow stays dirty and is allocated
    /// again on the next call.
    pub fn update_structure(
        &mut self,
        backend: &mut dyn GpuBackend,
        deferred: &DeferredRelease,
    ) -> RenderResult<bool> {
        if !self.needs_rebuild {
            return Ok(false);
        }
        assert!(self.created, "BLAS '{}' updated before create", self.label);
        self.create_pending_geometries(backend)?;
        if self.handle.is_none() {
            return self.build_new(backend).map(|_| true);
        }

        let geometries = self.build_geometries(backend)?;
        let sizes = backend.acceleration_structure_build_sizes(
            AccelerationStructureKind::BottomLevel,
            BLAS_FLAGS,
            &geometries,
        )?;
        if sizes.acceleration_structure_size > self.storage.size() {
            log::debug!(
                "BLAS '{}' grows to {} bytes",
                self.label,
                sizes.acceleration_structure_size
            );
            self.release_structure(deferred);
            return self.build_new(backend).map(|_| true);
        }

        let dst = self.handle();
        run_build(
            backend,
            &mut self.storage,
            &self.label,
            BuildRequest {
                kind: AccelerationStructureKind::BottomLevel,
                flags: BLAS_FLAGS,
                mode: AccelerationStructureBuildMode::Build,
                dst,
                geometries: &geometries,
                scratch_size: sizes.build_scratch_size,
            },
        )?;
        self.needs_rebuild = false;
        self.generation += 1;
        Ok(true)
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        assert!(
            self.created,
            "BLAS '{}' destroyed before create or twice",
            self.label
        );
        self.created = false;
        if let Some(handle) = self.handle.take() {
            backend.destroy_acceleration_structure(handle);
        }
        if self.storage.is_created() {
            self.storage.destroy(backend);
        }
        for geometry in &mut self.geometries {
            if geometry.is_created() {
                geometry.destroy(backend);
            }
        }
    }

    pub fn release(&mut self, deferred: &DeferredRelease) {
        self.created = false;
        self.release_structure(deferred);
        for geometry in &mut self.geometries {
            if geometry.is_created() {
                geometry.release(deferred);
            }
        }
    }

    fn release_structure(&mut self, deferred: &DeferredRelease) {
        if let Some(handle) = self.handle.take() {
            deferred.release(ReleasedObject::AccelerationStructure(handle));
        }
        if self.storage.is_created() {
            self.storage.release(deferred);
        }
    }

    /// Upload every geometry not yet on the GPU. Returns the indices created.
    fn create_pending_geometries(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<Vec<usize>> {
        let mut fresh: Vec<usize> = Vec::new();
        for index in 0..self.geometries.len() {
            if self.geometries[index].is_created() {
                continue;
            }
            if let Err(err) = self.geometries[index].create(backend) {
                for &created in &fresh {
                    self.geometries[created].destroy(backend);
                }
                return Err(err);
            }
            fresh.push(index);
        }
        Ok(fresh)
    }

    fn build_geometries(&self, backend: &dyn GpuBackend) -> RenderResult<Vec<AccelerationStructureGeometry>> {
        self.geometries
            .iter()
            .map(|geometry| geometry.build_geometry(backend))
            .collect()
    }

    /// Allocate storage and a structure sized for the current geometry and
    /// build into it.
    fn build_new(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        let geometries = self.build_geometries(backend)?;
        let sizes = backend.acceleration_structure_build_sizes(
            AccelerationStructureKind::BottomLevel,
            BLAS_FLAGS,
            &geometries,
        )?;
        let handle = create_storage(
            backend,
            &mut self.storage,
            AccelerationStructureKind::BottomLevel,
            sizes.acceleration_structure_size,
        )?;
        let result = run_build(
            backend,
            &mut self.storage,
            &self.label,
            BuildRequest {
                kind: AccelerationStructureKind::BottomLevel,
                flags: BLAS_FLAGS,
                mode: AccelerationStructureBuildMode::Build,
                dst: handle,
                geometries: &geometries,
                scratch_size: sizes.build_scratch_size,
            },
        );
        if let Err(err) = result {
            backend.destroy_acceleration_structure(handle);
            self.storage.destroy(backend);
            return Err(err);
        }
        self.handle = Some(handle);
        self.needs_rebuild = false;
        self.generation += 1;
        Ok(())
    }
}

impl Drop for Blas {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::error!(
                "BLAS '{}' dropped without destroy; handle {:?} leaked",
                self.label,
                handle
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, DeviceCapabilities, DummyBackend, DummyOp};
    use glam::Vec3;

    fn triangle() -> AccelerationGeometry {
        AccelerationGeometry::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![0, 1, 2],
        )
    }

    fn builds(backend: &DummyBackend) -> usize {
        backend.count_ops(|op| matches!(op, DummyOp::BuildAccelerationStructure { .. }))
    }

    #[test]
    fn test_create_builds_once() {
        let mut backend = DummyBackend::new();
        let mut blas = Blas::new("triangle", vec![triangle()]);
        blas.create(&mut backend).unwrap();
        assert_eq!(builds(&backend), 1);
        assert_eq!(blas.generation(), 1);
        assert!(!blas.needs_rebuild());
        // Geometry buffers and structure storage; scratch is gone.
        assert_eq!(backend.live_buffer_count(), 3);
        blas.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_update_rebuilds_only_when_dirty() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut blas = Blas::new("triangle", vec![triangle()]);
        blas.create(&mut backend).unwrap();
        backend.clear_ops();

        assert!(!blas.update_structure(&mut backend, &deferred).unwrap());
        assert_eq!(builds(&backend), 0);

        blas.mark_dirty();
        assert!(blas.update_structure(&mut backend, &deferred).unwrap());
        assert_eq!(builds(&backend), 1);
        assert!(!blas.needs_rebuild());

        blas.destroy(&mut backend);
    }

    #[test]
    fn test_larger_geometry_reallocates() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut blas = Blas::new("mesh", vec![triangle()]);
        blas.create(&mut backend).unwrap();
        let old = blas.handle();

        let quad = AccelerationGeometry::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE],
            vec![0, 1, 2, 2, 1, 3],
        );
        blas.set_geometries(&deferred, vec![quad]);
        assert!(blas.update_structure(&mut backend, &deferred).unwrap());
        assert_ne!(blas.handle(), old);
        assert!(deferred.pending_count() > 0);

        blas.destroy(&mut backend);
        deferred.flush(&mut backend).unwrap();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_failed_build_cleans_up() {
        let mut backend = DummyBackend::new();
        backend.fail_call("create_acceleration_structure", 0, BackendError::OutOfMemory);
        let mut blas = Blas::new("triangle", vec![triangle()]);
        assert!(blas.create(&mut backend).is_err());
        assert!(!blas.is_created());
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_requires_raytracing() {
        let mut backend = DummyBackend::new().with_capabilities(DeviceCapabilities::default());
        let mut blas = Blas::new("triangle", vec![triangle()]);
        assert!(matches!(
            blas.create(&mut backend),
            Err(RenderError::Unsupported(_))
        ));
    }

    #[test]
    fn test_failed_regrow_rebuilds_on_next_update() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut blas = Blas::new("mesh", vec![triangle()]);
        blas.create(&mut backend).unwrap();

        let quad = AccelerationGeometry::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE],
            vec![0, 1, 2, 2, 1, 3],
        );
        blas.set_geometries(&deferred, vec![quad]);
        backend.fail_call("create_acceleration_structure", 0, BackendError::OutOfMemory);
        assert!(blas.update_structure(&mut backend, &deferred).is_err());
        assert!(blas.is_created());
        assert!(blas.needs_rebuild());

        assert!(blas.update_structure(&mut backend, &deferred).unwrap());
        assert!(!blas.needs_rebuild());
        assert!(blas.device_address(&backend).unwrap() != 0);

        blas.destroy(&mut backend);
        deferred.flush(&mut backend).unwrap();
        assert_eq!(backend.live_object_count(), 0);
    }
}
