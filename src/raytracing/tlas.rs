use std::mem::size_of;

use crate::backend::{
    AccelerationStructureBuildFlags, AccelerationStructureBuildMode, AccelerationStructureGeometry,
    AccelerationStructureHandle, AccelerationStructureKind, GpuBackend,
};
use crate::descriptor::SubDescriptor;
use crate::error::RenderResult;
use crate::lifecycle::{DeferredRelease, ReleasedObject};
use crate::memory::{BufferType, GpuBuffer};

use super::blas::{require_raytracing, Blas};
use super::build::{create_storage, run_build, BuildRequest};
use super::instance::{AccelerationInstance, MeshDescription};

const TLAS_FLAGS: AccelerationStructureBuildFlags = AccelerationStructureBuildFlags::PREFER_FAST_TRACE
    .union(AccelerationStructureBuildFlags::ALLOW_UPDATE);

/// Stable id of a BLAS owned by a [`Tlas`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlasId(u32);

/// What a top-level build consumed. Compared against the current state to
/// pick between no work, an in-place refit and a full rebuild.
#[derive(Debug, Default, PartialEq)]
struct BuiltState {
    structure: Vec<(BlasId, u64)>,
    instances: Vec<AccelerationInstance>,
}

/// A top-level acceleration structure over the BLASes it owns.
///
/// Every BLAS becomes one instance. The custom index of an instance is the
/// offset of its first [`MeshDescription`], so hit shaders find geometry
/// data at `mesh_descriptions[custom_index + geometry_index]`.
///
/// Built with `ALLOW_UPDATE`: when only instance transforms changed it is
/// refit in place, any structural change rebuilds it.
#[derive(Debug)]
pub struct Tlas {
    label: String,
    entries: Vec<(BlasId, Blas)>,
    next_id: u32,
    instance_buffer: GpuBuffer,
    mesh_descriptions: GpuBuffer,
    mesh_description_count: usize,
    storage: GpuBuffer,
    handle: Option<AccelerationStructureHandle>,
    created: bool,
    update_scratch_size: u64,
    built: BuiltState,
}

impl Tlas {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            instance_buffer: GpuBuffer::new(BufferType::AccelerationStructureInstance)
                .with_label(format!("{} instances", label)),
            mesh_descriptions: GpuBuffer::new(BufferType::MeshDescription)
                .with_label(format!("{} mesh descriptions", label)),
            storage: GpuBuffer::new(BufferType::AccelerationStructure)
                .with_label(format!("{} storage", label)),
            label,
            entries: Vec::new(),
            next_id: 0,
            mesh_description_count: 0,
            handle: None,
            created: false,
            update_scratch_size: 0,
            built: BuiltState::default(),
        }
    }

    pub fn add_blas(&mut self, blas: Blas) -> BlasId {
        let id = BlasId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, blas));
        id
    }

    /// Remove a BLAS; its GPU objects go through `deferred`.
    pub fn remove_blas(&mut self, id: BlasId, deferred: &DeferredRelease) -> bool {
        let Some(position) = self.entries.iter().position(|(entry, _)| *entry == id) else {
            return false;
        };
        let (_, mut blas) = self.entries.remove(position);
        if blas.is_created() {
            blas.release(deferred);
        }
        true
    }

    pub fn blas(&self, id: BlasId) -> Option<&Blas> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == id)
            .map(|(_, blas)| blas)
    }

    pub fn blas_mut(&mut self, id: BlasId) -> Option<&mut Blas> {
        self.entries
            .iter_mut()
            .find(|(entry, _)| *entry == id)
            .map(|(_, blas)| blas)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn handle(&self) -> AccelerationStructureHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("TLAS '{}' used before create", self.label),
        }
    }

    pub fn mesh_descriptions(&self) -> &GpuBuffer {
        &self.mesh_descriptions
    }

    pub fn mesh_description_count(&self) -> usize {
        self.mesh_description_count
    }

    pub fn sub_descriptor(&self) -> SubDescriptor {
        SubDescriptor::acceleration_structure(self.handle())
    }

    pub fn mesh_descriptions_sub_descriptor(&self) -> SubDescriptor {
        SubDescriptor::buffer(
            self.mesh_descriptions.handle(),
            0,
            (self.mesh_description_count.max(1) * size_of::<MeshDescription>()) as u64,
        )
    }

    /// Create missing BLASes, upload instances and mesh descriptions, and
    /// build.
    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        assert!(!self.created, "TLAS '{}' created twice", self.label);
        require_raytracing(backend)?;

        let mut fresh = Vec::new();
        let result = self.create_pending_blas(backend, &mut fresh).and_then(|_| {
            let instances = self.write_instances(backend, None)?;
            self.write_mesh_descriptions(backend, None)?;
            self.build_new(backend, instances)
        });
        if let Err(err) = result {
            for buffer in [&mut self.instance_buffer, &mut self.mesh_descriptions] {
                if buffer.is_created() {
                    buffer.destroy(backend);
                }
            }
            for (_, blas) in self.entries.iter_mut().filter(|(id, _)| fresh.contains(id)) {
                blas.destroy(backend);
            }
            return Err(err);
        }
        self.created = true;
        log::debug!("Created TLAS '{}' ({} instances)", self.label, self.entries.len());
        Ok(())
    }

    /// Bring the structure up to date with its BLASes.
    ///
    /// Dirty BLASes are rebuilt first. A changed BLAS set or a rebuilt BLAS
    /// forces a full rebuild; changed transforms alone refit in place. A
    /// structure lost to a failed regrow is allocated again. Returns whether
    /// a top-level build was issued.
    pub fn update_structure(
        &mut self,
        backend: &mut dyn GpuBackend,
        deferred: &DeferredRelease,
    ) -> RenderResult<bool> {
        crate::assert_render_thread!();
        assert!(self.created, "TLAS '{}' updated before create", self.label);

        let mut fresh = Vec::new();
        self.create_pending_blas(backend, &mut fresh)?;
        for (_, blas) in &mut self.entries {
            blas.update_structure(backend, deferred)?;
        }

        let structure = self.structure();
        if self.handle.is_none() || structure != self.built.structure {
            let instances = self.write_instances(backend, Some(deferred))?;
            self.write_mesh_descriptions(backend, Some(deferred))?;
            return self.rebuild(backend, deferred, instances).map(|_| true);
        }

        let instances = self.pack_instances(backend)?;
        if instances == self.built.instances {
            return Ok(false);
        }
        self.instance_buffer
            .copy(backend, bytemuck::cast_slice(&instances))?;
        self.refit(backend, instances)?;
        Ok(true)
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        assert!(
            self.created,
            "TLAS '{}' destroyed before create or twice",
            self.label
        );
        self.created = false;
        if let Some(handle) = self.handle.take() {
            backend.destroy_acceleration_structure(handle);
        }
        for buffer in [
            &mut self.storage,
            &mut self.instance_buffer,
            &mut self.mesh_descriptions,
        ] {
            if buffer.is_created() {
                buffer.destroy(backend);
            }
        }
        for (_, blas) in &mut self.entries {
            if blas.is_created() {
                blas.destroy(backend);
            }
        }
        self.built = BuiltState::default();
    }

    fn create_pending_blas(
        &mut self,
        backend: &mut dyn GpuBackend,
        fresh: &mut Vec<BlasId>,
    ) -> RenderResult<()> {
        for (id, blas) in &mut self.entries {
            if !blas.is_created() {
                blas.create(backend)?;
                fresh.push(*id);
            }
        }
        Ok(())
    }

    fn structure(&self) -> Vec<(BlasId, u64)> {
        self.entries
            .iter()
            .map(|(id, blas)| (*id, blas.generation()))
            .collect()
    }

    fn pack_instances(&self, backend: &dyn GpuBackend) -> RenderResult<Vec<AccelerationInstance>> {
        let mut first_description = 0u32;
        let mut instances = Vec::with_capacity(self.entries.len());
        for (_, blas) in &self.entries {
            instances.push(AccelerationInstance::new(
                blas.transform(),
                first_description,
                blas.mask(),
                blas.device_address(backend)?,
            ));
            first_description += blas.geometries().len() as u32;
        }
        Ok(instances)
    }

    fn write_instances(
        &mut self,
        backend: &mut dyn GpuBackend,
        deferred: Option<&DeferredRelease>,
    ) -> RenderResult<Vec<AccelerationInstance>> {
        let instances = self.pack_instances(backend)?;
        let size = (instances.len().max(1) * size_of::<AccelerationInstance>()) as u64;
        self.instance_buffer.ensure_capacity(backend, deferred, size)?;
        if !instances.is_empty() {
            self.instance_buffer
                .copy(backend, bytemuck::cast_slice(&instances))?;
        }
        Ok(instances)
    }

    fn write_mesh_descriptions(
        &mut self,
        backend: &mut dyn GpuBackend,
        deferred: Option<&DeferredRelease>,
    ) -> RenderResult<()> {
        let mut descriptions = Vec::new();
        for (_, blas) in &self.entries {
            for geometry in blas.geometries() {
                descriptions.push(MeshDescription {
                    vertex_buffer_address: geometry.vertex_address(backend)?,
                    index_buffer_address: geometry.index_address(backend)?,
                    entity_index: blas.entity_index(),
                    material_index: blas.material_index(),
                    num_indices: geometry.index_count(),
                    num_vertices: geometry.vertex_count(),
                });
            }
        }
        let size = (descriptions.len().max(1) * size_of::<MeshDescription>()) as u64;
        self.mesh_descriptions
            .ensure_capacity(backend, deferred, size)?;
        if !descriptions.is_empty() {
            self.mesh_descriptions
                .copy(backend, bytemuck::cast_slice(&descriptions))?;
        }
        self.mesh_description_count = descriptions.len();
        Ok(())
    }

    fn instance_geometry(&self, backend: &dyn GpuBackend, count: usize) -> RenderResult<AccelerationStructureGeometry> {
        Ok(AccelerationStructureGeometry::Instances {
            address: self.instance_buffer.device_address(backend)?,
            count: count as u32,
        })
    }

    fn build_new(
        &mut self,
        backend: &mut dyn GpuBackend,
        instances: Vec<AccelerationInstance>,
    ) -> RenderResult<()> {
        let geometries = [self.instance_geometry(backend, instances.len())?];
        let sizes = backend.acceleration_structure_build_sizes(
            AccelerationStructureKind::TopLevel,
            TLAS_FLAGS,
            &geometries,
        )?;
        let handle = create_storage(
            backend,
            &mut self.storage,
            AccelerationStructureKind::TopLevel,
            sizes.acceleration_structure_size,
        )?;
        let result = run_build(
            backend,
            &mut self.storage,
            &self.label,
            BuildRequest {
                kind: AccelerationStructureKind::TopLevel,
                flags: TLAS_FLAGS,
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
        self.update_scratch_size = sizes.update_scratch_size;
        self.built = BuiltState {
            structure: self.structure(),
            instances,
        };
        Ok(())
    }

    fn rebuild(
        &mut self,
        backend: &mut dyn GpuBackend,
        deferred: &DeferredRelease,
        instances: Vec<AccelerationInstance>,
    ) -> RenderResult<()> {
        let geometries = [self.instance_geometry(backend, instances.len())?];
        let sizes = backend.acceleration_structure_build_sizes(
            AccelerationStructureKind::TopLevel,
            TLAS_FLAGS,
            &geometries,
        )?;
        if self.handle.is_none() || sizes.acceleration_structure_size > self.storage.size() {
            log::debug!(
                "TLAS '{}' allocates {} bytes",
                self.label,
                sizes.acceleration_structure_size
            );
            if let Some(handle) = self.handle.take() {
                deferred.release(ReleasedObject::AccelerationStructure(handle));
            }
            if self.storage.is_created() {
                self.storage.release(deferred);
            }
            return self.build_new(backend, instances);
        }

        let dst = self.handle();
        run_build(
            backend,
            &mut self.storage,
            &self.label,
            BuildRequest {
                kind: AccelerationStructureKind::TopLevel,
                flags: TLAS_FLAGS,
                mode: AccelerationStructureBuildMode::Build,
                dst,
                geometries: &geometries,
                scratch_size: sizes.build_scratch_size,
            },
        )?;
        self.update_scratch_size = sizes.update_scratch_size;
        self.built = BuiltState {
            structure: self.structure(),
            instances,
        };
        Ok(())
    }

    fn refit(&mut self, backend: &mut dyn GpuBackend, instances: Vec<AccelerationInstance>) -> RenderResult<()> {
        let geometries = [self.instance_geometry(backend, instances.len())?];
        let dst = self.handle();
        run_build(
            backend,
            &mut self.storage,
            &self.label,
            BuildRequest {
                kind: AccelerationStructureKind::TopLevel,
                flags: TLAS_FLAGS,
                mode: AccelerationStructureBuildMode::Update,
                dst,
                geometries: &geometries,
                scratch_size: self.update_scratch_size,
            },
        )?;
        self.built.instances = instances;
        Ok(())
    }
}

impl Drop for Tlas {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::error!(
                "TLAS '{}' dropped without destroy; handle {:?} leaked",
                self.label,
                handle
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, DummyOp};
    use crate::backend::DummyBackend;
    use crate::raytracing::AccelerationGeometry;
    use glam::{Mat4, Vec3};

    fn triangle() -> AccelerationGeometry {
        AccelerationGeometry::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 2])
    }

    fn top_level_builds(backend: &DummyBackend) -> Vec<AccelerationStructureBuildMode> {
        backend
            .ops()
            .iter()
            .filter_map(|op| match op {
                DummyOp::BuildAccelerationStructure {
                    kind: AccelerationStructureKind::TopLevel,
                    mode,
                    ..
                } => Some(*mode),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_transform_change_refits() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut tlas = Tlas::new("scene");
        let id = tlas.add_blas(Blas::new("a", vec![triangle()]));
        tlas.add_blas(Blas::new("b", vec![triangle()]));
        tlas.create(&mut backend).unwrap();
        backend.clear_ops();

        assert!(!tlas.update_structure(&mut backend, &deferred).unwrap());
        assert!(top_level_builds(&backend).is_empty());

        tlas.blas_mut(id)
            .unwrap()
            .set_transform(Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)));
        assert!(tlas.update_structure(&mut backend, &deferred).unwrap());
        assert_eq!(
            top_level_builds(&backend),
            vec![AccelerationStructureBuildMode::Update]
        );

        tlas.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_blas_rebuild_forces_full_build() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut tlas = Tlas::new("scene");
        let id = tlas.add_blas(Blas::new("a", vec![triangle()]));
        tlas.create(&mut backend).unwrap();
        backend.clear_ops();

        tlas.blas_mut(id).unwrap().mark_dirty();
        assert!(tlas.update_structure(&mut backend, &deferred).unwrap());
        assert_eq!(
            top_level_builds(&backend),
            vec![AccelerationStructureBuildMode::Build]
        );

        tlas.destroy(&mut backend);
    }

    #[test]
    fn test_added_blas_grows_structure() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut tlas = Tlas::new("scene");
        tlas.add_blas(Blas::new("a", vec![triangle()]));
        tlas.create(&mut backend).unwrap();
        let old = tlas.handle();

        tlas.add_blas(Blas::new("b", vec![triangle()]));
        assert!(tlas.update_structure(&mut backend, &deferred).unwrap());
        assert_ne!(tlas.handle(), old);
        assert_eq!(tlas.mesh_description_count(), 2);

        tlas.destroy(&mut backend);
        deferred.flush(&mut backend).unwrap();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_removed_blas_is_deferred() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut tlas = Tlas::new("scene");
        let a = tlas.add_blas(Blas::new("a", vec![triangle()]));
        tlas.add_blas(Blas::new("b", vec![triangle()]));
        tlas.create(&mut backend).unwrap();

        assert!(tlas.remove_blas(a, &deferred));
        assert!(!tlas.remove_blas(a, &deferred));
        assert!(tlas.update_structure(&mut backend, &deferred).unwrap());
        assert_eq!(tlas.mesh_description_count(), 1);

        tlas.destroy(&mut backend);
        deferred.flush(&mut backend).unwrap();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_failed_create_cleans_up() {
        let mut backend = DummyBackend::new();
        let mut tlas = Tlas::new("scene");
        tlas.add_blas(Blas::new("a", vec![triangle()]));
        // The BLAS structure is created first; fail the top-level one.
        backend.fail_call("create_acceleration_structure", 1, BackendError::OutOfMemory);
        assert!(tlas.create(&mut backend).is_err());
        assert!(!tlas.is_created());
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_failed_regrow_rebuilds_on_next_update() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut tlas = Tlas::new("scene");
        tlas.add_blas(Blas::new("a", vec![triangle()]));
        tlas.create(&mut backend).unwrap();

        tlas.add_blas(Blas::new("b", vec![triangle()]));
        // The new BLAS is created first; fail the regrown top-level structure.
        backend.fail_call("create_acceleration_structure", 1, BackendError::OutOfMemory);
        assert!(tlas.update_structure(&mut backend, &deferred).is_err());
        assert!(tlas.is_created());

        backend.clear_ops();
        assert!(tlas.update_structure(&mut backend, &deferred).unwrap());
        assert_eq!(
            top_level_builds(&backend),
            vec![AccelerationStructureBuildMode::Build]
        );
        assert_eq!(tlas.mesh_description_count(), 2);

        tlas.destroy(&mut backend);
        deferred.flush(&mut backend).unwrap();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_mesh_descriptions_point_at_geometry() {
        let mut backend = DummyBackend::new();
        let mut tlas = Tlas::new("scene");
        let ids: Vec<BlasId> = (0..3)
            .map(|i| {
                tlas.add_blas(
                    Blas::new(format!("mesh {}", i), vec![triangle()])
                        .with_entity_index(10 + i)
                        .with_material_index(i),
                )
            })
            .collect();
        tlas.create(&mut backend).unwrap();
        assert_eq!(tlas.mesh_description_count(), 3);

        let bytes = backend.buffer_data(tlas.mesh_descriptions().handle());
        let descriptions: Vec<MeshDescription> = bytes
            [..3 * size_of::<MeshDescription>()]
            .chunks_exact(size_of::<MeshDescription>())
            .map(bytemuck::pod_read_unaligned::<MeshDescription>)
            .collect();

        for (i, (id, description)) in ids.iter().zip(&descriptions).enumerate() {
            let geometry = &tlas.blas(*id).unwrap().geometries()[0];
            assert_eq!(
                description.vertex_buffer_address,
                geometry.vertex_address(&backend).unwrap()
            );
            assert_eq!(
                description.index_buffer_address,
                geometry.index_address(&backend).unwrap()
            );
            assert_eq!(description.entity_index, 10 + i as u32);
            assert_eq!(description.material_index, i as u32);
            assert_eq!(description.num_indices, 3);
            assert_eq!(description.num_vertices, 3);
        }

        tlas.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }
}
