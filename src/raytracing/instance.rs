use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Disable face culling for every triangle of the instance.
pub const INSTANCE_FLAG_TRIANGLE_FACING_CULL_DISABLE: u8 = 0x1;

/// An instance record in the layout the device reads for top-level builds:
/// a 3x4 row-major transform, 24-bit custom index + 8-bit mask, 24-bit
/// hit group offset + 8-bit flags, and the bottom-level structure address.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AccelerationInstance {
    pub transform: [f32; 12],
    pub custom_index_and_mask: u32,
    pub sbt_offset_and_flags: u32,
    pub blas_address: u64,
}

impl AccelerationInstance {
    pub fn new(transform: Mat4, custom_index: u32, mask: u8, blas_address: u64) -> Self {
        let mut rows = [0.0f32; 12];
        for r in 0..3 {
            rows[r * 4..r * 4 + 4].copy_from_slice(&transform.row(r).to_array());
        }
        Self {
            transform: rows,
            custom_index_and_mask: (custom_index & 0x00FF_FFFF) | ((mask as u32) << 24),
            sbt_offset_and_flags: (INSTANCE_FLAG_TRIANGLE_FACING_CULL_DISABLE as u32) << 24,
            blas_address,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & 0x00FF_FFFF
    }

    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }
}

/// Where hit shaders find the vertex and index data of a geometry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshDescription {
    pub vertex_buffer_address: u64,
    pub index_buffer_address: u64,
    pub entity_index: u32,
    pub material_index: u32,
    pub num_indices: u32,
    pub num_vertices: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<AccelerationInstance>(), 64);
static_assertions::const_assert_eq!(std::mem::size_of::<MeshDescription>(), 32);

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_transform_is_row_major() {
        let instance = AccelerationInstance::new(
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            7,
            0xFF,
            0x1000,
        );
        assert_eq!(
            instance.transform,
            [1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 3.0]
        );
        assert_eq!(instance.custom_index(), 7);
        assert_eq!(instance.mask(), 0xFF);
    }
}
