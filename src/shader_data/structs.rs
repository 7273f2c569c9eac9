//! GPU-side structs shared with shaders.
//!
//! Layouts follow std430 with explicit padding. Sizes are asserted at
//! compile time; a size change needs a matching shader change.

use bytemuck::{Pod, Zeroable};
use glam::{IVec4, Mat4, UVec2, UVec4, Vec2, Vec4};

/// Bones per skeleton.
pub const MAX_BONES: usize = 256;

/// Material texture slots per material.
pub const MAX_MATERIAL_TEXTURES: usize = 16;

/// Pack a linear color into RGBA8 unorm, red in the low byte.
pub fn pack_unorm4x8(color: Vec4) -> u32 {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    (c.x as u32) | ((c.y as u32) << 8) | ((c.z as u32) << 16) | ((c.w as u32) << 24)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneShaderData {
    pub aabb_max: Vec4,
    pub aabb_min: Vec4,
    /// x = start, y = end, zw unused
    pub fog_params: Vec4,
    pub game_time: f32,
    pub frame_counter: u32,
    pub enabled_render_components_mask: u32,
    pub enabled_probes_mask: u32,
    pub _pad: [Vec4; 12],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraShaderData {
    pub view: Mat4,
    pub projection: Mat4,
    pub previous_view_projection: Mat4,
    pub position: Vec4,
    /// xy = viewport size in pixels
    pub dimensions: UVec4,
    /// x = near, y = far, z = vertical fov in radians
    pub clip_params: Vec4,
    /// xy = current jitter, zw = previous jitter
    pub jitter: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialShaderData {
    pub albedo: Vec4,
    /// Roughness, metalness, transmission and normal map intensity packed as unorm8.
    pub packed_params: UVec4,
    pub uv_scale: Vec2,
    pub parallax_height: f32,
    pub alpha_threshold: f32,
    /// Bindless texture indices, 0 for none.
    pub texture_indices: [u32; MAX_MATERIAL_TEXTURES],
    /// Bit `i` set when `texture_indices[i]` is in use.
    pub texture_usage: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EntityShaderData {
    pub model_matrix: Mat4,
    pub previous_model_matrix: Mat4,
    pub world_aabb_max: Vec4,
    pub world_aabb_min: Vec4,
    pub entity_index: u32,
    pub material_index: u32,
    pub skeleton_index: u32,
    pub flags: u32,
    pub user_data: UVec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightShaderData {
    /// xyz = position (or direction for directional lights), w = intensity
    pub position_intensity: Vec4,
    pub normal: Vec4,
    pub color_packed: u32,
    pub light_type: u32,
    pub radius: f32,
    pub falloff: f32,
    pub area_size: Vec2,
    pub shadow_map_index: u32,
    pub _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SkeletonShaderData {
    pub bones: [Mat4; MAX_BONES],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowShaderData {
    pub projection: Mat4,
    pub view: Mat4,
    pub aabb_max: Vec4,
    pub aabb_min: Vec4,
    pub dimensions: UVec2,
    pub flags: u32,
    pub layer_index: u32,
    pub _pad: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EnvProbeShaderData {
    pub aabb_max: Vec4,
    pub aabb_min: Vec4,
    pub world_position: Vec4,
    pub texture_index: u32,
    pub flags: u32,
    pub camera_near: f32,
    pub camera_far: f32,
    pub dimensions: UVec2,
    pub _pad0: [u32; 2],
    /// Second-order spherical harmonics, rgb in xyz.
    pub sh: [Vec4; 9],
    pub position_in_grid: IVec4,
    pub _pad1: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EnvGridShaderData {
    pub center: Vec4,
    pub extent: Vec4,
    pub aabb_max: Vec4,
    pub aabb_min: Vec4,
    /// xyz = probes per axis
    pub density: UVec4,
    pub voxel_grid_aabb_max: Vec4,
    pub voxel_grid_aabb_min: Vec4,
    pub enabled_indices_mask: UVec4,
}

static_assertions::const_assert_eq!(std::mem::size_of::<SceneShaderData>(), 256);
static_assertions::const_assert_eq!(std::mem::size_of::<CameraShaderData>(), 256);
static_assertions::const_assert_eq!(std::mem::size_of::<MaterialShaderData>(), 128);
static_assertions::const_assert_eq!(std::mem::size_of::<EntityShaderData>(), 192);
static_assertions::const_assert_eq!(std::mem::size_of::<LightShaderData>(), 64);
static_assertions::const_assert_eq!(std::mem::size_of::<SkeletonShaderData>(), 64 * MAX_BONES);
static_assertions::const_assert_eq!(std::mem::size_of::<ShadowShaderData>(), 192);
static_assertions::const_assert_eq!(std::mem::size_of::<EnvProbeShaderData>(), 256);
static_assertions::const_assert_eq!(std::mem::size_of::<EnvGridShaderData>(), 128);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unorm4x8() {
        assert_eq!(pack_unorm4x8(Vec4::new(1.0, 0.0, 0.0, 1.0)), 0xFF00_00FF);
        assert_eq!(pack_unorm4x8(Vec4::new(2.0, -1.0, 0.5, 0.0)), 0x0080_00FF);
    }
}
