//! CPU-side objects that own a shader-data slot.
//!
//! A proxy keeps its state on the CPU and a dirty flag. The render thread
//! calls [`EnqueueRenderUpdates::enqueue_render_updates`] once per frame,
//! which packs the state into the proxy's slot only when it changed. This is
//! the only path from object state to shader-visible memory.

use glam::{Vec3, Vec4};

use crate::error::RenderResult;

use super::globals::ShaderGlobals;
use super::structs::{pack_unorm4x8, LightShaderData, MaterialShaderData, MAX_MATERIAL_TEXTURES};
use super::ticket::Ticket;

/// Implemented by everything whose state is mirrored into a shader-data slot.
pub trait EnqueueRenderUpdates {
    /// Write the packed shader struct into the object's slot if its CPU state
    /// changed since the last call. Returns whether a write happened.
    fn enqueue_render_updates(&mut self, globals: &ShaderGlobals) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    Directional = 0,
    Point = 1,
    Spot = 2,
    AreaRect = 3,
}

#[derive(Debug)]
pub struct LightProxy {
    ticket: Ticket,
    light_type: LightType,
    position: Vec3,
    normal: Vec3,
    color: Vec4,
    intensity: f32,
    radius: f32,
    falloff: f32,
    shadow_map: Ticket,
    dirty: bool,
}

impl LightProxy {
    pub fn new(globals: &ShaderGlobals, light_type: LightType) -> RenderResult<Self> {
        Ok(Self {
            ticket: globals.lights.acquire_ticket()?,
            light_type,
            position: Vec3::ZERO,
            normal: Vec3::NEG_Y,
            color: Vec4::ONE,
            intensity: 1.0,
            radius: 10.0,
            falloff: 1.0,
            shadow_map: 0,
            dirty: true,
        })
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    pub fn set_normal(&mut self, normal: Vec3) {
        self.normal = normal;
        self.dirty = true;
    }

    pub fn set_color(&mut self, color: Vec4) {
        self.color = color;
        self.dirty = true;
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity;
        self.dirty = true;
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
        self.dirty = true;
    }

    pub fn set_falloff(&mut self, falloff: f32) {
        self.falloff = falloff;
        self.dirty = true;
    }

    pub fn set_shadow_map(&mut self, shadow_map: Ticket) {
        self.shadow_map = shadow_map;
        self.dirty = true;
    }

    pub fn shader_data(&self) -> LightShaderData {
        LightShaderData {
            position_intensity: self.position.extend(self.intensity),
            normal: self.normal.extend(0.0),
            color_packed: pack_unorm4x8(self.color),
            light_type: self.light_type as u32,
            radius: self.radius,
            falloff: self.falloff,
            area_size: glam::Vec2::ZERO,
            shadow_map_index: self.shadow_map,
            _pad: 0,
        }
    }

    /// Give the slot back. The slot is zeroed before it can be reused.
    pub fn release(self, globals: &ShaderGlobals) {
        globals.lights.release_ticket(self.ticket);
    }
}

impl EnqueueRenderUpdates for LightProxy {
    fn enqueue_render_updates(&mut self, globals: &ShaderGlobals) -> bool {
        if !self.dirty {
            return false;
        }
        globals.lights.set(self.ticket, self.shader_data());
        self.dirty = false;
        true
    }
}

#[derive(Debug)]
pub struct MaterialProxy {
    ticket: Ticket,
    albedo: Vec4,
    roughness: f32,
    metalness: f32,
    textures: [u32; MAX_MATERIAL_TEXTURES],
    dirty: bool,
}

impl MaterialProxy {
    pub fn new(globals: &ShaderGlobals) -> RenderResult<Self> {
        Ok(Self {
            ticket: globals.materials.acquire_ticket()?,
            albedo: Vec4::ONE,
            roughness: 0.5,
            metalness: 0.0,
            textures: [0; MAX_MATERIAL_TEXTURES],
            dirty: true,
        })
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn set_albedo(&mut self, albedo: Vec4) {
        self.albedo = albedo;
        self.dirty = true;
    }

    pub fn set_roughness(&mut self, roughness: f32) {
        self.roughness = roughness;
        self.dirty = true;
    }

    pub fn set_metalness(&mut self, metalness: f32) {
        self.metalness = metalness;
        self.dirty = true;
    }

    /// Point texture slot `slot` at bindless index `index`; 0 clears it.
    pub fn set_texture(&mut self, slot: usize, index: u32) {
        assert!(slot < MAX_MATERIAL_TEXTURES, "material texture slot {} out of range", slot);
        self.textures[slot] = index;
        self.dirty = true;
    }

    pub fn shader_data(&self) -> MaterialShaderData {
        let texture_usage = self
            .textures
            .iter()
            .enumerate()
            .filter(|(_, index)| **index != 0)
            .fold(0u32, |mask, (slot, _)| mask | (1 << slot));
        MaterialShaderData {
            albedo: self.albedo,
            packed_params: glam::UVec4::new(
                pack_unorm4x8(Vec4::new(self.roughness, self.metalness, 0.0, 1.0)),
                0,
                0,
                0,
            ),
            uv_scale: glam::Vec2::ONE,
            parallax_height: 0.0,
            alpha_threshold: 0.0,
            texture_indices: self.textures,
            texture_usage,
            _pad: [0; 3],
        }
    }

    pub fn release(self, globals: &ShaderGlobals) {
        globals.materials.release_ticket(self.ticket);
    }
}

impl EnqueueRenderUpdates for MaterialProxy {
    fn enqueue_render_updates(&mut self, globals: &ShaderGlobals) -> bool {
        if !self.dirty {
            return false;
        }
        globals.materials.set(self.ticket, self.shader_data());
        self.dirty = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RenderConfig, ShaderDataBudgets};

    fn globals() -> ShaderGlobals {
        ShaderGlobals::new(
            &RenderConfig::default().with_shader_data_budgets(ShaderDataBudgets::small()),
        )
    }

    #[test]
    fn test_light_writes_only_when_dirty() {
        let globals = globals();
        let mut light = LightProxy::new(&globals, LightType::Point).unwrap();
        assert!(light.enqueue_render_updates(&globals));
        assert!(!light.enqueue_render_updates(&globals));

        light.set_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert!(light.is_dirty());
        assert!(light.enqueue_render_updates(&globals));
        let data = globals.lights.get(light.ticket());
        assert_eq!(data.color_packed, 0xFF00_00FF);
        assert_eq!(data.light_type, LightType::Point as u32);
    }

    #[test]
    fn test_material_texture_mask() {
        let globals = globals();
        let mut material = MaterialProxy::new(&globals).unwrap();
        material.set_texture(0, 12);
        material.set_texture(3, 40);
        material.enqueue_render_updates(&globals);
        let data = globals.materials.get(material.ticket());
        assert_eq!(data.texture_usage, 0b1001);
        assert_eq!(data.texture_indices[3], 40);
    }

    #[test]
    fn test_release_returns_zeroed_slot() {
        let globals = globals();
        let mut material = MaterialProxy::new(&globals).unwrap();
        let ticket = material.ticket();
        material.set_albedo(Vec4::new(0.2, 0.4, 0.6, 1.0));
        material.enqueue_render_updates(&globals);
        material.release(&globals);
        assert_eq!(globals.materials.get(ticket).albedo, Vec4::ZERO);
        assert_eq!(globals.materials.live_count(), 0);
    }
}
