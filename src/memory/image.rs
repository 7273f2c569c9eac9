//! Images with per-subresource state tracking.
//!
//! A freshly created image is in a single whole-image state. Barriers on a
//! subset of mips or layers split it; the next whole-image barrier emits one
//! barrier per distinct subresource and collapses the map again.

use std::collections::HashMap;

use crate::backend::{
    BufferImageCopy, CommandBufferHandle, Filter, Format, GpuBackend, ImageBarrier, ImageBlit,
    ImageDesc, ImageHandle, ImageSubresource, ImageTiling, ResourceState, SubresourceRange,
};
use crate::error::{RenderError, RenderResult};
use crate::frame::SingleTimeCommands;
use crate::lifecycle::{DeferredRelease, ReleasedObject};

use super::buffer::{BufferType, GpuBuffer};

/// Adjustment applied when the device rejects a format/tiling/usage
/// combination. Tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatFix {
    /// Widen a one to three channel format to four channels and resample the
    /// pixel data to match.
    ExpandToFourChannels,
    /// Switch between optimal and linear tiling.
    SwitchTiling,
}

#[derive(Debug)]
pub struct GpuImage {
    desc: ImageDesc,
    handle: Option<ImageHandle>,
    bytes: Option<Vec<u8>>,
    whole_state: ResourceState,
    sub_states: HashMap<ImageSubresource, ResourceState>,
    applied_fixes: Vec<FormatFix>,
}

impl GpuImage {
    pub fn new(desc: ImageDesc) -> Self {
        Self {
            desc,
            handle: None,
            bytes: None,
            whole_state: ResourceState::Undefined,
            sub_states: HashMap::new(),
            applied_fixes: Vec::new(),
        }
    }

    /// An image whose mip 0 is initialized from `bytes` on creation. Further
    /// mips are generated when the description asks for more than one.
    pub fn with_data(desc: ImageDesc, bytes: Vec<u8>) -> Self {
        let mut image = Self::new(desc);
        image.bytes = Some(bytes);
        image
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// The format actually used, after any fallback.
    pub fn format(&self) -> Format {
        self.desc.format
    }

    /// The tiling actually used, after any fallback.
    pub fn tiling(&self) -> ImageTiling {
        self.desc.tiling
    }

    pub fn applied_fixes(&self) -> &[FormatFix] {
        &self.applied_fixes
    }

    pub fn is_created(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> ImageHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("image '{}' used before create", self.desc.label),
        }
    }

    /// Pixel data pending upload, in the resolved format.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        assert!(
            self.handle.is_none(),
            "image '{}' created twice",
            self.desc.label
        );
        self.resolve_format(backend)?;

        let handle = backend.create_image(&self.desc)?;
        self.handle = Some(handle);
        self.whole_state = ResourceState::Undefined;
        self.sub_states.clear();
        log::trace!(
            "Created image '{}' {}x{} {:?} ({} mips)",
            self.desc.label,
            self.desc.extent.width,
            self.desc.extent.height,
            self.desc.format,
            self.desc.mip_levels
        );

        if let Some(bytes) = self.bytes.take() {
            let result = self.upload(backend, &bytes);
            self.bytes = Some(bytes);
            if let Err(err) = result {
                self.destroy(backend);
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        crate::assert_render_thread!();
        let Some(handle) = self.handle.take() else {
            panic!(
                "image '{}' destroyed before create or twice",
                self.desc.label
            );
        };
        backend.destroy_image(handle);
        self.whole_state = ResourceState::Undefined;
        self.sub_states.clear();
    }

    pub fn release(&mut self, deferred: &DeferredRelease) {
        let Some(handle) = self.handle.take() else {
            panic!(
                "image '{}' released before create or twice",
                self.desc.label
            );
        };
        deferred.release(ReleasedObject::Image(handle));
        self.whole_state = ResourceState::Undefined;
        self.sub_states.clear();
    }

    /// Apply format fixes until the device accepts the description.
    fn resolve_format(&mut self, backend: &dyn GpuBackend) -> RenderResult<()> {
        let requested = self.desc.format;
        let mut remaining = vec![FormatFix::ExpandToFourChannels, FormatFix::SwitchTiling];

        loop {
            if backend.image_format_supported(self.desc.format, self.desc.tiling, self.desc.usage)
            {
                return Ok(());
            }
            let Some(fix) = self.next_applicable_fix(&mut remaining) else {
                return Err(RenderError::UnsupportedFormat {
                    format: format!("{:?}", requested),
                    reason: format!(
                        "no supported fallback for tiling {:?} and usage {:?}",
                        self.desc.tiling, self.desc.usage
                    ),
                });
            };
            self.apply_fix(fix);
        }
    }

    fn next_applicable_fix(&self, remaining: &mut Vec<FormatFix>) -> Option<FormatFix> {
        while !remaining.is_empty() {
            let fix = remaining.remove(0);
            let applicable = match fix {
                FormatFix::ExpandToFourChannels => self.desc.format.with_four_channels().is_some(),
                FormatFix::SwitchTiling => true,
            };
            if applicable {
                return Some(fix);
            }
        }
        None
    }

    fn apply_fix(&mut self, fix: FormatFix) {
        match fix {
            FormatFix::ExpandToFourChannels => {
                let Some(expanded) = self.desc.format.with_four_channels() else {
                    return;
                };
                log::debug!(
                    "Image '{}': {:?} unsupported, expanding to {:?}",
                    self.desc.label,
                    self.desc.format,
                    expanded
                );
                if let Some(bytes) = self.bytes.take() {
                    self.bytes = Some(expand_to_four_channels(&bytes, self.desc.format, expanded));
                }
                self.desc.format = expanded;
            }
            FormatFix::SwitchTiling => {
                let tiling = self.desc.tiling.other();
                log::debug!(
                    "Image '{}': {:?} tiling unsupported, switching to {:?}",
                    self.desc.label,
                    self.desc.tiling,
                    tiling
                );
                self.desc.tiling = tiling;
            }
        }
        self.applied_fixes.push(fix);
    }

    fn upload(&mut self, backend: &mut dyn GpuBackend, bytes: &[u8]) -> RenderResult<()> {
        let mut staging =
            GpuBuffer::new(BufferType::Staging).with_label(format!("{} staging", self.desc.label));
        staging.create(backend, bytes.len() as u64)?;
        let src = staging.handle();

        let result = staging.copy(backend, bytes).and_then(|_| {
            let image = &mut *self;
            let mut commands = SingleTimeCommands::new();
            commands.push(move |backend, cmd| {
                image.insert_barrier(backend, cmd, ResourceState::CopyDst);
                let desc = &image.desc;
                backend.cmd_copy_buffer_to_image(
                    cmd,
                    src,
                    image.handle(),
                    &[BufferImageCopy {
                        buffer_offset: 0,
                        aspect: desc.format.aspect(),
                        mip_level: 0,
                        base_array_layer: 0,
                        array_layer_count: desc.array_layers,
                        extent: desc.extent,
                    }],
                );
                if image.desc.mip_levels > 1 {
                    image.generate_mipmaps(backend, cmd);
                } else {
                    image.insert_barrier(backend, cmd, ResourceState::ShaderResource);
                }
                Ok(())
            });
            commands.execute(backend)
        });

        staging.destroy(backend);
        result
    }

    /// Tracked state of one subresource.
    pub fn subresource_state(&self, subresource: ImageSubresource) -> ResourceState {
        self.sub_states
            .get(&subresource)
            .copied()
            .unwrap_or(self.whole_state)
    }

    /// The whole-image state, or `None` while subresources disagree.
    pub fn state(&self) -> Option<ResourceState> {
        let full = self.desc.full_range();
        let mut states = full.subresources().map(|sub| self.subresource_state(sub));
        let first = states.next()?;
        states.all(|s| s == first).then_some(first)
    }

    /// Transition every subresource to `new_state`.
    pub fn insert_barrier(
        &mut self,
        backend: &mut dyn GpuBackend,
        cmd: CommandBufferHandle,
        new_state: ResourceState,
    ) {
        let image = self.handle();
        let full = self.desc.full_range();

        let barriers: Vec<ImageBarrier> = match self.state() {
            Some(old_state) => vec![ImageBarrier {
                image,
                old_state,
                new_state,
                range: full,
            }],
            None => full
                .subresources()
                .map(|sub| ImageBarrier {
                    image,
                    old_state: self.subresource_state(sub),
                    new_state,
                    range: SubresourceRange::single(sub.aspect, sub.mip_level, sub.array_layer),
                })
                .collect(),
        };
        backend.cmd_pipeline_barrier(cmd, &[], &barriers);

        self.whole_state = new_state;
        self.sub_states.clear();
    }

    /// Transition the subresources in `range` to `new_state`, leaving the rest
    /// untouched.
    pub fn insert_subresource_barrier(
        &mut self,
        backend: &mut dyn GpuBackend,
        cmd: CommandBufferHandle,
        range: SubresourceRange,
        new_state: ResourceState,
    ) {
        let image = self.handle();
        let barriers: Vec<ImageBarrier> = range
            .subresources()
            .map(|sub| ImageBarrier {
                image,
                old_state: self.subresource_state(sub),
                new_state,
                range: SubresourceRange::single(sub.aspect, sub.mip_level, sub.array_layer),
            })
            .collect();
        backend.cmd_pipeline_barrier(cmd, &[], &barriers);

        for sub in range.subresources() {
            self.sub_states.insert(sub, new_state);
        }
    }

    /// Fill mips 1.. by successive blits from the level above, leaving the
    /// whole image in `ShaderResource`.
    pub fn generate_mipmaps(&mut self, backend: &mut dyn GpuBackend, cmd: CommandBufferHandle) {
        let image = self.handle();
        let aspect = self.desc.format.aspect();
        let layers = self.desc.array_layers;
        let mip_range = |level: u32| SubresourceRange {
            aspect,
            base_mip_level: level,
            mip_level_count: 1,
            base_array_layer: 0,
            array_layer_count: layers,
        };

        for level in 1..self.desc.mip_levels {
            self.insert_subresource_barrier(
                backend,
                cmd,
                mip_range(level - 1),
                ResourceState::CopySrc,
            );
            self.insert_subresource_barrier(backend, cmd, mip_range(level), ResourceState::CopyDst);
            backend.cmd_blit_image(
                cmd,
                image,
                image,
                &ImageBlit {
                    aspect,
                    src_mip_level: level - 1,
                    src_extent: self.desc.extent.mip(level - 1),
                    dst_mip_level: level,
                    dst_extent: self.desc.extent.mip(level),
                    base_array_layer: 0,
                    array_layer_count: layers,
                },
                Filter::Linear,
            );
        }
        self.insert_barrier(backend, cmd, ResourceState::ShaderResource);
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        if self.handle.is_some() {
            log::error!(
                "GpuImage '{}' dropped without destroy",
                self.desc.label
            );
        }
    }
}

/// Resample tightly packed pixels from `src` to the four-channel `dst` format.
/// Missing color channels are zero, missing alpha is opaque.
pub fn expand_to_four_channels(bytes: &[u8], src: Format, dst: Format) -> Vec<u8> {
    let src_channels = src.channel_count() as usize;
    let channel_size = src.bytes_per_channel() as usize;
    debug_assert_eq!(channel_size, dst.bytes_per_channel() as usize);
    debug_assert_eq!(dst.channel_count(), 4);

    let opaque: Vec<u8> = match channel_size {
        1 => vec![0xFF],
        2 => 0x3C00u16.to_le_bytes().to_vec(),
        _ => 1.0f32.to_le_bytes().to_vec(),
    };

    let src_pixel = src_channels * channel_size;
    let mut out = Vec::with_capacity(bytes.len() / src_pixel * 4 * channel_size);
    for pixel in bytes.chunks_exact(src_pixel) {
        out.extend_from_slice(pixel);
        for channel in src_channels..4 {
            if channel == 3 {
                out.extend_from_slice(&opaque);
            } else {
                out.extend(std::iter::repeat(0u8).take(channel_size));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyOp, ImageAspect, ImageUsage};

    fn sampled(width: u32, height: u32, format: Format) -> ImageDesc {
        ImageDesc::new_2d(
            width,
            height,
            format,
            ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST | ImageUsage::TRANSFER_SRC,
        )
    }

    #[test]
    fn test_expand_rgb8_to_rgba8() {
        let out = expand_to_four_channels(&[1, 2, 3, 4, 5, 6], Format::Rgb8Unorm, Format::Rgba8Unorm);
        assert_eq!(out, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn test_expand_r32f_to_rgba32f() {
        let out = expand_to_four_channels(
            &2.5f32.to_le_bytes(),
            Format::R32Float,
            Format::Rgba32Float,
        );
        let floats: &[f32] = bytemuck::cast_slice(&out);
        assert_eq!(floats, &[2.5, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_fallback_expands_channels_first() {
        let mut backend = DummyBackend::new();
        backend.mark_format_unsupported(Format::Rgb8Unorm, ImageTiling::Optimal);
        let mut image = GpuImage::with_data(sampled(2, 1, Format::Rgb8Unorm), vec![0; 6]);
        image.create(&mut backend).unwrap();

        assert_eq!(image.format(), Format::Rgba8Unorm);
        assert_eq!(image.applied_fixes(), &[FormatFix::ExpandToFourChannels]);
        assert_eq!(image.bytes().map(|b| b.len()), Some(8));
        assert_eq!(image.tiling(), ImageTiling::Optimal);
        image.destroy(&mut backend);
    }

    #[test]
    fn test_fallback_switches_tiling() {
        let mut backend = DummyBackend::new();
        backend.mark_format_unsupported(Format::Rgba16Float, ImageTiling::Optimal);
        let mut image = GpuImage::new(sampled(4, 4, Format::Rgba16Float));
        image.create(&mut backend).unwrap();

        assert_eq!(image.applied_fixes(), &[FormatFix::SwitchTiling]);
        assert_eq!(image.tiling(), ImageTiling::Linear);
        image.destroy(&mut backend);
    }

    #[test]
    fn test_no_fallback_is_unsupported_format() {
        let mut backend = DummyBackend::new();
        backend.mark_format_unsupported(Format::Depth32Float, ImageTiling::Optimal);
        backend.mark_format_unsupported(Format::Depth32Float, ImageTiling::Linear);
        let mut image = GpuImage::new(ImageDesc::new_2d(
            4,
            4,
            Format::Depth32Float,
            ImageUsage::DEPTH_STENCIL_ATTACHMENT,
        ));

        let err = image.create(&mut backend).unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedFormat { .. }));
        assert!(!image.is_created());
        assert_eq!(backend.live_image_count(), 0);
    }

    #[test]
    fn test_upload_generates_mips() {
        let mut backend = DummyBackend::new();
        let desc = sampled(8, 8, Format::Rgba8Unorm).with_full_mip_chain();
        let mut image = GpuImage::with_data(desc, vec![0; 8 * 8 * 4]);
        image.create(&mut backend).unwrap();

        assert_eq!(
            backend.count_ops(|op| matches!(op, DummyOp::BlitImage { .. })),
            3
        );
        assert_eq!(image.state(), Some(ResourceState::ShaderResource));
        assert_eq!(backend.live_buffer_count(), 0);
        image.destroy(&mut backend);
    }

    #[test]
    fn test_subresource_barrier_splits_state() {
        let mut backend = DummyBackend::new();
        let mut image = GpuImage::new(sampled(4, 4, Format::Rgba8Unorm).with_mip_levels(3));
        image.create(&mut backend).unwrap();

        let mut commands = SingleTimeCommands::new();
        let target = &mut image;
        commands.push(move |backend, cmd| {
            target.insert_subresource_barrier(
                backend,
                cmd,
                SubresourceRange::single(ImageAspect::COLOR, 1, 0),
                ResourceState::UnorderedAccess,
            );
            assert_eq!(target.state(), None);
            assert_eq!(
                target.subresource_state(ImageSubresource {
                    aspect: ImageAspect::COLOR,
                    array_layer: 0,
                    mip_level: 1,
                }),
                ResourceState::UnorderedAccess
            );
            target.insert_barrier(backend, cmd, ResourceState::ShaderResource);
            Ok(())
        });
        commands.execute(&mut backend).unwrap();

        // The whole-image transition had to emit one barrier per mip.
        let last = backend
            .ops()
            .iter()
            .rev()
            .find_map(|op| match op {
                DummyOp::PipelineBarrier { images, .. } => Some(images.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last.len(), 3);
        assert_eq!(last[1].old_state, ResourceState::UnorderedAccess);
        assert_eq!(image.state(), Some(ResourceState::ShaderResource));
        image.destroy(&mut backend);
    }
}
