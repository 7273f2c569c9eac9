use crate::backend::{
    DescriptorType, Extent2d, Format, GpuBackend, ImageDesc, ImageUsage, ImageViewKind,
    ShaderStages, SubresourceRange,
};
use crate::descriptor::{Descriptor, DescriptorPool, DescriptorSetIndex, SubDescriptor};
use crate::error::{RenderError, RenderResult};
use crate::frame::ResolutionDependent;
use crate::lifecycle::DeferredRelease;
use crate::memory::{GpuImage, ImageView};

/// Binding of the per-mip storage images in the Global set.
pub const DEPTH_PYRAMID_BINDING: u32 = 8;

/// Array size of the pyramid binding; enough for a 32768 pixel extent.
pub const MAX_DEPTH_PYRAMID_MIPS: u32 = 16;

/// Hierarchical depth: an `R32Float` image with a full mip chain, reduced
/// by compute from the depth buffer each frame.
///
/// Every mip gets its own view so the reduction can read mip `n` and write
/// mip `n + 1`. The views are published as a storage-image array in the
/// Global set. The whole thing is rebuilt when the swapchain changes size.
#[derive(Debug, Default)]
pub struct DepthPyramid {
    image: Option<GpuImage>,
    mip_views: Vec<ImageView>,
    extent: Extent2d,
    published_mips: u32,
    needs_publish: bool,
}

impl DepthPyramid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the pyramid binding. Call before the pool is created.
    pub fn declare(pool: &mut DescriptorPool) {
        pool.add_descriptor_set(DescriptorSetIndex::Global).add_descriptor(
            Descriptor::new(DEPTH_PYRAMID_BINDING, DescriptorType::StorageImage)
                .with_stages(ShaderStages::COMPUTE)
                .with_count(MAX_DEPTH_PYRAMID_MIPS),
        );
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_views.len() as u32
    }

    pub fn is_created(&self) -> bool {
        self.image.as_ref().map_or(false, GpuImage::is_created)
    }

    pub fn image(&self) -> &GpuImage {
        match &self.image {
            Some(image) => image,
            None => panic!("depth pyramid used before create"),
        }
    }

    pub fn mip_view(&self, mip: u32) -> &ImageView {
        &self.mip_views[mip as usize]
    }

    /// Whether views changed since the last [`DepthPyramid::publish`].
    pub fn needs_publish(&self) -> bool {
        self.needs_publish
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend, extent: Extent2d) -> RenderResult<()> {
        crate::assert_render_thread!();
        assert!(!self.is_created(), "depth pyramid created twice");
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::InvalidParameter(format!(
                "depth pyramid extent {}x{}",
                extent.width, extent.height
            )));
        }

        let desc = ImageDesc::new_2d(
            extent.width,
            extent.height,
            Format::R32Float,
            ImageUsage::STORAGE | ImageUsage::SAMPLED,
        )
        .with_label("depth pyramid")
        .with_full_mip_chain();
        let mips = desc.mip_levels;
        if mips > MAX_DEPTH_PYRAMID_MIPS {
            return Err(RenderError::InvalidParameter(format!(
                "depth pyramid of {} mips exceeds {}",
                mips, MAX_DEPTH_PYRAMID_MIPS
            )));
        }

        let mut image = GpuImage::new(desc);
        image.create(backend)?;
        let mut views: Vec<ImageView> = Vec::with_capacity(mips as usize);
        for mip in 0..mips {
            let mut view = ImageView::new();
            let range = SubresourceRange {
                base_mip_level: mip,
                mip_level_count: 1,
                ..image.desc().full_range()
            };
            if let Err(err) = view.create_for_range(backend, &image, ImageViewKind::D2, range) {
                for view in &mut views {
                    view.destroy(backend);
                }
                image.destroy(backend);
                return Err(err);
            }
            views.push(view);
        }

        log::debug!(
            "Created depth pyramid {}x{} with {} mips",
            extent.width,
            extent.height,
            mips
        );
        self.image = Some(image);
        self.mip_views = views;
        self.extent = extent;
        self.needs_publish = true;
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        for mut view in self.mip_views.drain(..) {
            view.destroy(backend);
        }
        match self.image.take() {
            Some(mut image) => image.destroy(backend),
            None => panic!("depth pyramid destroyed before create or twice"),
        }
    }

    pub fn release(&mut self, deferred: &DeferredRelease) {
        for mut view in self.mip_views.drain(..) {
            view.release(deferred);
        }
        if let Some(mut image) = self.image.take() {
            image.release(deferred);
        }
    }

    /// Point the Global set at the current mip views. Elements past the
    /// current mip count are dropped.
    pub fn publish(&mut self, pool: &mut DescriptorPool) {
        let Some(descriptor) = pool
            .get_descriptor_set_mut(DescriptorSetIndex::Global)
            .and_then(|set| set.get_descriptor_mut(DEPTH_PYRAMID_BINDING))
        else {
            panic!("depth pyramid binding not declared in the Global set");
        };
        for (mip, view) in self.mip_views.iter().enumerate() {
            descriptor.add_sub_descriptor(SubDescriptor::storage_image(view.handle()).at(mip as u32));
        }
        for stale in self.mip_count()..self.published_mips {
            descriptor.remove_sub_descriptor(stale);
        }
        self.published_mips = self.mip_count();
        self.needs_publish = false;
    }
}

impl ResolutionDependent for DepthPyramid {
    fn on_resolution_changed(
        &mut self,
        backend: &mut dyn GpuBackend,
        deferred: &DeferredRelease,
        extent: Extent2d,
    ) -> RenderResult<()> {
        if self.is_created() {
            log::debug!(
                "Depth pyramid {}x{} -> {}x{}",
                self.extent.width,
                self.extent.height,
                extent.width,
                extent.height
            );
            self.release(deferred);
        }
        self.create(backend, extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DescriptorResource, DummyBackend};
    use crate::config::RenderConfig;

    fn pool_with_pyramid(backend: &mut DummyBackend, pyramid: &mut DepthPyramid) -> DescriptorPool {
        let mut pool = DescriptorPool::new(&RenderConfig::default());
        DepthPyramid::declare(&mut pool);
        pyramid.create(backend, Extent2d::new(1280, 720)).unwrap();
        pyramid.publish(&mut pool);
        pool.create(backend).unwrap();
        pool
    }

    #[test]
    fn test_one_view_per_mip() {
        let mut backend = DummyBackend::new();
        let mut pyramid = DepthPyramid::new();
        let mut pool = pool_with_pyramid(&mut backend, &mut pyramid);

        assert_eq!(pyramid.mip_count(), 11);
        let descriptor = pool
            .get_descriptor_set(DescriptorSetIndex::Global)
            .and_then(|set| set.get_descriptor(DEPTH_PYRAMID_BINDING))
            .unwrap();
        assert_eq!(descriptor.len(), 11);

        pyramid.destroy(&mut backend);
        pool.destroy(&mut backend);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_resize_drops_every_old_handle() {
        let mut backend = DummyBackend::new();
        let deferred = DeferredRelease::new();
        let mut pyramid = DepthPyramid::new();
        let mut pool = pool_with_pyramid(&mut backend, &mut pyramid);

        let mut old: Vec<u64> = vec![pyramid.image().handle().raw()];
        old.extend(pyramid.mip_views.iter().map(|v| v.handle().raw()));

        pyramid
            .on_resolution_changed(&mut backend, &deferred, Extent2d::new(640, 360))
            .unwrap();
        assert!(pyramid.needs_publish());
        pyramid.publish(&mut pool);
        pool.apply_updates(&mut backend).unwrap();
        deferred.flush(&mut backend).unwrap();

        assert_eq!(pyramid.mip_count(), 10);
        assert!(old.iter().all(|&raw| !backend.is_live(raw)));

        let descriptor = pool
            .get_descriptor_set(DescriptorSetIndex::Global)
            .and_then(|set| set.get_descriptor(DEPTH_PYRAMID_BINDING))
            .unwrap();
        assert_eq!(descriptor.len(), 10);
        for mip in 0..10 {
            match descriptor.get_sub_descriptor(mip) {
                Some(DescriptorResource::Image { view, .. }) => {
                    assert!(!old.contains(&view.raw()));
                    assert!(backend.is_live(view.raw()));
                }
                other => panic!("unexpected element {:?}", other),
            }
        }

        pyramid.destroy(&mut backend);
        pool.destroy(&mut backend);
    }
}
