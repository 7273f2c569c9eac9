use crate::backend::{
    GpuBackend, ImageViewDesc, ImageViewHandle, ImageViewKind, SamplerDesc, SamplerHandle,
    SubresourceRange,
};
use crate::error::RenderResult;
use crate::lifecycle::{DeferredRelease, ReleasedObject};

use super::image::GpuImage;

/// A view over a range of an image's subresources.
#[derive(Debug, Default)]
pub struct ImageView {
    handle: Option<ImageViewHandle>,
    range: Option<SubresourceRange>,
}

impl ImageView {
    pub fn new() -> Self {
        Self::default()
    }

    /// View every mip and layer of `image`.
    pub fn create(&mut self, backend: &mut dyn GpuBackend, image: &GpuImage) -> RenderResult<()> {
        let kind = if image.desc().array_layers > 1 {
            ImageViewKind::D2Array
        } else {
            ImageViewKind::D2
        };
        self.create_for_range(backend, image, kind, image.desc().full_range())
    }

    pub fn create_for_range(
        &mut self,
        backend: &mut dyn GpuBackend,
        image: &GpuImage,
        kind: ImageViewKind,
        range: SubresourceRange,
    ) -> RenderResult<()> {
        assert!(self.handle.is_none(), "image view created twice");
        let handle = backend.create_image_view(&ImageViewDesc {
            image: image.handle(),
            kind,
            format: image.format(),
            range,
        })?;
        self.handle = Some(handle);
        self.range = Some(range);
        Ok(())
    }

    pub fn is_created(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> ImageViewHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("image view used before create"),
        }
    }

    pub fn range(&self) -> Option<SubresourceRange> {
        self.range
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        let Some(handle) = self.handle.take() else {
            panic!("image view destroyed before create or twice");
        };
        backend.destroy_image_view(handle);
        self.range = None;
    }

    pub fn release(&mut self, deferred: &DeferredRelease) {
        if let Some(handle) = self.handle.take() {
            deferred.release(ReleasedObject::ImageView(handle));
        }
        self.range = None;
    }
}

#[derive(Debug, Default)]
pub struct Sampler {
    desc: SamplerDesc,
    handle: Option<SamplerHandle>,
}

impl Sampler {
    pub fn new(desc: SamplerDesc) -> Self {
        Self { desc, handle: None }
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        assert!(self.handle.is_none(), "sampler '{}' created twice", self.desc.label);
        self.handle = Some(backend.create_sampler(&self.desc)?);
        Ok(())
    }

    pub fn handle(&self) -> SamplerHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("sampler '{}' used before create", self.desc.label),
        }
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        let Some(handle) = self.handle.take() else {
            panic!("sampler '{}' destroyed before create or twice", self.desc.label);
        };
        backend.destroy_sampler(handle);
    }
}
