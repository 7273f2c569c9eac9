//! Backend-neutral descriptions of GPU objects and commands.
//!
//! Everything here is plain data. The Vulkan backend converts these into
//! `ash` structures in `vulkan::conversion`; the dummy backend records them.

use bitflags::bitflags;

use super::traits::{
    AccelerationStructureHandle, BufferHandle, CommandBufferHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, FenceHandle, ImageHandle, ImageViewHandle, PipelineLayoutHandle,
    SamplerHandle, SemaphoreHandle,
};

// ---------------------------------------------------------------------------
// Buffers
// ---------------------------------------------------------------------------

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDIRECT = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
        /// Buffer exposes a device address (`vkGetBufferDeviceAddress`).
        const SHADER_DEVICE_ADDRESS = 1 << 7;
        /// Backing storage for an acceleration structure.
        const ACCELERATION_STRUCTURE_STORAGE = 1 << 8;
        /// Read-only input to an acceleration structure build.
        const ACCELERATION_STRUCTURE_BUILD_INPUT = 1 << 9;
        const SHADER_BINDING_TABLE = 1 << 10;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where an allocation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// Device-local, not host visible. Filled through a staging copy.
    #[default]
    GpuOnly,
    /// Host-visible, persistently mapped, used for uploads.
    CpuToGpu,
    /// Host-visible, used for readback.
    GpuToCpu,
}

impl MemoryLocation {
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryLocation::GpuOnly)
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage, location: MemoryLocation) -> Self {
        Self {
            label: String::new(),
            size,
            usage,
            location,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// A region copied between two buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Image formats used by the render core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    R8Unorm,
    Rg8Unorm,
    Rgb8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    R16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    Depth32Float,
    Depth24Stencil8,
}

impl Format {
    pub fn channel_count(self) -> u32 {
        match self {
            Format::R8Unorm | Format::R16Float | Format::R32Float | Format::Depth32Float => 1,
            Format::Rg8Unorm | Format::Rg32Float | Format::Depth24Stencil8 => 2,
            Format::Rgb8Unorm | Format::Rgb32Float => 3,
            Format::Rgba8Unorm
            | Format::Rgba8Srgb
            | Format::Bgra8Unorm
            | Format::Bgra8Srgb
            | Format::Rgba16Float
            | Format::Rgba32Float => 4,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::R8Unorm => 1,
            Format::Rg8Unorm | Format::R16Float => 2,
            Format::Rgb8Unorm => 3,
            Format::Rgba8Unorm
            | Format::Rgba8Srgb
            | Format::Bgra8Unorm
            | Format::Bgra8Srgb
            | Format::R32Float
            | Format::Depth32Float
            | Format::Depth24Stencil8 => 4,
            Format::Rgba16Float | Format::Rg32Float => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float => 16,
        }
    }

    /// Bytes per channel, assuming all channels have the same width.
    pub fn bytes_per_channel(self) -> u32 {
        self.bytes_per_pixel() / self.channel_count()
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::Depth32Float | Format::Depth24Stencil8)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::Depth24Stencil8)
    }

    /// Aspect covering every plane of the format.
    pub fn aspect(self) -> ImageAspect {
        if self.has_stencil() {
            ImageAspect::DEPTH | ImageAspect::STENCIL
        } else if self.is_depth() {
            ImageAspect::DEPTH
        } else {
            ImageAspect::COLOR
        }
    }

    /// The four-channel format with the same channel width, if there is one.
    pub fn with_four_channels(self) -> Option<Format> {
        match self {
            Format::R8Unorm | Format::Rg8Unorm | Format::Rgb8Unorm => Some(Format::Rgba8Unorm),
            Format::R32Float | Format::Rg32Float | Format::Rgb32Float => Some(Format::Rgba32Float),
            Format::R16Float => Some(Format::Rgba16Float),
            _ => None,
        }
    }
}

/// Memory arrangement of image texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageTiling {
    #[default]
    Optimal,
    Linear,
}

impl ImageTiling {
    pub fn other(self) -> ImageTiling {
        match self {
            ImageTiling::Optimal => ImageTiling::Linear,
            ImageTiling::Linear => ImageTiling::Optimal,
        }
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

bitflags! {
    /// Image planes addressed by a subresource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageAspect: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Extent of the given mip level, clamped to one texel.
    pub fn mip(self, level: u32) -> Extent3d {
        Extent3d {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: (self.depth >> level).max(1),
        }
    }

    /// Number of mips in a full chain down to 1x1x1.
    pub fn full_mip_count(self) -> u32 {
        let largest = self.width.max(self.height).max(self.depth).max(1);
        32 - largest.leading_zeros()
    }

    pub fn texel_count(self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }
}

impl From<Extent2d> for Extent3d {
    fn from(extent: Extent2d) -> Self {
        Extent3d::new(extent.width, extent.height, 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageKind {
    #[default]
    D2,
    D3,
    /// Six-layer cube-compatible 2D image.
    Cube,
}

/// Descriptor for creating an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    pub label: String,
    pub kind: ImageKind,
    pub extent: Extent3d,
    pub format: Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub tiling: ImageTiling,
    pub usage: ImageUsage,
}

impl ImageDesc {
    pub fn new_2d(width: u32, height: u32, format: Format, usage: ImageUsage) -> Self {
        Self {
            label: String::new(),
            kind: ImageKind::D2,
            extent: Extent3d::new(width, height, 1),
            format,
            mip_levels: 1,
            array_layers: 1,
            tiling: ImageTiling::Optimal,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Request a full mip chain for the image extent.
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = self.extent.full_mip_count();
        self
    }

    pub fn full_range(&self) -> SubresourceRange {
        SubresourceRange {
            aspect: self.format.aspect(),
            base_mip_level: 0,
            mip_level_count: self.mip_levels,
            base_array_layer: 0,
            array_layer_count: self.array_layers,
        }
    }
}

/// A range of mips and array layers of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub aspect: ImageAspect,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

impl SubresourceRange {
    /// A single mip of a single layer.
    pub fn single(aspect: ImageAspect, mip_level: u32, array_layer: u32) -> Self {
        Self {
            aspect,
            base_mip_level: mip_level,
            mip_level_count: 1,
            base_array_layer: array_layer,
            array_layer_count: 1,
        }
    }

    pub fn subresources(&self) -> impl Iterator<Item = ImageSubresource> + '_ {
        (self.base_array_layer..self.base_array_layer + self.array_layer_count).flat_map(
            move |layer| {
                (self.base_mip_level..self.base_mip_level + self.mip_level_count).map(move |mip| {
                    ImageSubresource {
                        aspect: self.aspect,
                        array_layer: layer,
                        mip_level: mip,
                    }
                })
            },
        )
    }
}

/// A single (aspect, layer, mip) subresource, the key of per-subresource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSubresource {
    pub aspect: ImageAspect,
    pub array_layer: u32,
    pub mip_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageViewKind {
    D2,
    D2Array,
    D3,
    Cube,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageViewDesc {
    pub image: ImageHandle,
    pub kind: ImageViewKind,
    pub format: Format,
    pub range: SubresourceRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub label: String,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mipmap_filter: Filter,
    pub address_mode: AddressMode,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            label: String::new(),
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            mipmap_filter: Filter::Linear,
            address_mode: AddressMode::Repeat,
            max_lod: 1000.0,
        }
    }
}

/// A buffer to image copy covering one mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub aspect: ImageAspect,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
    pub extent: Extent3d,
}

/// A blit from one mip level to another of the same image or another image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBlit {
    pub aspect: ImageAspect,
    pub src_mip_level: u32,
    pub src_extent: Extent3d,
    pub dst_mip_level: u32,
    pub dst_extent: Extent3d,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

// ---------------------------------------------------------------------------
// Resource states and barriers
// ---------------------------------------------------------------------------

/// How a buffer or image is currently being used by the GPU.
///
/// Barriers are computed from the tracked old state to the requested new
/// state; nothing transitions implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    #[default]
    Undefined,
    Common,
    VertexBuffer,
    ConstantBuffer,
    IndexBuffer,
    RenderTarget,
    UnorderedAccess,
    DepthStencil,
    ShaderResource,
    IndirectArg,
    CopyDst,
    CopySrc,
    Present,
    ReadGeneric,
    AccelerationStructureRead,
    AccelerationStructureWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub old_state: ResourceState,
    pub new_state: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub old_state: ResourceState,
    pub new_state: ResourceState,
    pub range: SubresourceRange,
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

bitflags! {
    /// Shader stages a binding or push constant range is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const GEOMETRY = 1 << 2;
        const COMPUTE = 1 << 3;
        const RAYGEN = 1 << 4;
        const MISS = 1 << 5;
        const CLOSEST_HIT = 1 << 6;
        const ANY_HIT = 1 << 7;
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits() | Self::GEOMETRY.bits();
        const ALL_RAY_TRACING = Self::RAYGEN.bits() | Self::MISS.bits() | Self::CLOSEST_HIT.bits() | Self::ANY_HIT.bits();
        const ALL = Self::ALL_GRAPHICS.bits() | Self::COMPUTE.bits() | Self::ALL_RAY_TRACING.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorType {
    UniformBuffer,
    UniformBufferDynamic,
    StorageBuffer,
    StorageBufferDynamic,
    CombinedImageSampler,
    SampledImage,
    Sampler,
    StorageImage,
    AccelerationStructure,
}

impl DescriptorType {
    pub const ALL: [DescriptorType; 9] = [
        DescriptorType::UniformBuffer,
        DescriptorType::UniformBufferDynamic,
        DescriptorType::StorageBuffer,
        DescriptorType::StorageBufferDynamic,
        DescriptorType::CombinedImageSampler,
        DescriptorType::SampledImage,
        DescriptorType::Sampler,
        DescriptorType::StorageImage,
        DescriptorType::AccelerationStructure,
    ];

    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBufferDynamic | DescriptorType::StorageBufferDynamic
        )
    }

    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBuffer
                | DescriptorType::UniformBufferDynamic
                | DescriptorType::StorageBuffer
                | DescriptorType::StorageBufferDynamic
        )
    }
}

bitflags! {
    /// Per-binding flags from descriptor indexing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DescriptorBindingFlags: u32 {
        const PARTIALLY_BOUND = 1 << 0;
        const VARIABLE_DESCRIPTOR_COUNT = 1 << 1;
        const UPDATE_AFTER_BIND = 1 << 2;
    }
}

impl Default for DescriptorBindingFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub stages: ShaderStages,
    pub flags: DescriptorBindingFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptorSetLayoutDesc {
    pub bindings: Vec<DescriptorSetLayoutBinding>,
    /// Layout may only be allocated from update-after-bind pools.
    pub update_after_bind_pool: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    pub ty: DescriptorType,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPoolDesc {
    pub max_sets: u32,
    pub sizes: Vec<DescriptorPoolSize>,
    pub update_after_bind: bool,
}

impl DescriptorPoolDesc {
    /// A pool holding `per_type` descriptors of every descriptor type.
    pub fn uniform(max_sets: u32, per_type: u32, update_after_bind: bool) -> Self {
        Self {
            max_sets,
            sizes: DescriptorType::ALL
                .iter()
                .map(|&ty| DescriptorPoolSize {
                    ty,
                    count: per_type,
                })
                .collect(),
            update_after_bind,
        }
    }
}

/// The resource a single descriptor array element points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    Image {
        view: ImageViewHandle,
        sampler: Option<SamplerHandle>,
        state: ResourceState,
    },
    Sampler(SamplerHandle),
    AccelerationStructure(AccelerationStructureHandle),
}

/// One element write into a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: DescriptorSetHandle,
    pub binding: u32,
    pub array_element: u32,
    pub ty: DescriptorType,
    pub resource: DescriptorResource,
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
    RayTracing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineLayoutDesc {
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constants: Vec<PushConstantRange>,
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDesc<'a> {
    pub label: &'a str,
    pub layout: PipelineLayoutHandle,
    pub spirv: &'a [u32],
    pub entry_point: &'a str,
}

// ---------------------------------------------------------------------------
// Commands, queues and synchronization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    Primary,
    Secondary,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandBufferUsage: u32 {
        const ONE_TIME_SUBMIT = 1 << 0;
        const RENDER_PASS_CONTINUE = 1 << 1;
        const SIMULTANEOUS_USE = 1 << 2;
    }
}

/// Attachment formats a secondary command buffer will be executed inside of.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandBufferInheritance {
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
        const ACCELERATION_STRUCTURE_BUILD = 1 << 11;
        const RAY_TRACING_SHADER = 1 << 12;
        const ALL_COMMANDS = 1 << 13;
    }
}

/// A queue submission. Each wait semaphore carries the stages that wait on it.
#[derive(Debug, Clone, Copy)]
pub struct SubmitInfo<'a> {
    pub command_buffers: &'a [CommandBufferHandle],
    pub waits: &'a [(SemaphoreHandle, PipelineStages)],
    pub signals: &'a [SemaphoreHandle],
    pub fence: Option<FenceHandle>,
}

/// Outcome of a bounded fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    Timeout,
}

/// A swapchain image acquired for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The surface still works but no longer matches the swapchain exactly.
    pub suboptimal: bool,
}

// ---------------------------------------------------------------------------
// Acceleration structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationStructureKind {
    BottomLevel,
    TopLevel,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccelerationStructureBuildFlags: u32 {
        const PREFER_FAST_TRACE = 1 << 0;
        const PREFER_FAST_BUILD = 1 << 1;
        const ALLOW_UPDATE = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationStructureBuildMode {
    /// Build from scratch into `dst`.
    Build,
    /// Refit `src` into `dst`; requires `ALLOW_UPDATE` on the original build.
    Update,
}

/// Geometry consumed by an acceleration structure build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationStructureGeometry {
    /// Indexed triangles with `Rgb32Float` positions and `u32` indices.
    Triangles {
        vertex_address: u64,
        vertex_stride: u64,
        max_vertex: u32,
        index_address: u64,
        primitive_count: u32,
        opaque: bool,
    },
    /// Tightly packed instance records.
    Instances { address: u64, count: u32 },
}

impl AccelerationStructureGeometry {
    pub fn primitive_count(&self) -> u32 {
        match *self {
            AccelerationStructureGeometry::Triangles {
                primitive_count, ..
            } => primitive_count,
            AccelerationStructureGeometry::Instances { count, .. } => count,
        }
    }
}

/// Sizes reported by the device for an acceleration structure build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccelerationStructureBuildSizes {
    pub acceleration_structure_size: u64,
    pub build_scratch_size: u64,
    pub update_scratch_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelerationStructureDesc {
    pub kind: AccelerationStructureKind,
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

/// A recorded acceleration structure build or update.
#[derive(Debug, Clone, Copy)]
pub struct AccelerationStructureBuild<'a> {
    pub kind: AccelerationStructureKind,
    pub flags: AccelerationStructureBuildFlags,
    pub mode: AccelerationStructureBuildMode,
    pub src: Option<AccelerationStructureHandle>,
    pub dst: AccelerationStructureHandle,
    pub geometries: &'a [AccelerationStructureGeometry],
    pub scratch_address: u64,
}

// ---------------------------------------------------------------------------
// Device capabilities
// ---------------------------------------------------------------------------

/// Capabilities discovered when the device was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub device_name: String,
    /// Acceleration structure extension and its features are enabled.
    pub raytracing: bool,
    /// Descriptor indexing with partially-bound, variable-count and
    /// update-after-bind descriptors is enabled.
    pub bindless: bool,
    pub buffer_device_address: bool,
    pub max_bound_descriptor_sets: u32,
    pub max_bindless_resources: u32,
    pub min_uniform_buffer_offset_alignment: u64,
    pub min_storage_buffer_offset_alignment: u64,
    pub min_acceleration_structure_scratch_offset_alignment: u64,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            raytracing: false,
            bindless: false,
            buffer_device_address: false,
            max_bound_descriptor_sets: 8,
            max_bindless_resources: 0,
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
            min_acceleration_structure_scratch_offset_alignment: 256,
        }
    }
}

/// Round `value` up to a multiple of `alignment` (a power of two or zero).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_chain() {
        let extent = Extent3d::new(1024, 512, 1);
        assert_eq!(extent.full_mip_count(), 11);
        assert_eq!(extent.mip(1), Extent3d::new(512, 256, 1));
        assert_eq!(extent.mip(10), Extent3d::new(1, 1, 1));
        assert_eq!(Extent3d::new(1, 1, 1).full_mip_count(), 1);
    }

    #[test]
    fn test_four_channel_expansion() {
        assert_eq!(Format::Rgb8Unorm.with_four_channels(), Some(Format::Rgba8Unorm));
        assert_eq!(Format::Rgb32Float.with_four_channels(), Some(Format::Rgba32Float));
        assert_eq!(Format::Rgba8Unorm.with_four_channels(), None);
        assert_eq!(Format::Rgb32Float.bytes_per_channel(), 4);
    }

    #[test]
    fn test_subresource_iteration() {
        let range = SubresourceRange {
            aspect: ImageAspect::COLOR,
            base_mip_level: 1,
            mip_level_count: 2,
            base_array_layer: 0,
            array_layer_count: 2,
        };
        let all: Vec<_> = range.subresources().collect();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].mip_level, 1);
        assert_eq!(all[3].array_layer, 1);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(512, 256), 512);
        assert_eq!(align_up(7, 0), 7);
    }
}
