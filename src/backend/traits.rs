//! Core backend abstraction traits
//!
//! Every GPU call made by the render core goes through [`GpuBackend`]. Objects
//! are referred to by small copyable handles; the backend owns the real API
//! objects behind them.

use thiserror::Error;

use crate::backend::types::*;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("descriptor pool out of memory")]
    OutOfPoolMemory,
    #[error("descriptor pool fragmented")]
    FragmentedPool,
    #[error("surface out of date")]
    SurfaceOutOfDate,
    #[error("surface lost")]
    SurfaceLost,
    #[error("out of memory")]
    OutOfMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("invalid {0} handle")]
    InvalidHandle(&'static str),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("{call} failed with status {code}")]
    Api { call: &'static str, code: i32 },
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u64);

            impl $name {
                /// Raw backend-assigned id.
                pub fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

define_handle!(
    /// Handle to a GPU buffer
    BufferHandle,
    /// Handle to a GPU image
    ImageHandle,
    /// Handle to an image view
    ImageViewHandle,
    /// Handle to a sampler
    SamplerHandle,
    DescriptorSetLayoutHandle,
    DescriptorPoolHandle,
    DescriptorSetHandle,
    PipelineLayoutHandle,
    PipelineHandle,
    CommandBufferHandle,
    FenceHandle,
    SemaphoreHandle,
    AccelerationStructureHandle,
);

/// Main GPU backend trait.
///
/// The trait is object safe; the render core passes `&mut dyn GpuBackend`
/// everywhere so the same code drives the Vulkan device and the recording
/// dummy used in tests.
pub trait GpuBackend {
    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Capabilities discovered at device creation.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Whether an image with this format, tiling and usage can be created.
    fn image_format_supported(&self, format: Format, tiling: ImageTiling, usage: ImageUsage)
        -> bool;

    // Buffers

    fn create_buffer(&mut self, desc: &BufferDesc) -> BackendResult<BufferHandle>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Write into a host-visible buffer through its persistent mapping.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    /// Read from a host-visible buffer through its persistent mapping.
    fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, out: &mut [u8])
        -> BackendResult<()>;

    /// Device address of a buffer created with `SHADER_DEVICE_ADDRESS`.
    fn buffer_device_address(&self, buffer: BufferHandle) -> BackendResult<u64>;

    // Images

    fn create_image(&mut self, desc: &ImageDesc) -> BackendResult<ImageHandle>;

    fn destroy_image(&mut self, image: ImageHandle);

    fn create_image_view(&mut self, desc: &ImageViewDesc) -> BackendResult<ImageViewHandle>;

    fn destroy_image_view(&mut self, view: ImageViewHandle);

    fn create_sampler(&mut self, desc: &SamplerDesc) -> BackendResult<SamplerHandle>;

    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    // Descriptors

    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDesc,
    ) -> BackendResult<DescriptorSetLayoutHandle>;

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDesc,
    ) -> BackendResult<DescriptorPoolHandle>;

    /// Destroys the pool and implicitly frees every set allocated from it.
    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle);

    /// Allocate a set. `variable_count` is the element count of a trailing
    /// variable-count binding. Exhaustion is reported as
    /// [`BackendError::OutOfPoolMemory`] or [`BackendError::FragmentedPool`].
    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        variable_count: Option<u32>,
    ) -> BackendResult<DescriptorSetHandle>;

    /// Apply all writes in a single batched update.
    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]) -> BackendResult<()>;

    // Pipelines

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDesc,
    ) -> BackendResult<PipelineLayoutHandle>;

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle);

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc<'_>,
    ) -> BackendResult<PipelineHandle>;

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    // Command buffers

    fn allocate_command_buffer(
        &mut self,
        level: CommandBufferLevel,
    ) -> BackendResult<CommandBufferHandle>;

    fn free_command_buffer(&mut self, cmd: CommandBufferHandle);

    fn begin_command_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
        inheritance: Option<&CommandBufferInheritance>,
    ) -> BackendResult<()>;

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()>;

    fn reset_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()>;

    // Recording

    fn cmd_pipeline_barrier(
        &mut self,
        cmd: CommandBufferHandle,
        buffer_barriers: &[BufferBarrier],
        image_barriers: &[ImageBarrier],
    );

    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    );

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        regions: &[BufferImageCopy],
    );

    fn cmd_blit_image(
        &mut self,
        cmd: CommandBufferHandle,
        src: ImageHandle,
        dst: ImageHandle,
        blit: &ImageBlit,
        filter: Filter,
    );

    fn cmd_clear_color_image(
        &mut self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        color: [f32; 4],
        range: &SubresourceRange,
    );

    fn cmd_bind_pipeline(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    );

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    );

    fn cmd_push_constants(
        &mut self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    );

    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32);

    fn cmd_execute_commands(&mut self, cmd: CommandBufferHandle, secondaries: &[CommandBufferHandle]);

    // Queue

    fn submit(&mut self, info: &SubmitInfo<'_>) -> BackendResult<()>;

    fn wait_idle(&mut self) -> BackendResult<()>;

    // Synchronization

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle>;

    fn destroy_fence(&mut self, fence: FenceHandle);

    /// Wait up to `timeout_ns`. A timeout is not an error.
    fn wait_for_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> BackendResult<FenceWait>;

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()>;

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle>;

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    // Swapchain

    fn swapchain_extent(&self) -> Extent2d;

    fn swapchain_format(&self) -> Format;

    fn swapchain_image_count(&self) -> u32;

    /// The swapchain image at `index`, valid until the next recreation.
    fn swapchain_image(&self, index: u32) -> ImageHandle;

    /// Acquire the next image, signalling `signal` when it is ready.
    /// An out-of-date surface is reported as [`BackendError::SurfaceOutOfDate`].
    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> BackendResult<AcquiredImage>;

    fn present(&mut self, image_index: u32, waits: &[SemaphoreHandle]) -> BackendResult<()>;

    /// Rebuild the swapchain at the given extent. Old swapchain image handles
    /// become invalid.
    fn recreate_swapchain(&mut self, extent: Extent2d) -> BackendResult<()>;

    // Acceleration structures

    fn acceleration_structure_build_sizes(
        &self,
        kind: AccelerationStructureKind,
        flags: AccelerationStructureBuildFlags,
        geometries: &[AccelerationStructureGeometry],
    ) -> BackendResult<AccelerationStructureBuildSizes>;

    fn create_acceleration_structure(
        &mut self,
        desc: &AccelerationStructureDesc,
    ) -> BackendResult<AccelerationStructureHandle>;

    fn destroy_acceleration_structure(&mut self, structure: AccelerationStructureHandle);

    fn acceleration_structure_device_address(
        &self,
        structure: AccelerationStructureHandle,
    ) -> BackendResult<u64>;

    fn cmd_build_acceleration_structure(
        &mut self,
        cmd: CommandBufferHandle,
        build: &AccelerationStructureBuild<'_>,
    );
}
