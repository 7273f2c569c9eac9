//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It keeps enough state
//! to behave like a strict driver with validation enabled:
//!
//! - every call is appended to an operation log ([`DummyOp`]) that tests
//!   inspect;
//! - host-visible buffers have real bytes behind them, and buffer copies are
//!   executed immediately;
//! - descriptor pools have finite capacity and report exhaustion;
//! - fences only signal when waited on, optionally after a number of timeouts;
//! - the swapchain can be forced out of date;
//! - formats can be marked unsupported;
//! - any backend call can be made to fail on demand.
//!
//! Using a handle that was destroyed (or never created) panics, as does
//! resetting or re-recording a command buffer whose submission has not been
//! waited on. These are contract violations, not recoverable errors.

use std::collections::{HashMap, HashSet};

use super::traits::*;
use super::types::*;

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum DummyOp {
    CreateBuffer {
        buffer: BufferHandle,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    },
    DestroyBuffer(BufferHandle),
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    CreateImage {
        image: ImageHandle,
        format: Format,
        extent: Extent3d,
        mip_levels: u32,
        tiling: ImageTiling,
    },
    DestroyImage(ImageHandle),
    CreateImageView {
        view: ImageViewHandle,
        image: ImageHandle,
    },
    DestroyImageView(ImageViewHandle),
    CreateSampler(SamplerHandle),
    DestroySampler(SamplerHandle),
    CreateDescriptorSetLayout(DescriptorSetLayoutHandle),
    DestroyDescriptorSetLayout(DescriptorSetLayoutHandle),
    CreateDescriptorPool(DescriptorPoolHandle),
    DestroyDescriptorPool(DescriptorPoolHandle),
    AllocateDescriptorSet {
        set: DescriptorSetHandle,
        pool: DescriptorPoolHandle,
        variable_count: Option<u32>,
    },
    UpdateDescriptorSets(Vec<DescriptorWrite>),
    CreatePipelineLayout(PipelineLayoutHandle),
    DestroyPipelineLayout(PipelineLayoutHandle),
    CreateComputePipeline(PipelineHandle),
    DestroyPipeline(PipelineHandle),
    AllocateCommandBuffer {
        cmd: CommandBufferHandle,
        level: CommandBufferLevel,
    },
    FreeCommandBuffer(CommandBufferHandle),
    BeginCommandBuffer {
        cmd: CommandBufferHandle,
        inherited: bool,
    },
    EndCommandBuffer(CommandBufferHandle),
    ResetCommandBuffer(CommandBufferHandle),
    PipelineBarrier {
        cmd: CommandBufferHandle,
        buffers: Vec<BufferBarrier>,
        images: Vec<ImageBarrier>,
    },
    CopyBuffer {
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: Vec<BufferCopy>,
    },
    CopyBufferToImage {
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        regions: Vec<BufferImageCopy>,
    },
    BlitImage {
        cmd: CommandBufferHandle,
        src: ImageHandle,
        dst: ImageHandle,
        blit: ImageBlit,
    },
    ClearColorImage {
        cmd: CommandBufferHandle,
        image: ImageHandle,
    },
    BindPipeline {
        cmd: CommandBufferHandle,
        pipeline: PipelineHandle,
    },
    BindDescriptorSets {
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: Vec<DescriptorSetHandle>,
        dynamic_offsets: Vec<u32>,
    },
    PushConstants {
        cmd: CommandBufferHandle,
        size: usize,
    },
    Dispatch {
        cmd: CommandBufferHandle,
        x: u32,
        y: u32,
        z: u32,
    },
    ExecuteCommands {
        cmd: CommandBufferHandle,
        secondaries: Vec<CommandBufferHandle>,
    },
    Submit {
        command_buffers: Vec<CommandBufferHandle>,
        waits: Vec<(SemaphoreHandle, PipelineStages)>,
        signals: Vec<SemaphoreHandle>,
        fence: Option<FenceHandle>,
    },
    WaitIdle,
    CreateFence(FenceHandle),
    DestroyFence(FenceHandle),
    WaitForFence {
        fence: FenceHandle,
        result: FenceWait,
    },
    ResetFence(FenceHandle),
    CreateSemaphore(SemaphoreHandle),
    DestroySemaphore(SemaphoreHandle),
    AcquireNextImage(u32),
    Present(u32),
    RecreateSwapchain(Extent2d),
    CreateAccelerationStructure {
        structure: AccelerationStructureHandle,
        kind: AccelerationStructureKind,
        size: u64,
    },
    DestroyAccelerationStructure(AccelerationStructureHandle),
    BuildAccelerationStructure {
        cmd: CommandBufferHandle,
        kind: AccelerationStructureKind,
        mode: AccelerationStructureBuildMode,
        src: Option<AccelerationStructureHandle>,
        dst: AccelerationStructureHandle,
        geometries: Vec<AccelerationStructureGeometry>,
    },
}

#[derive(Debug)]
struct DummyBuffer {
    desc: BufferDesc,
    data: Vec<u8>,
    address: u64,
}

#[derive(Debug)]
struct DummyPool {
    desc: DescriptorPoolDesc,
    remaining: HashMap<DescriptorType, u32>,
    sets: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug)]
struct DummyCommandBuffer {
    level: CommandBufferLevel,
    state: CommandState,
    in_flight: Option<FenceHandle>,
}

#[derive(Debug)]
struct DummyFence {
    signaled: bool,
}

#[derive(Debug)]
struct InjectedFailure {
    call: &'static str,
    skip: usize,
    error: BackendError,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    capabilities: DeviceCapabilities,
    next_id: u64,
    ops: Vec<DummyOp>,

    buffers: HashMap<u64, DummyBuffer>,
    images: HashMap<u64, ImageDesc>,
    image_views: HashMap<u64, ImageHandle>,
    samplers: HashSet<u64>,
    set_layouts: HashMap<u64, DescriptorSetLayoutDesc>,
    pools: HashMap<u64, DummyPool>,
    sets: HashMap<u64, (u64, u64)>,
    pipeline_layouts: HashSet<u64>,
    pipelines: HashSet<u64>,
    command_buffers: HashMap<u64, DummyCommandBuffer>,
    fences: HashMap<u64, DummyFence>,
    semaphores: HashSet<u64>,
    acceleration_structures: HashMap<u64, (AccelerationStructureDesc, u64)>,

    swapchain_extent: Extent2d,
    swapchain_images: Vec<ImageHandle>,
    next_swapchain_image: u32,
    out_of_date: bool,

    unsupported_formats: HashSet<(Format, ImageTiling)>,
    fence_timeouts: u32,
    failures: Vec<InjectedFailure>,
}

const SWAPCHAIN_IMAGE_COUNT: u32 = 3;
const BUFFER_ADDRESS_BASE: u64 = 0x1000_0000;
const STRUCTURE_ADDRESS_BASE: u64 = 0x4000_0000_0000;

impl DummyBackend {
    /// Create a new dummy backend with every capability enabled.
    pub fn new() -> Self {
        let mut backend = Self {
            capabilities: DeviceCapabilities {
                device_name: "Dummy Device".to_string(),
                raytracing: true,
                bindless: true,
                buffer_device_address: true,
                max_bound_descriptor_sets: 16,
                max_bindless_resources: 1 << 16,
                min_uniform_buffer_offset_alignment: 256,
                min_storage_buffer_offset_alignment: 64,
                min_acceleration_structure_scratch_offset_alignment: 128,
            },
            next_id: 1,
            ops: Vec::new(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            image_views: HashMap::new(),
            samplers: HashSet::new(),
            set_layouts: HashMap::new(),
            pools: HashMap::new(),
            sets: HashMap::new(),
            pipeline_layouts: HashSet::new(),
            pipelines: HashSet::new(),
            command_buffers: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashSet::new(),
            acceleration_structures: HashMap::new(),
            swapchain_extent: Extent2d::new(1280, 720),
            swapchain_images: Vec::new(),
            next_swapchain_image: 0,
            out_of_date: false,
            unsupported_formats: HashSet::new(),
            fence_timeouts: 0,
            failures: Vec::new(),
        };
        backend.build_swapchain_images();
        backend
    }

    /// Replace the reported capabilities.
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_swapchain_extent(mut self, extent: Extent2d) -> Self {
        self.swapchain_extent = extent;
        self.build_swapchain_images();
        self
    }

    /// Report `format` with `tiling` as unsupported.
    pub fn mark_format_unsupported(&mut self, format: Format, tiling: ImageTiling) {
        self.unsupported_formats.insert((format, tiling));
    }

    /// The next fence waits report `count` timeouts before signalling.
    pub fn set_fence_timeouts(&mut self, count: u32) {
        self.fence_timeouts = count;
    }

    /// Make acquire and present report an out-of-date surface until the
    /// swapchain is recreated.
    pub fn force_out_of_date(&mut self) {
        self.out_of_date = true;
    }

    /// Fail the call named `call` after `skip` successful calls to it.
    pub fn fail_call(&mut self, call: &'static str, skip: usize, error: BackendError) {
        self.failures.push(InjectedFailure { call, skip, error });
    }

    /// Get the backend name.
    pub fn backend_name(&self) -> &'static str {
        "Dummy Backend"
    }

    pub fn ops(&self) -> &[DummyOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<DummyOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Number of recorded operations matching `pred`.
    pub fn count_ops(&self, pred: impl Fn(&DummyOp) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    /// Contents of a buffer.
    pub fn buffer_data(&self, buffer: BufferHandle) -> &[u8] {
        &self.buffer(buffer).data
    }

    /// Whether a handle with this raw id is still alive.
    pub fn is_live(&self, raw: u64) -> bool {
        self.buffers.contains_key(&raw)
            || self.images.contains_key(&raw)
            || self.image_views.contains_key(&raw)
            || self.samplers.contains(&raw)
            || self.set_layouts.contains_key(&raw)
            || self.pools.contains_key(&raw)
            || self.sets.contains_key(&raw)
            || self.pipeline_layouts.contains(&raw)
            || self.pipelines.contains(&raw)
            || self.command_buffers.contains_key(&raw)
            || self.fences.contains_key(&raw)
            || self.semaphores.contains(&raw)
            || self.acceleration_structures.contains_key(&raw)
    }

    /// Number of live objects created by callers. Swapchain images and
    /// descriptor sets (freed with their pool) are not counted.
    pub fn live_object_count(&self) -> usize {
        let swapchain: HashSet<u64> = self.swapchain_images.iter().map(|i| i.0).collect();
        self.buffers.len()
            + self.images.keys().filter(|id| !swapchain.contains(id)).count()
            + self.image_views.len()
            + self.samplers.len()
            + self.set_layouts.len()
            + self.pools.len()
            + self.pipeline_layouts.len()
            + self.pipelines.len()
            + self.command_buffers.len()
            + self.fences.len()
            + self.semaphores.len()
            + self.acceleration_structures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.images.len() - self.swapchain_images.len()
    }

    pub fn live_acceleration_structure_count(&self) -> usize {
        self.acceleration_structures.len()
    }

    /// Number of sets currently allocated from a pool.
    pub fn pool_set_count(&self, pool: DescriptorPoolHandle) -> usize {
        self.pool(pool).sets.len()
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_failure(&mut self, call: &'static str) -> BackendResult<()> {
        let position = self.failures.iter().position(|f| f.call == call);
        if let Some(index) = position {
            if self.failures[index].skip == 0 {
                let failure = self.failures.remove(index);
                log::trace!("DummyBackend: injected failure in {}", call);
                return Err(failure.error);
            }
            self.failures[index].skip -= 1;
        }
        Ok(())
    }

    fn build_swapchain_images(&mut self) {
        for image in std::mem::take(&mut self.swapchain_images) {
            self.images.remove(&image.0);
        }
        for i in 0..SWAPCHAIN_IMAGE_COUNT {
            let id = self.next_handle();
            self.images.insert(
                id,
                ImageDesc::new_2d(
                    self.swapchain_extent.width,
                    self.swapchain_extent.height,
                    Format::Bgra8Srgb,
                    ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_DST,
                )
                .with_label(format!("swapchain image {}", i)),
            );
            self.swapchain_images.push(ImageHandle(id));
        }
        self.next_swapchain_image = 0;
    }

    fn buffer(&self, buffer: BufferHandle) -> &DummyBuffer {
        match self.buffers.get(&buffer.0) {
            Some(b) => b,
            None => panic!("DummyBackend: use of destroyed or unknown buffer {:?}", buffer),
        }
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> &mut DummyBuffer {
        match self.buffers.get_mut(&buffer.0) {
            Some(b) => b,
            None => panic!("DummyBackend: use of destroyed or unknown buffer {:?}", buffer),
        }
    }

    fn image(&self, image: ImageHandle) -> &ImageDesc {
        match self.images.get(&image.0) {
            Some(desc) => desc,
            None => panic!("DummyBackend: use of destroyed or unknown image {:?}", image),
        }
    }

    fn pool(&self, pool: DescriptorPoolHandle) -> &DummyPool {
        match self.pools.get(&pool.0) {
            Some(p) => p,
            None => panic!("DummyBackend: use of destroyed or unknown pool {:?}", pool),
        }
    }

    fn command_buffer_mut(&mut self, cmd: CommandBufferHandle) -> &mut DummyCommandBuffer {
        match self.command_buffers.get_mut(&cmd.0) {
            Some(c) => c,
            None => panic!("DummyBackend: use of freed or unknown command buffer {:?}", cmd),
        }
    }

    fn assert_recording(&mut self, cmd: CommandBufferHandle) {
        let state = self.command_buffer_mut(cmd).state;
        assert_eq!(
            state,
            CommandState::Recording,
            "DummyBackend: command recorded into {:?} outside begin/end",
            cmd
        );
    }

    fn assert_not_in_flight(&self, cmd: CommandBufferHandle, action: &str) {
        let Some(buffer) = self.command_buffers.get(&cmd.0) else {
            panic!("DummyBackend: use of freed or unknown command buffer {:?}", cmd);
        };
        if let Some(fence) = buffer.in_flight {
            panic!(
                "DummyBackend: {} of {:?} while its submission fence {:?} is unsignaled",
                action, cmd, fence
            );
        }
    }

    fn assert_set_live(&self, set: DescriptorSetHandle) {
        assert!(
            self.sets.contains_key(&set.0),
            "DummyBackend: use of freed or unknown descriptor set {:?}",
            set
        );
    }

    fn assert_semaphore_live(&self, semaphore: SemaphoreHandle) {
        assert!(
            self.semaphores.contains(&semaphore.0),
            "DummyBackend: use of destroyed or unknown semaphore {:?}",
            semaphore
        );
    }

    fn validate_write(&self, write: &DescriptorWrite) {
        self.assert_set_live(write.set);
        let (_, layout) = self.sets[&write.set.0];
        let binding = self.set_layouts[&layout]
            .bindings
            .iter()
            .find(|b| b.binding == write.binding);
        let Some(binding) = binding else {
            panic!(
                "DummyBackend: write to binding {} missing from the set layout",
                write.binding
            );
        };
        assert_eq!(binding.ty, write.ty, "DummyBackend: descriptor type mismatch");
        assert!(
            write.array_element < binding.count,
            "DummyBackend: array element {} out of range for binding {} (count {})",
            write.array_element,
            write.binding,
            binding.count
        );
        match write.resource {
            DescriptorResource::Buffer { buffer, .. } => {
                self.buffer(buffer);
            }
            DescriptorResource::Image { view, sampler, .. } => {
                assert!(
                    self.image_views.contains_key(&view.0),
                    "DummyBackend: use of destroyed image view {:?}",
                    view
                );
                if let Some(sampler) = sampler {
                    assert!(
                        self.samplers.contains(&sampler.0),
                        "DummyBackend: use of destroyed sampler {:?}",
                        sampler
                    );
                }
            }
            DescriptorResource::Sampler(sampler) => {
                assert!(
                    self.samplers.contains(&sampler.0),
                    "DummyBackend: use of destroyed sampler {:?}",
                    sampler
                );
            }
            DescriptorResource::AccelerationStructure(structure) => {
                assert!(
                    self.acceleration_structures.contains_key(&structure.0),
                    "DummyBackend: use of destroyed acceleration structure {:?}",
                    structure
                );
            }
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        self.backend_name()
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn image_format_supported(
        &self,
        format: Format,
        tiling: ImageTiling,
        _usage: ImageUsage,
    ) -> bool {
        !self.unsupported_formats.contains(&(format, tiling))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> BackendResult<BufferHandle> {
        self.check_failure("create_buffer")?;
        if desc.size == 0 {
            return Err(BackendError::InvalidOperation(format!(
                "zero-sized buffer '{}'",
                desc.label
            )));
        }
        log::trace!(
            "DummyBackend: creating buffer '{}' (size: {})",
            desc.label,
            desc.size
        );
        let id = self.next_handle();
        self.buffers.insert(
            id,
            DummyBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
                address: BUFFER_ADDRESS_BASE + id * 0x10_0000,
            },
        );
        let handle = BufferHandle(id);
        self.ops.push(DummyOp::CreateBuffer {
            buffer: handle,
            size: desc.size,
            usage: desc.usage,
            location: desc.location,
        });
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        assert!(
            self.buffers.remove(&buffer.0).is_some(),
            "DummyBackend: double destroy of buffer {:?}",
            buffer
        );
        self.ops.push(DummyOp::DestroyBuffer(buffer));
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        self.check_failure("write_buffer")?;
        let target = self.buffer_mut(buffer);
        if !target.desc.location.is_host_visible() {
            return Err(BackendError::InvalidOperation(format!(
                "buffer '{}' is not host visible",
                target.desc.label
            )));
        }
        let start = offset as usize;
        let end = start + data.len();
        assert!(
            end <= target.data.len(),
            "DummyBackend: write of {}..{} past the end of buffer '{}' ({} bytes)",
            start,
            end,
            target.desc.label,
            target.data.len()
        );
        target.data[start..end].copy_from_slice(data);
        self.ops.push(DummyOp::WriteBuffer {
            buffer,
            offset,
            size: data.len() as u64,
        });
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        out: &mut [u8],
    ) -> BackendResult<()> {
        let source = self.buffer(buffer);
        if !source.desc.location.is_host_visible() {
            return Err(BackendError::InvalidOperation(format!(
                "buffer '{}' is not host visible",
                source.desc.label
            )));
        }
        let start = offset as usize;
        out.copy_from_slice(&source.data[start..start + out.len()]);
        Ok(())
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> BackendResult<u64> {
        let target = self.buffer(buffer);
        if !target.desc.usage.contains(BufferUsage::SHADER_DEVICE_ADDRESS) {
            return Err(BackendError::InvalidOperation(format!(
                "buffer '{}' was created without SHADER_DEVICE_ADDRESS",
                target.desc.label
            )));
        }
        Ok(target.address)
    }

    fn create_image(&mut self, desc: &ImageDesc) -> BackendResult<ImageHandle> {
        self.check_failure("create_image")?;
        if !self.image_format_supported(desc.format, desc.tiling, desc.usage) {
            return Err(BackendError::Unsupported(format!(
                "format {:?} with {:?} tiling",
                desc.format, desc.tiling
            )));
        }
        log::trace!(
            "DummyBackend: creating image '{}' ({}x{}x{})",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.extent.depth
        );
        let id = self.next_handle();
        self.images.insert(id, desc.clone());
        let handle = ImageHandle(id);
        self.ops.push(DummyOp::CreateImage {
            image: handle,
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            tiling: desc.tiling,
        });
        Ok(handle)
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        assert!(
            !self.swapchain_images.contains(&image),
            "DummyBackend: swapchain images are owned by the swapchain"
        );
        assert!(
            self.images.remove(&image.0).is_some(),
            "DummyBackend: double destroy of image {:?}",
            image
        );
        self.ops.push(DummyOp::DestroyImage(image));
    }

    fn create_image_view(&mut self, desc: &ImageViewDesc) -> BackendResult<ImageViewHandle> {
        self.check_failure("create_image_view")?;
        let image_desc = self.image(desc.image);
        assert!(
            desc.range.base_mip_level + desc.range.mip_level_count <= image_desc.mip_levels,
            "DummyBackend: view mip range exceeds image mip count"
        );
        let id = self.next_handle();
        self.image_views.insert(id, desc.image);
        let handle = ImageViewHandle(id);
        self.ops.push(DummyOp::CreateImageView {
            view: handle,
            image: desc.image,
        });
        Ok(handle)
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        assert!(
            self.image_views.remove(&view.0).is_some(),
            "DummyBackend: double destroy of image view {:?}",
            view
        );
        self.ops.push(DummyOp::DestroyImageView(view));
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        self.check_failure("create_sampler")?;
        log::trace!("DummyBackend: creating sampler '{}'", desc.label);
        let id = self.next_handle();
        self.samplers.insert(id);
        self.ops.push(DummyOp::CreateSampler(SamplerHandle(id)));
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        assert!(
            self.samplers.remove(&sampler.0),
            "DummyBackend: double destroy of sampler {:?}",
            sampler
        );
        self.ops.push(DummyOp::DestroySampler(sampler));
    }

    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDesc,
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        self.check_failure("create_descriptor_set_layout")?;
        let mut seen = HashSet::new();
        for binding in &desc.bindings {
            assert!(
                seen.insert(binding.binding),
                "DummyBackend: duplicate binding {} in set layout",
                binding.binding
            );
            if binding.flags.contains(DescriptorBindingFlags::UPDATE_AFTER_BIND) {
                assert!(
                    desc.update_after_bind_pool,
                    "DummyBackend: update-after-bind binding in a layout without the pool flag"
                );
            }
        }
        let id = self.next_handle();
        self.set_layouts.insert(id, desc.clone());
        let handle = DescriptorSetLayoutHandle(id);
        self.ops.push(DummyOp::CreateDescriptorSetLayout(handle));
        Ok(handle)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        assert!(
            self.set_layouts.remove(&layout.0).is_some(),
            "DummyBackend: double destroy of set layout {:?}",
            layout
        );
        self.ops.push(DummyOp::DestroyDescriptorSetLayout(layout));
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDesc,
    ) -> BackendResult<DescriptorPoolHandle> {
        self.check_failure("create_descriptor_pool")?;
        let id = self.next_handle();
        let remaining = desc.sizes.iter().map(|size| (size.ty, size.count)).collect();
        self.pools.insert(
            id,
            DummyPool {
                desc: desc.clone(),
                remaining,
                sets: Vec::new(),
            },
        );
        let handle = DescriptorPoolHandle(id);
        self.ops.push(DummyOp::CreateDescriptorPool(handle));
        Ok(handle)
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let Some(removed) = self.pools.remove(&pool.0) else {
            panic!("DummyBackend: double destroy of descriptor pool {:?}", pool);
        };
        for set in removed.sets {
            self.sets.remove(&set);
        }
        self.ops.push(DummyOp::DestroyDescriptorPool(pool));
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        variable_count: Option<u32>,
    ) -> BackendResult<DescriptorSetHandle> {
        self.check_failure("allocate_descriptor_set")?;
        let Some(layout_desc) = self.set_layouts.get(&layout.0) else {
            panic!("DummyBackend: use of destroyed or unknown set layout {:?}", layout);
        };

        let mut needed: HashMap<DescriptorType, u32> = HashMap::new();
        for binding in &layout_desc.bindings {
            let count = if binding
                .flags
                .contains(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
            {
                variable_count.unwrap_or(0)
            } else {
                binding.count
            };
            *needed.entry(binding.ty).or_default() += count;
        }
        let update_after_bind = layout_desc.update_after_bind_pool;

        let Some(target) = self.pools.get_mut(&pool.0) else {
            panic!("DummyBackend: use of destroyed or unknown pool {:?}", pool);
        };
        if update_after_bind && !target.desc.update_after_bind {
            return Err(BackendError::InvalidOperation(
                "update-after-bind layout allocated from a regular pool".to_string(),
            ));
        }
        if target.sets.len() as u32 >= target.desc.max_sets {
            return Err(BackendError::OutOfPoolMemory);
        }
        for (ty, count) in &needed {
            if target.remaining.get(ty).copied().unwrap_or(0) < *count {
                return Err(BackendError::OutOfPoolMemory);
            }
        }
        for (ty, count) in &needed {
            if let Some(remaining) = target.remaining.get_mut(ty) {
                *remaining -= *count;
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        target.sets.push(id);
        self.sets.insert(id, (pool.0, layout.0));
        let handle = DescriptorSetHandle(id);
        self.ops.push(DummyOp::AllocateDescriptorSet {
            set: handle,
            pool,
            variable_count,
        });
        Ok(handle)
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]) -> BackendResult<()> {
        self.check_failure("update_descriptor_sets")?;
        for write in writes {
            self.validate_write(write);
        }
        self.ops.push(DummyOp::UpdateDescriptorSets(writes.to_vec()));
        Ok(())
    }

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDesc,
    ) -> BackendResult<PipelineLayoutHandle> {
        self.check_failure("create_pipeline_layout")?;
        for layout in &desc.set_layouts {
            assert!(
                self.set_layouts.contains_key(&layout.0),
                "DummyBackend: pipeline layout references destroyed set layout {:?}",
                layout
            );
        }
        let id = self.next_handle();
        self.pipeline_layouts.insert(id);
        let handle = PipelineLayoutHandle(id);
        self.ops.push(DummyOp::CreatePipelineLayout(handle));
        Ok(handle)
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        assert!(
            self.pipeline_layouts.remove(&layout.0),
            "DummyBackend: double destroy of pipeline layout {:?}",
            layout
        );
        self.ops.push(DummyOp::DestroyPipelineLayout(layout));
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc<'_>,
    ) -> BackendResult<PipelineHandle> {
        self.check_failure("create_compute_pipeline")?;
        assert!(
            self.pipeline_layouts.contains(&desc.layout.0),
            "DummyBackend: compute pipeline '{}' uses destroyed layout",
            desc.label
        );
        if desc.spirv.is_empty() {
            return Err(BackendError::InvalidOperation(format!(
                "empty SPIR-V for pipeline '{}'",
                desc.label
            )));
        }
        let id = self.next_handle();
        self.pipelines.insert(id);
        let handle = PipelineHandle(id);
        self.ops.push(DummyOp::CreateComputePipeline(handle));
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        assert!(
            self.pipelines.remove(&pipeline.0),
            "DummyBackend: double destroy of pipeline {:?}",
            pipeline
        );
        self.ops.push(DummyOp::DestroyPipeline(pipeline));
    }

    fn allocate_command_buffer(
        &mut self,
        level: CommandBufferLevel,
    ) -> BackendResult<CommandBufferHandle> {
        self.check_failure("allocate_command_buffer")?;
        let id = self.next_handle();
        self.command_buffers.insert(
            id,
            DummyCommandBuffer {
                level,
                state: CommandState::Initial,
                in_flight: None,
            },
        );
        let handle = CommandBufferHandle(id);
        self.ops.push(DummyOp::AllocateCommandBuffer { cmd: handle, level });
        Ok(handle)
    }

    fn free_command_buffer(&mut self, cmd: CommandBufferHandle) {
        self.assert_not_in_flight(cmd, "free");
        self.command_buffers.remove(&cmd.0);
        self.ops.push(DummyOp::FreeCommandBuffer(cmd));
    }

    fn begin_command_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        _usage: CommandBufferUsage,
        inheritance: Option<&CommandBufferInheritance>,
    ) -> BackendResult<()> {
        self.check_failure("begin_command_buffer")?;
        self.assert_not_in_flight(cmd, "re-recording");
        let buffer = self.command_buffer_mut(cmd);
        if buffer.level == CommandBufferLevel::Secondary && inheritance.is_none() {
            return Err(BackendError::InvalidOperation(
                "secondary command buffer begun without inheritance info".to_string(),
            ));
        }
        assert_ne!(
            buffer.state,
            CommandState::Recording,
            "DummyBackend: begin on a command buffer that is already recording"
        );
        buffer.state = CommandState::Recording;
        buffer.in_flight = None;
        self.ops.push(DummyOp::BeginCommandBuffer {
            cmd,
            inherited: inheritance.is_some(),
        });
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        self.check_failure("end_command_buffer")?;
        self.assert_recording(cmd);
        self.command_buffer_mut(cmd).state = CommandState::Executable;
        self.ops.push(DummyOp::EndCommandBuffer(cmd));
        Ok(())
    }

    fn reset_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        self.assert_not_in_flight(cmd, "reset");
        let buffer = self.command_buffer_mut(cmd);
        buffer.state = CommandState::Initial;
        buffer.in_flight = None;
        self.ops.push(DummyOp::ResetCommandBuffer(cmd));
        Ok(())
    }

    fn cmd_pipeline_barrier(
        &mut self,
        cmd: CommandBufferHandle,
        buffer_barriers: &[BufferBarrier],
        image_barriers: &[ImageBarrier],
    ) {
        self.assert_recording(cmd);
        for barrier in buffer_barriers {
            self.buffer(barrier.buffer);
        }
        for barrier in image_barriers {
            self.image(barrier.image);
        }
        self.ops.push(DummyOp::PipelineBarrier {
            cmd,
            buffers: buffer_barriers.to_vec(),
            images: image_barriers.to_vec(),
        });
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        self.assert_recording(cmd);
        for region in regions {
            let bytes = {
                let source = &self.buffer(src).data;
                let start = region.src_offset as usize;
                source[start..start + region.size as usize].to_vec()
            };
            let target = &mut self.buffer_mut(dst).data;
            let start = region.dst_offset as usize;
            target[start..start + bytes.len()].copy_from_slice(&bytes);
        }
        self.ops.push(DummyOp::CopyBuffer {
            cmd,
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        regions: &[BufferImageCopy],
    ) {
        self.assert_recording(cmd);
        self.buffer(src);
        self.image(dst);
        self.ops.push(DummyOp::CopyBufferToImage {
            cmd,
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn cmd_blit_image(
        &mut self,
        cmd: CommandBufferHandle,
        src: ImageHandle,
        dst: ImageHandle,
        blit: &ImageBlit,
        _filter: Filter,
    ) {
        self.assert_recording(cmd);
        self.image(src);
        self.image(dst);
        self.ops.push(DummyOp::BlitImage {
            cmd,
            src,
            dst,
            blit: *blit,
        });
    }

    fn cmd_clear_color_image(
        &mut self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        _color: [f32; 4],
        _range: &SubresourceRange,
    ) {
        self.assert_recording(cmd);
        self.image(image);
        self.ops.push(DummyOp::ClearColorImage { cmd, image });
    }

    fn cmd_bind_pipeline(
        &mut self,
        cmd: CommandBufferHandle,
        _bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    ) {
        self.assert_recording(cmd);
        assert!(
            self.pipelines.contains(&pipeline.0),
            "DummyBackend: bind of destroyed pipeline {:?}",
            pipeline
        );
        self.ops.push(DummyOp::BindPipeline { cmd, pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: CommandBufferHandle,
        _bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) {
        self.assert_recording(cmd);
        assert!(
            self.pipeline_layouts.contains(&layout.0),
            "DummyBackend: bind against destroyed pipeline layout {:?}",
            layout
        );
        for set in sets {
            self.assert_set_live(*set);
        }
        self.ops.push(DummyOp::BindDescriptorSets {
            cmd,
            layout,
            first_set,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &mut self,
        cmd: CommandBufferHandle,
        _layout: PipelineLayoutHandle,
        _stages: ShaderStages,
        _offset: u32,
        data: &[u8],
    ) {
        self.assert_recording(cmd);
        self.ops.push(DummyOp::PushConstants {
            cmd,
            size: data.len(),
        });
    }

    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        self.assert_recording(cmd);
        self.ops.push(DummyOp::Dispatch { cmd, x, y, z });
    }

    fn cmd_execute_commands(
        &mut self,
        cmd: CommandBufferHandle,
        secondaries: &[CommandBufferHandle],
    ) {
        self.assert_recording(cmd);
        for secondary in secondaries {
            let buffer = self.command_buffer_mut(*secondary);
            assert_eq!(
                buffer.level,
                CommandBufferLevel::Secondary,
                "DummyBackend: executing a primary command buffer as a secondary"
            );
            assert_eq!(
                buffer.state,
                CommandState::Executable,
                "DummyBackend: executing a secondary command buffer that was not ended"
            );
        }
        self.ops.push(DummyOp::ExecuteCommands {
            cmd,
            secondaries: secondaries.to_vec(),
        });
    }

    fn submit(&mut self, info: &SubmitInfo<'_>) -> BackendResult<()> {
        self.check_failure("submit")?;
        for (semaphore, _) in info.waits {
            self.assert_semaphore_live(*semaphore);
        }
        for semaphore in info.signals {
            self.assert_semaphore_live(*semaphore);
        }
        if let Some(fence) = info.fence {
            let Some(state) = self.fences.get_mut(&fence.0) else {
                panic!("DummyBackend: submit with destroyed fence {:?}", fence);
            };
            assert!(
                !state.signaled,
                "DummyBackend: submit with a fence that is still signaled"
            );
        }
        for cmd in info.command_buffers {
            let buffer = self.command_buffer_mut(*cmd);
            assert_eq!(
                buffer.state,
                CommandState::Executable,
                "DummyBackend: submit of a command buffer that was not ended"
            );
            buffer.in_flight = info.fence;
        }
        self.ops.push(DummyOp::Submit {
            command_buffers: info.command_buffers.to_vec(),
            waits: info.waits.to_vec(),
            signals: info.signals.to_vec(),
            fence: info.fence,
        });
        Ok(())
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        for fence in self.fences.values_mut() {
            fence.signaled = true;
        }
        for buffer in self.command_buffers.values_mut() {
            buffer.in_flight = None;
        }
        self.ops.push(DummyOp::WaitIdle);
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        self.check_failure("create_fence")?;
        let id = self.next_handle();
        self.fences.insert(id, DummyFence { signaled });
        self.ops.push(DummyOp::CreateFence(FenceHandle(id)));
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        assert!(
            self.fences.remove(&fence.0).is_some(),
            "DummyBackend: double destroy of fence {:?}",
            fence
        );
        self.ops.push(DummyOp::DestroyFence(fence));
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, _timeout_ns: u64) -> BackendResult<FenceWait> {
        self.check_failure("wait_for_fence")?;
        let result = if self.fence_timeouts > 0 {
            self.fence_timeouts -= 1;
            FenceWait::Timeout
        } else {
            let Some(state) = self.fences.get_mut(&fence.0) else {
                panic!("DummyBackend: wait on destroyed fence {:?}", fence);
            };
            state.signaled = true;
            for buffer in self.command_buffers.values_mut() {
                if buffer.in_flight == Some(fence) {
                    buffer.in_flight = None;
                }
            }
            FenceWait::Signaled
        };
        self.ops.push(DummyOp::WaitForFence { fence, result });
        Ok(result)
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let Some(state) = self.fences.get_mut(&fence.0) else {
            panic!("DummyBackend: reset of destroyed fence {:?}", fence);
        };
        state.signaled = false;
        self.ops.push(DummyOp::ResetFence(fence));
        Ok(())
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        self.check_failure("create_semaphore")?;
        let id = self.next_handle();
        self.semaphores.insert(id);
        self.ops.push(DummyOp::CreateSemaphore(SemaphoreHandle(id)));
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        assert!(
            self.semaphores.remove(&semaphore.0),
            "DummyBackend: double destroy of semaphore {:?}",
            semaphore
        );
        self.ops.push(DummyOp::DestroySemaphore(semaphore));
    }

    fn swapchain_extent(&self) -> Extent2d {
        self.swapchain_extent
    }

    fn swapchain_format(&self) -> Format {
        Format::Bgra8Srgb
    }

    fn swapchain_image_count(&self) -> u32 {
        self.swapchain_images.len() as u32
    }

    fn swapchain_image(&self, index: u32) -> ImageHandle {
        self.swapchain_images[index as usize]
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> BackendResult<AcquiredImage> {
        self.assert_semaphore_live(signal);
        if self.out_of_date {
            return Err(BackendError::SurfaceOutOfDate);
        }
        self.check_failure("acquire_next_image")?;
        let index = self.next_swapchain_image;
        self.next_swapchain_image = (index + 1) % self.swapchain_images.len() as u32;
        self.ops.push(DummyOp::AcquireNextImage(index));
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn present(&mut self, image_index: u32, waits: &[SemaphoreHandle]) -> BackendResult<()> {
        for semaphore in waits {
            self.assert_semaphore_live(*semaphore);
        }
        if self.out_of_date {
            return Err(BackendError::SurfaceOutOfDate);
        }
        self.check_failure("present")?;
        self.ops.push(DummyOp::Present(image_index));
        Ok(())
    }

    fn recreate_swapchain(&mut self, extent: Extent2d) -> BackendResult<()> {
        self.check_failure("recreate_swapchain")?;
        self.swapchain_extent = extent;
        self.out_of_date = false;
        self.build_swapchain_images();
        self.ops.push(DummyOp::RecreateSwapchain(extent));
        Ok(())
    }

    fn acceleration_structure_build_sizes(
        &self,
        kind: AccelerationStructureKind,
        _flags: AccelerationStructureBuildFlags,
        geometries: &[AccelerationStructureGeometry],
    ) -> BackendResult<AccelerationStructureBuildSizes> {
        if !self.capabilities.raytracing {
            return Err(BackendError::Unsupported(
                "acceleration structures".to_string(),
            ));
        }
        let primitives: u64 = geometries.iter().map(|g| g.primitive_count() as u64).sum();
        let per_primitive = match kind {
            AccelerationStructureKind::BottomLevel => 128,
            AccelerationStructureKind::TopLevel => 64,
        };
        Ok(AccelerationStructureBuildSizes {
            acceleration_structure_size: 256 + primitives * per_primitive,
            build_scratch_size: 128 + primitives * 64,
            update_scratch_size: 64 + primitives * 32,
        })
    }

    fn create_acceleration_structure(
        &mut self,
        desc: &AccelerationStructureDesc,
    ) -> BackendResult<AccelerationStructureHandle> {
        self.check_failure("create_acceleration_structure")?;
        let backing = self.buffer(desc.buffer);
        assert!(
            backing
                .desc
                .usage
                .contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE),
            "DummyBackend: acceleration structure backed by a buffer without AS storage usage"
        );
        assert!(
            desc.offset + desc.size <= backing.desc.size,
            "DummyBackend: acceleration structure exceeds its backing buffer"
        );
        let id = self.next_handle();
        let address = STRUCTURE_ADDRESS_BASE + id * 0x1000;
        self.acceleration_structures.insert(id, (*desc, address));
        let handle = AccelerationStructureHandle(id);
        self.ops.push(DummyOp::CreateAccelerationStructure {
            structure: handle,
            kind: desc.kind,
            size: desc.size,
        });
        Ok(handle)
    }

    fn destroy_acceleration_structure(&mut self, structure: AccelerationStructureHandle) {
        assert!(
            self.acceleration_structures.remove(&structure.0).is_some(),
            "DummyBackend: double destroy of acceleration structure {:?}",
            structure
        );
        self.ops
            .push(DummyOp::DestroyAccelerationStructure(structure));
    }

    fn acceleration_structure_device_address(
        &self,
        structure: AccelerationStructureHandle,
    ) -> BackendResult<u64> {
        match self.acceleration_structures.get(&structure.0) {
            Some((_, address)) => Ok(*address),
            None => panic!(
                "DummyBackend: use of destroyed acceleration structure {:?}",
                structure
            ),
        }
    }

    fn cmd_build_acceleration_structure(
        &mut self,
        cmd: CommandBufferHandle,
        build: &AccelerationStructureBuild<'_>,
    ) {
        self.assert_recording(cmd);
        assert!(
            self.acceleration_structures.contains_key(&build.dst.0),
            "DummyBackend: build into destroyed acceleration structure {:?}",
            build.dst
        );
        if build.mode == AccelerationStructureBuildMode::Update {
            let Some(src) = build.src else {
                panic!("DummyBackend: acceleration structure update without a source");
            };
            assert!(
                self.acceleration_structures.contains_key(&src.0),
                "DummyBackend: update from destroyed acceleration structure {:?}",
                src
            );
        }
        assert_ne!(build.scratch_address, 0, "DummyBackend: null scratch address");
        self.ops.push(DummyOp::BuildAccelerationStructure {
            cmd,
            kind: build.kind,
            mode: build.mode,
            src: build.src,
            dst: build.dst,
            geometries: build.geometries.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_buffer(backend: &mut DummyBackend, size: u64) -> BufferHandle {
        backend
            .create_buffer(&BufferDesc::new(
                size,
                BufferUsage::STORAGE,
                MemoryLocation::CpuToGpu,
            ))
            .unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let mut backend = DummyBackend::new();
        let buffer = host_buffer(&mut backend, 16);
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        backend.read_buffer(buffer, 4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "use of destroyed or unknown buffer")]
    fn test_use_after_destroy_panics() {
        let mut backend = DummyBackend::new();
        let buffer = host_buffer(&mut backend, 16);
        backend.destroy_buffer(buffer);
        let _ = backend.write_buffer(buffer, 0, &[0]);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut backend = DummyBackend::new();
        let layout = backend
            .create_descriptor_set_layout(&DescriptorSetLayoutDesc::default())
            .unwrap();
        let pool = backend
            .create_descriptor_pool(&DescriptorPoolDesc::uniform(1, 4, false))
            .unwrap();
        backend.allocate_descriptor_set(pool, layout, None).unwrap();
        assert_eq!(
            backend.allocate_descriptor_set(pool, layout, None),
            Err(BackendError::OutOfPoolMemory)
        );
    }

    #[test]
    fn test_fence_timeouts_then_signal() {
        let mut backend = DummyBackend::new();
        let fence = backend.create_fence(false).unwrap();
        backend.set_fence_timeouts(2);
        assert_eq!(backend.wait_for_fence(fence, 1).unwrap(), FenceWait::Timeout);
        assert_eq!(backend.wait_for_fence(fence, 1).unwrap(), FenceWait::Timeout);
        assert_eq!(backend.wait_for_fence(fence, 1).unwrap(), FenceWait::Signaled);
    }

    #[test]
    #[should_panic(expected = "while its submission fence")]
    fn test_reset_in_flight_command_buffer_panics() {
        let mut backend = DummyBackend::new();
        let fence = backend.create_fence(false).unwrap();
        let cmd = backend
            .allocate_command_buffer(CommandBufferLevel::Primary)
            .unwrap();
        backend
            .begin_command_buffer(cmd, CommandBufferUsage::ONE_TIME_SUBMIT, None)
            .unwrap();
        backend.end_command_buffer(cmd).unwrap();
        backend
            .submit(&SubmitInfo {
                command_buffers: &[cmd],
                waits: &[],
                signals: &[],
                fence: Some(fence),
            })
            .unwrap();
        let _ = backend.reset_command_buffer(cmd);
    }

    #[test]
    fn test_injected_failure_skips_calls() {
        let mut backend = DummyBackend::new();
        backend.fail_call("create_buffer", 1, BackendError::OutOfMemory);
        assert!(backend
            .create_buffer(&BufferDesc::new(4, BufferUsage::STORAGE, MemoryLocation::GpuOnly))
            .is_ok());
        assert_eq!(
            backend.create_buffer(&BufferDesc::new(
                4,
                BufferUsage::STORAGE,
                MemoryLocation::GpuOnly
            )),
            Err(BackendError::OutOfMemory)
        );
        assert!(backend
            .create_buffer(&BufferDesc::new(4, BufferUsage::STORAGE, MemoryLocation::GpuOnly))
            .is_ok());
    }

    #[test]
    fn test_recreate_swapchain_replaces_images() {
        let mut backend = DummyBackend::new();
        let old = backend.swapchain_image(0);
        backend.force_out_of_date();
        let semaphore = backend.create_semaphore().unwrap();
        assert_eq!(
            backend.acquire_next_image(semaphore),
            Err(BackendError::SurfaceOutOfDate)
        );
        backend.recreate_swapchain(Extent2d::new(800, 600)).unwrap();
        assert!(!backend.is_live(old.raw()));
        assert!(backend.acquire_next_image(semaphore).is_ok());
    }
}
