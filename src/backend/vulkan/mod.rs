//! Vulkan backend implementation using ash.
//!
//! Objects live in per-kind tables keyed by the raw id inside the public
//! handles. Memory comes from gpu-allocator; host-visible buffers stay
//! persistently mapped so `write_buffer` and `read_buffer` are plain copies.

mod conversion;
mod debug;
mod device;
mod instance;
mod swapchain;

use std::collections::HashMap;
use std::ffi::CString;
use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RenderConfig;

use self::conversion::*;
use self::swapchain::{SwapchainContext, VulkanSwapchain};

struct BufferEntry {
    buffer: vk::Buffer,
    allocation: Allocation,
}

struct ImageEntry {
    image: vk::Image,
    /// `None` for swapchain images, which the swapchain owns.
    allocation: Option<Allocation>,
}

#[derive(Clone, Copy)]
struct DescriptorSetEntry {
    set: vk::DescriptorSet,
    pool: u64,
}

#[derive(Clone, Copy)]
struct CommandBufferEntry {
    buffer: vk::CommandBuffer,
    level: CommandBufferLevel,
}

fn lookup<T: Copy>(map: &HashMap<u64, T>, id: u64, what: &'static str) -> BackendResult<T> {
    map.get(&id).copied().ok_or(BackendError::InvalidHandle(what))
}

/// Vulkan implementation of [`GpuBackend`] rendering to a single window.
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    allocator: ManuallyDrop<Allocator>,
    command_pool: vk::CommandPool,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: VulkanSwapchain,
    swapchain_images: Vec<ImageHandle>,
    acceleration_structure_loader: Option<ash::khr::acceleration_structure::Device>,
    capabilities: DeviceCapabilities,
    vsync: bool,

    next_id: u64,
    buffers: HashMap<u64, BufferEntry>,
    images: HashMap<u64, ImageEntry>,
    image_views: HashMap<u64, vk::ImageView>,
    samplers: HashMap<u64, vk::Sampler>,
    set_layouts: HashMap<u64, vk::DescriptorSetLayout>,
    descriptor_pools: HashMap<u64, vk::DescriptorPool>,
    descriptor_sets: HashMap<u64, DescriptorSetEntry>,
    pipeline_layouts: HashMap<u64, vk::PipelineLayout>,
    pipelines: HashMap<u64, vk::Pipeline>,
    command_buffers: HashMap<u64, CommandBufferEntry>,
    fences: HashMap<u64, vk::Fence>,
    semaphores: HashMap<u64, vk::Semaphore>,
    acceleration_structures: HashMap<u64, vk::AccelerationStructureKHR>,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("device", &self.capabilities.device_name)
            .field("swapchain_extent", &self.swapchain.extent)
            .finish()
    }
}

impl VulkanBackend {
    /// Create the instance, device and swapchain for `window`.
    ///
    /// `extent` is only used when the surface does not dictate its own size.
    pub fn new<W>(window: &W, extent: Extent2d, config: &RenderConfig) -> BackendResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| BackendError::InitializationFailed(format!("No display handle: {}", e)))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| BackendError::InitializationFailed(format!("No window handle: {}", e)))?
            .as_raw();

        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let bundle = instance::create_instance(&entry, &config.app_name, display, config.validation)?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &bundle.instance);

        let surface = match unsafe {
            ash_window::create_surface(&entry, &bundle.instance, display, window, None)
        } {
            Ok(surface) => surface,
            Err(e) => {
                destroy_instance(&bundle);
                return Err(BackendError::InitializationFailed(format!(
                    "Failed to create surface: {:?}",
                    e
                )));
            }
        };

        match Self::with_surface(entry, &bundle, surface_loader.clone(), surface, extent, config) {
            Ok(backend) => Ok(backend),
            Err(err) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(&bundle);
                Err(err)
            }
        }
    }

    fn with_surface(
        entry: ash::Entry,
        bundle: &instance::InstanceBundle,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        extent: Extent2d,
        config: &RenderConfig,
    ) -> BackendResult<Self> {
        let instance = &bundle.instance;
        let selected = device::select_physical_device(instance, &surface_loader, surface, config)?;
        let device = device::create_logical_device(instance, &selected)?;

        let created = Self::with_device(instance, &device, &selected, &surface_loader, surface, extent, config);
        let (allocator, command_pool, swapchain_loader, swapchain) = match created {
            Ok(parts) => parts,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(err);
            }
        };

        let queue = unsafe { device.get_device_queue(selected.queue_family, 0) };
        let acceleration_structure_loader = selected
            .capabilities
            .raytracing
            .then(|| ash::khr::acceleration_structure::Device::new(instance, &device));

        let mut backend = Self {
            _entry: entry,
            instance: instance.clone(),
            debug_utils: bundle.debug_utils.clone(),
            debug_messenger: bundle.debug_messenger,
            surface_loader,
            surface,
            physical_device: selected.physical_device,
            device,
            queue,
            allocator: ManuallyDrop::new(allocator),
            command_pool,
            swapchain_loader,
            swapchain,
            swapchain_images: Vec::new(),
            acceleration_structure_loader,
            capabilities: selected.capabilities,
            vsync: config.vsync,
            next_id: 1,
            buffers: HashMap::new(),
            images: HashMap::new(),
            image_views: HashMap::new(),
            samplers: HashMap::new(),
            set_layouts: HashMap::new(),
            descriptor_pools: HashMap::new(),
            descriptor_sets: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            pipelines: HashMap::new(),
            command_buffers: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            acceleration_structures: HashMap::new(),
        };
        backend.register_swapchain_images();

        log::info!("Vulkan backend initialized on {}", backend.capabilities.device_name);
        Ok(backend)
    }

    fn with_device(
        instance: &ash::Instance,
        device: &ash::Device,
        selected: &device::SelectedDevice,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        extent: Extent2d,
        config: &RenderConfig,
    ) -> BackendResult<(Allocator, vk::CommandPool, ash::khr::swapchain::Device, VulkanSwapchain)>
    {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: selected.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: selected.capabilities.buffer_device_address,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
        })?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(selected.queue_family);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|e| convert_result("vkCreateCommandPool", e))?;

        let swapchain_loader = ash::khr::swapchain::Device::new(instance, device);
        let ctx = SwapchainContext {
            surface_loader,
            swapchain_loader: &swapchain_loader,
            physical_device: selected.physical_device,
            surface,
        };
        let swapchain = match swapchain::create_swapchain(&ctx, extent, config.vsync, vk::SwapchainKHR::null()) {
            Ok(swapchain) => swapchain,
            Err(err) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                allocator.report_memory_leaks(log::Level::Warn);
                return Err(err);
            }
        };

        Ok((allocator, command_pool, swapchain_loader, swapchain))
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn register_swapchain_images(&mut self) {
        let images = self.swapchain.images.clone();
        self.swapchain_images = images
            .into_iter()
            .map(|image| {
                let id = self.next_id();
                self.images.insert(
                    id,
                    ImageEntry {
                        image,
                        allocation: None,
                    },
                );
                ImageHandle(id)
            })
            .collect();
    }

    fn unregister_swapchain_images(&mut self) {
        for handle in self.swapchain_images.drain(..) {
            self.images.remove(&handle.0);
        }
    }

    fn acceleration_structure_loader(
        &self,
    ) -> BackendResult<&ash::khr::acceleration_structure::Device> {
        self.acceleration_structure_loader
            .as_ref()
            .ok_or_else(|| BackendError::Unsupported("raytracing is not enabled".to_string()))
    }

    fn buffer(&self, buffer: BufferHandle) -> BackendResult<vk::Buffer> {
        self.buffers
            .get(&buffer.0)
            .map(|entry| entry.buffer)
            .ok_or(BackendError::InvalidHandle("buffer"))
    }

    fn image(&self, image: ImageHandle) -> BackendResult<vk::Image> {
        self.images
            .get(&image.0)
            .map(|entry| entry.image)
            .ok_or(BackendError::InvalidHandle("image"))
    }

    fn recording(&self, cmd: CommandBufferHandle) -> Option<vk::CommandBuffer> {
        let found = self.command_buffers.get(&cmd.0).map(|entry| entry.buffer);
        if found.is_none() {
            log::error!("Recording into unknown command buffer {:?}", cmd);
        }
        found
    }

    fn free_allocation(&mut self, allocation: Allocation) {
        if let Err(e) = self.allocator.free(allocation) {
            log::error!("Failed to free GPU memory: {}", e);
        }
    }

    fn allocate_memory(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> BackendResult<Allocation> {
        self.allocator
            .allocate(&AllocationCreateDesc {
                name: if name.is_empty() { "unnamed" } else { name },
                requirements,
                location: convert_memory_location(location),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| match e {
                gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
                other => BackendError::InvalidOperation(format!(
                    "Failed to allocate memory for {}: {}",
                    name, other
                )),
            })
    }

    fn destroy_everything(&mut self) {
        let leaked = self.buffers.len()
            + self.images.len().saturating_sub(self.swapchain_images.len())
            + self.image_views.len()
            + self.samplers.len()
            + self.set_layouts.len()
            + self.descriptor_pools.len()
            + self.pipeline_layouts.len()
            + self.pipelines.len()
            + self.fences.len()
            + self.semaphores.len()
            + self.acceleration_structures.len();
        if leaked > 0 {
            log::warn!("Destroying {} GPU objects still alive at shutdown", leaked);
        }

        unsafe {
            if let Some(loader) = &self.acceleration_structure_loader {
                for (_, structure) in self.acceleration_structures.drain() {
                    loader.destroy_acceleration_structure(structure, None);
                }
            }
            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
            }
            for (_, layout) in self.pipeline_layouts.drain() {
                self.device.destroy_pipeline_layout(layout, None);
            }
            self.descriptor_sets.clear();
            for (_, pool) in self.descriptor_pools.drain() {
                self.device.destroy_descriptor_pool(pool, None);
            }
            for (_, layout) in self.set_layouts.drain() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, view) in self.image_views.drain() {
                self.device.destroy_image_view(view, None);
            }
            for (_, fence) in self.fences.drain() {
                self.device.destroy_fence(fence, None);
            }
            for (_, semaphore) in self.semaphores.drain() {
                self.device.destroy_semaphore(semaphore, None);
            }
            self.command_buffers.clear();
            self.device.destroy_command_pool(self.command_pool, None);
        }

        self.unregister_swapchain_images();
        let images: Vec<ImageEntry> = self.images.drain().map(|(_, entry)| entry).collect();
        for entry in images {
            unsafe { self.device.destroy_image(entry.image, None) };
            if let Some(allocation) = entry.allocation {
                self.free_allocation(allocation);
            }
        }
        let buffers: Vec<BufferEntry> = self.buffers.drain().map(|(_, entry)| entry).collect();
        for entry in buffers {
            unsafe { self.device.destroy_buffer(entry.buffer, None) };
            self.free_allocation(entry.allocation);
        }
    }
}

fn destroy_instance(bundle: &instance::InstanceBundle) {
    unsafe {
        if let (Some(debug_utils), Some(messenger)) = (&bundle.debug_utils, bundle.debug_messenger) {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }
        bundle.instance.destroy_instance(None);
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        self.destroy_everything();
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain.swapchain, None);
            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::info!("Vulkan backend destroyed");
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn image_format_supported(&self, format: Format, tiling: ImageTiling, usage: ImageUsage) -> bool {
        let properties = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, convert_format(format))
        };
        let available = match tiling {
            ImageTiling::Optimal => properties.optimal_tiling_features,
            ImageTiling::Linear => properties.linear_tiling_features,
        };
        available.contains(required_format_features(usage))
    }

    // Buffers

    fn create_buffer(&mut self, desc: &BufferDesc) -> BackendResult<BufferHandle> {
        let mut usage = desc.usage;
        if usage.contains(BufferUsage::SHADER_DEVICE_ADDRESS) && !self.capabilities.buffer_device_address {
            return Err(BackendError::Unsupported(
                "buffer device addresses are not available".to_string(),
            ));
        }
        if usage.intersects(
            BufferUsage::ACCELERATION_STRUCTURE_STORAGE | BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT,
        ) {
            usage |= BufferUsage::SHADER_DEVICE_ADDRESS;
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(convert_buffer_usage(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| convert_result("vkCreateBuffer", e))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = match self.allocate_memory(&desc.label, requirements, desc.location, true) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free_allocation(allocation);
            return Err(convert_result("vkBindBufferMemory", e));
        }

        let id = self.next_id();
        self.buffers.insert(id, BufferEntry { buffer, allocation });
        log::trace!("Created buffer {} '{}' ({} bytes)", id, desc.label, desc.size);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let Some(entry) = self.buffers.remove(&buffer.0) else {
            log::error!("Destroying unknown buffer {:?}", buffer);
            return;
        };
        unsafe { self.device.destroy_buffer(entry.buffer, None) };
        self.free_allocation(entry.allocation);
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let entry = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle("buffer"))?;
        let mapped = entry.allocation.mapped_slice_mut().ok_or_else(|| {
            BackendError::InvalidOperation("write to a buffer that is not host visible".to_string())
        })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > mapped.len() {
            return Err(BackendError::InvalidOperation(format!(
                "write of {} bytes at {} overruns buffer of {} bytes",
                data.len(),
                offset,
                mapped.len()
            )));
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> BackendResult<()> {
        let entry = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::InvalidHandle("buffer"))?;
        let mapped = entry.allocation.mapped_slice().ok_or_else(|| {
            BackendError::InvalidOperation("read from a buffer that is not host visible".to_string())
        })?;
        let start = offset as usize;
        let end = start + out.len();
        if end > mapped.len() {
            return Err(BackendError::InvalidOperation(format!(
                "read of {} bytes at {} overruns buffer of {} bytes",
                out.len(),
                offset,
                mapped.len()
            )));
        }
        out.copy_from_slice(&mapped[start..end]);
        Ok(())
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> BackendResult<u64> {
        if !self.capabilities.buffer_device_address {
            return Err(BackendError::Unsupported(
                "buffer device addresses are not available".to_string(),
            ));
        }
        let buffer = self.buffer(buffer)?;
        let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        Ok(unsafe { self.device.get_buffer_device_address(&info) })
    }

    // Images

    fn create_image(&mut self, desc: &ImageDesc) -> BackendResult<ImageHandle> {
        if !self.image_format_supported(desc.format, desc.tiling, desc.usage) {
            return Err(BackendError::Unsupported(format!(
                "{:?} with {:?} tiling and usage {:?}",
                desc.format, desc.tiling, desc.usage
            )));
        }

        let (image_type, flags) = match desc.kind {
            ImageKind::D2 => (vk::ImageType::TYPE_2D, vk::ImageCreateFlags::empty()),
            ImageKind::D3 => (vk::ImageType::TYPE_3D, vk::ImageCreateFlags::empty()),
            ImageKind::Cube => (vk::ImageType::TYPE_2D, vk::ImageCreateFlags::CUBE_COMPATIBLE),
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(image_type)
            .format(convert_format(desc.format))
            .extent(convert_extent(desc.extent))
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(convert_tiling(desc.tiling))
            .usage(convert_image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| convert_result("vkCreateImage", e))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let linear = desc.tiling == ImageTiling::Linear;
        let allocation =
            match self.allocate_memory(&desc.label, requirements, MemoryLocation::GpuOnly, linear) {
                Ok(allocation) => allocation,
                Err(err) => {
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(err);
                }
            };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_image(image, None) };
            self.free_allocation(allocation);
            return Err(convert_result("vkBindImageMemory", e));
        }

        let id = self.next_id();
        self.images.insert(
            id,
            ImageEntry {
                image,
                allocation: Some(allocation),
            },
        );
        log::trace!(
            "Created image {} '{}' {}x{}x{} {:?}",
            id,
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.extent.depth,
            desc.format
        );
        Ok(ImageHandle(id))
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if self.swapchain_images.contains(&image) {
            log::error!("Swapchain image {:?} cannot be destroyed", image);
            return;
        }
        let Some(entry) = self.images.remove(&image.0) else {
            log::error!("Destroying unknown image {:?}", image);
            return;
        };
        unsafe { self.device.destroy_image(entry.image, None) };
        if let Some(allocation) = entry.allocation {
            self.free_allocation(allocation);
        }
    }

    fn create_image_view(&mut self, desc: &ImageViewDesc) -> BackendResult<ImageViewHandle> {
        let image = self.image(desc.image)?;
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(convert_view_kind(desc.kind))
            .format(convert_format(desc.format))
            .subresource_range(convert_subresource_range(&desc.range));
        let view = unsafe { self.device.create_image_view(&info, None) }
            .map_err(|e| convert_result("vkCreateImageView", e))?;
        let id = self.next_id();
        self.image_views.insert(id, view);
        Ok(ImageViewHandle(id))
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        match self.image_views.remove(&view.0) {
            Some(view) => unsafe { self.device.destroy_image_view(view, None) },
            None => log::error!("Destroying unknown image view {:?}", view),
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        let address_mode = convert_address_mode(desc.address_mode);
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter(desc.mag_filter))
            .min_filter(convert_filter(desc.min_filter))
            .mipmap_mode(convert_mipmap_mode(desc.mipmap_filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(desc.min_filter == Filter::Linear)
            .max_anisotropy(16.0)
            .min_lod(0.0)
            .max_lod(desc.max_lod);
        let sampler = unsafe { self.device.create_sampler(&info, None) }
            .map_err(|e| convert_result("vkCreateSampler", e))?;
        let id = self.next_id();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        match self.samplers.remove(&sampler.0) {
            Some(sampler) => unsafe { self.device.destroy_sampler(sampler, None) },
            None => log::error!("Destroying unknown sampler {:?}", sampler),
        }
    }

    // Descriptors

    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDesc,
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let uses_indexing = desc
            .bindings
            .iter()
            .any(|binding| !binding.flags.is_empty());
        if uses_indexing && !self.capabilities.bindless {
            return Err(BackendError::Unsupported(
                "descriptor indexing is not enabled".to_string(),
            ));
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(convert_descriptor_type(binding.ty))
                    .descriptor_count(binding.count)
                    .stage_flags(convert_shader_stages(binding.stages))
            })
            .collect();
        let binding_flags: Vec<vk::DescriptorBindingFlags> = desc
            .bindings
            .iter()
            .map(|binding| convert_binding_flags(binding.flags))
            .collect();
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let mut info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        if desc.update_after_bind_pool {
            info = info.flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL);
        }
        if uses_indexing {
            info = info.push_next(&mut flags_info);
        }

        let layout = unsafe { self.device.create_descriptor_set_layout(&info, None) }
            .map_err(|e| convert_result("vkCreateDescriptorSetLayout", e))?;
        let id = self.next_id();
        self.set_layouts.insert(id, layout);
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        match self.set_layouts.remove(&layout.0) {
            Some(layout) => unsafe { self.device.destroy_descriptor_set_layout(layout, None) },
            None => log::error!("Destroying unknown descriptor set layout {:?}", layout),
        }
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &DescriptorPoolDesc,
    ) -> BackendResult<DescriptorPoolHandle> {
        let sizes: Vec<vk::DescriptorPoolSize> = desc
            .sizes
            .iter()
            .filter(|size| size.count > 0)
            .filter(|size| {
                size.ty != DescriptorType::AccelerationStructure || self.capabilities.raytracing
            })
            .map(|size| vk::DescriptorPoolSize {
                ty: convert_descriptor_type(size.ty),
                descriptor_count: size.count,
            })
            .collect();

        let mut flags = vk::DescriptorPoolCreateFlags::empty();
        if desc.update_after_bind {
            flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }
        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(desc.max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe { self.device.create_descriptor_pool(&info, None) }
            .map_err(|e| convert_result("vkCreateDescriptorPool", e))?;
        let id = self.next_id();
        self.descriptor_pools.insert(id, pool);
        log::debug!(
            "Created descriptor pool {} ({} sets, update after bind: {})",
            id,
            desc.max_sets,
            desc.update_after_bind
        );
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let Some(vk_pool) = self.descriptor_pools.remove(&pool.0) else {
            log::error!("Destroying unknown descriptor pool {:?}", pool);
            return;
        };
        self.descriptor_sets.retain(|_, entry| entry.pool != pool.0);
        unsafe { self.device.destroy_descriptor_pool(vk_pool, None) };
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        variable_count: Option<u32>,
    ) -> BackendResult<DescriptorSetHandle> {
        let vk_pool = lookup(&self.descriptor_pools, pool.0, "descriptor pool")?;
        let vk_layout = lookup(&self.set_layouts, layout.0, "descriptor set layout")?;

        let layouts = [vk_layout];
        let counts = [variable_count.unwrap_or(0)];
        let mut variable_info =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);
        let mut info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vk_pool)
            .set_layouts(&layouts);
        if variable_count.is_some() {
            info = info.push_next(&mut variable_info);
        }

        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }
            .map_err(|e| convert_result("vkAllocateDescriptorSets", e))?;
        let set = sets
            .first()
            .copied()
            .ok_or_else(|| BackendError::InvalidOperation("no descriptor set returned".to_string()))?;

        let id = self.next_id();
        self.descriptor_sets
            .insert(id, DescriptorSetEntry { set, pool: pool.0 });
        Ok(DescriptorSetHandle(id))
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]) -> BackendResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let mut sets = Vec::with_capacity(writes.len());
        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut structures = Vec::new();

        for write in writes {
            sets.push(lookup(&self.descriptor_sets, write.set.0, "descriptor set")?.set);
            match write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => buffer_infos.push([vk::DescriptorBufferInfo {
                    buffer: self.buffer(buffer)?,
                    offset,
                    range: if range == 0 { vk::WHOLE_SIZE } else { range },
                }]),
                DescriptorResource::Image {
                    view,
                    sampler,
                    state,
                } => {
                    let sampler = match sampler {
                        Some(sampler) => lookup(&self.samplers, sampler.0, "sampler")?,
                        None => vk::Sampler::null(),
                    };
                    image_infos.push([vk::DescriptorImageInfo {
                        sampler,
                        image_view: lookup(&self.image_views, view.0, "image view")?,
                        image_layout: state_layout(state),
                    }]);
                }
                DescriptorResource::Sampler(sampler) => image_infos.push([vk::DescriptorImageInfo {
                    sampler: lookup(&self.samplers, sampler.0, "sampler")?,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }]),
                DescriptorResource::AccelerationStructure(structure) => structures.push([lookup(
                    &self.acceleration_structures,
                    structure.0,
                    "acceleration structure",
                )?]),
            }
        }

        let mut structure_infos: Vec<vk::WriteDescriptorSetAccelerationStructureKHR<'_>> = structures
            .iter()
            .map(|structure| {
                vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(structure)
            })
            .collect();

        let mut buffer_iter = buffer_infos.iter();
        let mut image_iter = image_infos.iter();
        let mut structure_iter = structure_infos.iter_mut();
        let mut vk_writes = Vec::with_capacity(writes.len());

        for (write, &set) in writes.iter().zip(&sets) {
            let base = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding)
                .dst_array_element(write.array_element)
                .descriptor_type(convert_descriptor_type(write.ty));
            let vk_write = match write.resource {
                DescriptorResource::Buffer { .. } => match buffer_iter.next() {
                    Some(info) => base.buffer_info(info),
                    None => continue,
                },
                DescriptorResource::Image { .. } | DescriptorResource::Sampler(_) => {
                    match image_iter.next() {
                        Some(info) => base.image_info(info),
                        None => continue,
                    }
                }
                DescriptorResource::AccelerationStructure(_) => match structure_iter.next() {
                    Some(info) => {
                        let mut vk_write = base.push_next(info);
                        vk_write.descriptor_count = 1;
                        vk_write
                    }
                    None => continue,
                },
            };
            vk_writes.push(vk_write);
        }

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        log::trace!("Applied {} descriptor writes", vk_writes.len());
        Ok(())
    }

    // Pipelines

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDesc,
    ) -> BackendResult<PipelineLayoutHandle> {
        let set_layouts = desc
            .set_layouts
            .iter()
            .map(|layout| lookup(&self.set_layouts, layout.0, "descriptor set layout"))
            .collect::<BackendResult<Vec<_>>>()?;
        let ranges: Vec<vk::PushConstantRange> = desc
            .push_constants
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: convert_shader_stages(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();

        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&info, None) }
            .map_err(|e| convert_result("vkCreatePipelineLayout", e))?;
        let id = self.next_id();
        self.pipeline_layouts.insert(id, layout);
        Ok(PipelineLayoutHandle(id))
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        match self.pipeline_layouts.remove(&layout.0) {
            Some(layout) => unsafe { self.device.destroy_pipeline_layout(layout, None) },
            None => log::error!("Destroying unknown pipeline layout {:?}", layout),
        }
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc<'_>,
    ) -> BackendResult<PipelineHandle> {
        let layout = lookup(&self.pipeline_layouts, desc.layout.0, "pipeline layout")?;
        let entry_point = CString::new(desc.entry_point).map_err(|_| {
            BackendError::InvalidOperation(format!("entry point '{}' contains NUL", desc.entry_point))
        })?;

        let module_info = vk::ShaderModuleCreateInfo::default().code(desc.spirv);
        let module = unsafe { self.device.create_shader_module(&module_info, None) }
            .map_err(|e| convert_result("vkCreateShaderModule", e))?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_point);
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);
        let result = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        unsafe { self.device.destroy_shader_module(module, None) };

        let pipeline = match result {
            Ok(pipelines) => pipelines.first().copied().ok_or_else(|| {
                BackendError::InvalidOperation("no compute pipeline returned".to_string())
            })?,
            Err((_, e)) => return Err(convert_result("vkCreateComputePipelines", e)),
        };

        let id = self.next_id();
        self.pipelines.insert(id, pipeline);
        log::debug!("Created compute pipeline {} '{}'", id, desc.label);
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        match self.pipelines.remove(&pipeline.0) {
            Some(pipeline) => unsafe { self.device.destroy_pipeline(pipeline, None) },
            None => log::error!("Destroying unknown pipeline {:?}", pipeline),
        }
    }

    // Command buffers

    fn allocate_command_buffer(
        &mut self,
        level: CommandBufferLevel,
    ) -> BackendResult<CommandBufferHandle> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(match level {
                CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
                CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
            })
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(|e| convert_result("vkAllocateCommandBuffers", e))?;
        let buffer = buffers.first().copied().ok_or_else(|| {
            BackendError::InvalidOperation("no command buffer returned".to_string())
        })?;
        let id = self.next_id();
        self.command_buffers
            .insert(id, CommandBufferEntry { buffer, level });
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffer(&mut self, cmd: CommandBufferHandle) {
        match self.command_buffers.remove(&cmd.0) {
            Some(entry) => unsafe {
                self.device
                    .free_command_buffers(self.command_pool, &[entry.buffer])
            },
            None => log::error!("Freeing unknown command buffer {:?}", cmd),
        }
    }

    fn begin_command_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
        inheritance: Option<&CommandBufferInheritance>,
    ) -> BackendResult<()> {
        let entry = lookup(&self.command_buffers, cmd.0, "command buffer")?;
        // No render passes are used, so secondaries inherit nothing beyond an
        // empty inheritance record.
        if inheritance.is_some_and(|i| !i.color_formats.is_empty() || i.depth_format.is_some()) {
            log::trace!("Ignoring attachment inheritance for {:?}", cmd);
        }
        let inheritance_info = vk::CommandBufferInheritanceInfo::default();
        let mut info =
            vk::CommandBufferBeginInfo::default().flags(convert_command_buffer_usage(usage));
        if entry.level == CommandBufferLevel::Secondary {
            info = info.inheritance_info(&inheritance_info);
        }
        unsafe { self.device.begin_command_buffer(entry.buffer, &info) }
            .map_err(|e| convert_result("vkBeginCommandBuffer", e))
    }

    fn end_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let entry = lookup(&self.command_buffers, cmd.0, "command buffer")?;
        unsafe { self.device.end_command_buffer(entry.buffer) }
            .map_err(|e| convert_result("vkEndCommandBuffer", e))
    }

    fn reset_command_buffer(&mut self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let entry = lookup(&self.command_buffers, cmd.0, "command buffer")?;
        unsafe {
            self.device
                .reset_command_buffer(entry.buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| convert_result("vkResetCommandBuffer", e))
    }

    // Recording

    fn cmd_pipeline_barrier(
        &mut self,
        cmd: CommandBufferHandle,
        buffer_barriers: &[BufferBarrier],
        image_barriers: &[ImageBarrier],
    ) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let mut src_stages = vk::PipelineStageFlags::empty();
        let mut dst_stages = vk::PipelineStageFlags::empty();

        let mut vk_buffer_barriers = Vec::with_capacity(buffer_barriers.len());
        for barrier in buffer_barriers {
            let Ok(buffer) = self.buffer(barrier.buffer) else {
                log::error!("Barrier on unknown buffer {:?}", barrier.buffer);
                continue;
            };
            src_stages |= state_stages(barrier.old_state);
            dst_stages |= state_stages(barrier.new_state);
            vk_buffer_barriers.push(
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(state_access(barrier.old_state))
                    .dst_access_mask(state_access(barrier.new_state))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE),
            );
        }

        let mut vk_image_barriers = Vec::with_capacity(image_barriers.len());
        for barrier in image_barriers {
            let Ok(image) = self.image(barrier.image) else {
                log::error!("Barrier on unknown image {:?}", barrier.image);
                continue;
            };
            src_stages |= state_stages(barrier.old_state);
            dst_stages |= state_stages(barrier.new_state);
            vk_image_barriers.push(
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(state_access(barrier.old_state))
                    .dst_access_mask(state_access(barrier.new_state))
                    .old_layout(state_layout(barrier.old_state))
                    .new_layout(state_layout(barrier.new_state))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(convert_subresource_range(&barrier.range)),
            );
        }

        if vk_buffer_barriers.is_empty() && vk_image_barriers.is_empty() {
            return;
        }
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stages,
                dst_stages,
                vk::DependencyFlags::empty(),
                &[],
                &vk_buffer_barriers,
                &vk_image_barriers,
            );
        }
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let (Ok(src), Ok(dst)) = (self.buffer(src), self.buffer(dst)) else {
            log::error!("Copy between unknown buffers");
            return;
        };
        let regions: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|region| vk::BufferCopy {
                src_offset: region.src_offset,
                dst_offset: region.dst_offset,
                size: region.size,
            })
            .collect();
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, &regions) };
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        regions: &[BufferImageCopy],
    ) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let (Ok(src), Ok(dst)) = (self.buffer(src), self.image(dst)) else {
            log::error!("Copy from unknown buffer or to unknown image");
            return;
        };
        let regions: Vec<vk::BufferImageCopy> = regions
            .iter()
            .map(|region| {
                vk::BufferImageCopy::default()
                    .buffer_offset(region.buffer_offset)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: convert_aspect(region.aspect),
                        mip_level: region.mip_level,
                        base_array_layer: region.base_array_layer,
                        layer_count: region.array_layer_count,
                    })
                    .image_offset(vk::Offset3D::default())
                    .image_extent(convert_extent(region.extent))
            })
            .collect();
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }
    }

    fn cmd_blit_image(
        &mut self,
        cmd: CommandBufferHandle,
        src: ImageHandle,
        dst: ImageHandle,
        blit: &ImageBlit,
        filter: Filter,
    ) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let (Ok(src), Ok(dst)) = (self.image(src), self.image(dst)) else {
            log::error!("Blit between unknown images");
            return;
        };
        let layers = |mip_level| vk::ImageSubresourceLayers {
            aspect_mask: convert_aspect(blit.aspect),
            mip_level,
            base_array_layer: blit.base_array_layer,
            layer_count: blit.array_layer_count,
        };
        let region = vk::ImageBlit::default()
            .src_subresource(layers(blit.src_mip_level))
            .src_offsets([vk::Offset3D::default(), extent_corner(blit.src_extent)])
            .dst_subresource(layers(blit.dst_mip_level))
            .dst_offsets([vk::Offset3D::default(), extent_corner(blit.dst_extent)]);
        unsafe {
            self.device.cmd_blit_image(
                cmd,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                convert_filter(filter),
            );
        }
    }

    fn cmd_clear_color_image(
        &mut self,
        cmd: CommandBufferHandle,
        image: ImageHandle,
        color: [f32; 4],
        range: &SubresourceRange,
    ) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let Ok(image) = self.image(image) else {
            log::error!("Clear of unknown image {:?}", image);
            return;
        };
        let value = vk::ClearColorValue { float32: color };
        unsafe {
            self.device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &value,
                &[convert_subresource_range(range)],
            );
        }
    }

    fn cmd_bind_pipeline(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    ) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let Ok(pipeline) = lookup(&self.pipelines, pipeline.0, "pipeline") else {
            log::error!("Binding unknown pipeline {:?}", pipeline);
            return;
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, convert_bind_point(bind_point), pipeline)
        };
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let Ok(layout) = lookup(&self.pipeline_layouts, layout.0, "pipeline layout") else {
            log::error!("Binding sets with unknown layout {:?}", layout);
            return;
        };
        let Ok(vk_sets) = sets
            .iter()
            .map(|set| lookup(&self.descriptor_sets, set.0, "descriptor set").map(|e| e.set))
            .collect::<BackendResult<Vec<_>>>()
        else {
            log::error!("Binding unknown descriptor sets {:?}", sets);
            return;
        };
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                convert_bind_point(bind_point),
                layout,
                first_set,
                &vk_sets,
                dynamic_offsets,
            );
        }
    }

    fn cmd_push_constants(
        &mut self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let Ok(layout) = lookup(&self.pipeline_layouts, layout.0, "pipeline layout") else {
            log::error!("Push constants with unknown layout {:?}", layout);
            return;
        };
        unsafe {
            self.device
                .cmd_push_constants(cmd, layout, convert_shader_stages(stages), offset, data)
        };
    }

    fn cmd_dispatch(&mut self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        if let Some(cmd) = self.recording(cmd) {
            unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
        }
    }

    fn cmd_execute_commands(&mut self, cmd: CommandBufferHandle, secondaries: &[CommandBufferHandle]) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let Ok(buffers) = secondaries
            .iter()
            .map(|s| lookup(&self.command_buffers, s.0, "command buffer").map(|e| e.buffer))
            .collect::<BackendResult<Vec<_>>>()
        else {
            log::error!("Executing unknown secondary command buffers");
            return;
        };
        if !buffers.is_empty() {
            unsafe { self.device.cmd_execute_commands(cmd, &buffers) };
        }
    }

    // Queue

    fn submit(&mut self, info: &SubmitInfo<'_>) -> BackendResult<()> {
        let command_buffers = info
            .command_buffers
            .iter()
            .map(|cmd| lookup(&self.command_buffers, cmd.0, "command buffer").map(|e| e.buffer))
            .collect::<BackendResult<Vec<_>>>()?;
        let mut wait_semaphores = Vec::with_capacity(info.waits.len());
        let mut wait_stages = Vec::with_capacity(info.waits.len());
        for &(semaphore, stages) in info.waits {
            wait_semaphores.push(lookup(&self.semaphores, semaphore.0, "semaphore")?);
            wait_stages.push(convert_pipeline_stages(stages));
        }
        let signal_semaphores = info
            .signals
            .iter()
            .map(|s| lookup(&self.semaphores, s.0, "semaphore"))
            .collect::<BackendResult<Vec<_>>>()?;
        let fence = match info.fence {
            Some(fence) => lookup(&self.fences, fence.0, "fence")?,
            None => vk::Fence::null(),
        };

        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe { self.device.queue_submit(self.queue, &[submit], fence) }
            .map_err(|e| convert_result("vkQueueSubmit", e))
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| convert_result("vkDeviceWaitIdle", e))
    }

    // Synchronization

    fn create_fence(&mut self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(|e| convert_result("vkCreateFence", e))?;
        let id = self.next_id();
        self.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        match self.fences.remove(&fence.0) {
            Some(fence) => unsafe { self.device.destroy_fence(fence, None) },
            None => log::error!("Destroying unknown fence {:?}", fence),
        }
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> BackendResult<FenceWait> {
        let fence = lookup(&self.fences, fence.0, "fence")?;
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(FenceWait::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceWait::Timeout),
            Err(e) => Err(convert_result("vkWaitForFences", e)),
        }
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> BackendResult<()> {
        let fence = lookup(&self.fences, fence.0, "fence")?;
        unsafe { self.device.reset_fences(&[fence]) }.map_err(|e| convert_result("vkResetFences", e))
    }

    fn create_semaphore(&mut self) -> BackendResult<SemaphoreHandle> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(|e| convert_result("vkCreateSemaphore", e))?;
        let id = self.next_id();
        self.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        match self.semaphores.remove(&semaphore.0) {
            Some(semaphore) => unsafe { self.device.destroy_semaphore(semaphore, None) },
            None => log::error!("Destroying unknown semaphore {:?}", semaphore),
        }
    }

    // Swapchain

    fn swapchain_extent(&self) -> Extent2d {
        self.swapchain.extent
    }

    fn swapchain_format(&self) -> Format {
        self.swapchain.format
    }

    fn swapchain_image_count(&self) -> u32 {
        self.swapchain_images.len() as u32
    }

    fn swapchain_image(&self, index: u32) -> ImageHandle {
        self.swapchain_images[index as usize]
    }

    fn acquire_next_image(&mut self, signal: SemaphoreHandle) -> BackendResult<AcquiredImage> {
        let semaphore = lookup(&self.semaphores, signal.0, "semaphore")?;
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(|e| convert_result("vkAcquireNextImageKHR", e))?;
        Ok(AcquiredImage { index, suboptimal })
    }

    fn present(&mut self, image_index: u32, waits: &[SemaphoreHandle]) -> BackendResult<()> {
        let wait_semaphores = waits
            .iter()
            .map(|s| lookup(&self.semaphores, s.0, "semaphore"))
            .collect::<BackendResult<Vec<_>>>()?;
        let swapchains = [self.swapchain.swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let suboptimal = unsafe { self.swapchain_loader.queue_present(self.queue, &info) }
            .map_err(|e| convert_result("vkQueuePresentKHR", e))?;
        if suboptimal {
            log::debug!("Presented to a suboptimal swapchain");
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self, extent: Extent2d) -> BackendResult<()> {
        self.wait_idle()?;
        let ctx = SwapchainContext {
            surface_loader: &self.surface_loader,
            swapchain_loader: &self.swapchain_loader,
            physical_device: self.physical_device,
            surface: self.surface,
        };
        let new = swapchain::create_swapchain(&ctx, extent, self.vsync, self.swapchain.swapchain)?;
        let old = std::mem::replace(&mut self.swapchain, new);
        unsafe { self.swapchain_loader.destroy_swapchain(old.swapchain, None) };

        self.unregister_swapchain_images();
        self.register_swapchain_images();
        Ok(())
    }

    // Acceleration structures

    fn acceleration_structure_build_sizes(
        &self,
        kind: AccelerationStructureKind,
        flags: AccelerationStructureBuildFlags,
        geometries: &[AccelerationStructureGeometry],
    ) -> BackendResult<AccelerationStructureBuildSizes> {
        let loader = self.acceleration_structure_loader()?;
        let vk_geometries: Vec<_> = geometries.iter().map(convert_as_geometry).collect();
        let counts: Vec<u32> = geometries.iter().map(|g| g.primitive_count()).collect();
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(convert_as_kind(kind))
            .flags(convert_as_flags(flags))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&vk_geometries);

        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &counts,
                &mut sizes,
            );
        }
        Ok(AccelerationStructureBuildSizes {
            acceleration_structure_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
            update_scratch_size: sizes.update_scratch_size,
        })
    }

    fn create_acceleration_structure(
        &mut self,
        desc: &AccelerationStructureDesc,
    ) -> BackendResult<AccelerationStructureHandle> {
        let buffer = self.buffer(desc.buffer)?;
        let loader = self.acceleration_structure_loader()?;
        let info = vk::AccelerationStructureCreateInfoKHR::default()
            .ty(convert_as_kind(desc.kind))
            .buffer(buffer)
            .offset(desc.offset)
            .size(desc.size);
        let structure = unsafe { loader.create_acceleration_structure(&info, None) }
            .map_err(|e| convert_result("vkCreateAccelerationStructureKHR", e))?;
        let id = self.next_id();
        self.acceleration_structures.insert(id, structure);
        Ok(AccelerationStructureHandle(id))
    }

    fn destroy_acceleration_structure(&mut self, structure: AccelerationStructureHandle) {
        let Some(vk_structure) = self.acceleration_structures.remove(&structure.0) else {
            log::error!("Destroying unknown acceleration structure {:?}", structure);
            return;
        };
        match &self.acceleration_structure_loader {
            Some(loader) => unsafe { loader.destroy_acceleration_structure(vk_structure, None) },
            None => log::error!("Acceleration structure exists without raytracing enabled"),
        }
    }

    fn acceleration_structure_device_address(
        &self,
        structure: AccelerationStructureHandle,
    ) -> BackendResult<u64> {
        let loader = self.acceleration_structure_loader()?;
        let structure = lookup(&self.acceleration_structures, structure.0, "acceleration structure")?;
        let info = vk::AccelerationStructureDeviceAddressInfoKHR::default()
            .acceleration_structure(structure);
        Ok(unsafe { loader.get_acceleration_structure_device_address(&info) })
    }

    fn cmd_build_acceleration_structure(
        &mut self,
        cmd: CommandBufferHandle,
        build: &AccelerationStructureBuild<'_>,
    ) {
        let Some(cmd) = self.recording(cmd) else {
            return;
        };
        let Ok(dst) = lookup(&self.acceleration_structures, build.dst.0, "acceleration structure")
        else {
            log::error!("Build into unknown acceleration structure {:?}", build.dst);
            return;
        };
        let src = match build.src {
            Some(src) => match lookup(&self.acceleration_structures, src.0, "acceleration structure") {
                Ok(src) => src,
                Err(_) => {
                    log::error!("Update from unknown acceleration structure {:?}", src);
                    return;
                }
            },
            None => vk::AccelerationStructureKHR::null(),
        };
        let Ok(loader) = self.acceleration_structure_loader() else {
            log::error!("Acceleration structure build without raytracing enabled");
            return;
        };

        let vk_geometries: Vec<_> = build.geometries.iter().map(convert_as_geometry).collect();
        let ranges: Vec<vk::AccelerationStructureBuildRangeInfoKHR> = build
            .geometries
            .iter()
            .map(|geometry| vk::AccelerationStructureBuildRangeInfoKHR {
                primitive_count: geometry.primitive_count(),
                primitive_offset: 0,
                first_vertex: 0,
                transform_offset: 0,
            })
            .collect();
        let info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(convert_as_kind(build.kind))
            .flags(convert_as_flags(build.flags))
            .mode(convert_as_mode(build.mode))
            .src_acceleration_structure(src)
            .dst_acceleration_structure(dst)
            .geometries(&vk_geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: build.scratch_address,
            });

        unsafe {
            loader.cmd_build_acceleration_structures(cmd, &[info], &[ranges.as_slice()]);
        }
    }
}
