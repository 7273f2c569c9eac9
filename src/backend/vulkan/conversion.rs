//! Conversions between backend-neutral types and Vulkan types.

use ash::vk;

use crate::backend::traits::BackendError;
use crate::backend::types::*;

/// Map a Vulkan result to a backend error, keeping the cases the render core
/// reacts to distinguishable.
pub fn convert_result(call: &'static str, result: vk::Result) -> BackendError {
    match result {
        vk::Result::ERROR_OUT_OF_POOL_MEMORY => BackendError::OutOfPoolMemory,
        vk::Result::ERROR_FRAGMENTED_POOL => BackendError::FragmentedPool,
        vk::Result::ERROR_OUT_OF_DATE_KHR => BackendError::SurfaceOutOfDate,
        vk::Result::ERROR_SURFACE_LOST_KHR => BackendError::SurfaceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED | vk::Result::ERROR_FEATURE_NOT_PRESENT => {
            BackendError::Unsupported(format!("{} returned {:?}", call, result))
        }
        other => BackendError::Api {
            call,
            code: other.as_raw(),
        },
    }
}

pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::SHADER_DEVICE_ADDRESS) {
        result |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE) {
        result |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT) {
        result |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
    }
    if usage.contains(BufferUsage::SHADER_BINDING_TABLE) {
        result |= vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR;
    }

    result
}

pub fn convert_memory_location(location: MemoryLocation) -> gpu_allocator::MemoryLocation {
    match location {
        MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
        MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
        MemoryLocation::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
    }
}

pub fn convert_format(format: Format) -> vk::Format {
    match format {
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::Rg8Unorm => vk::Format::R8G8_UNORM,
        Format::Rgb8Unorm => vk::Format::R8G8B8_UNORM,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::R16Float => vk::Format::R16_SFLOAT,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::Rg32Float => vk::Format::R32G32_SFLOAT,
        Format::Rgb32Float => vk::Format::R32G32B32_SFLOAT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::Depth32Float => vk::Format::D32_SFLOAT,
        Format::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Inverse of [`convert_format`] for the formats a surface may report.
pub fn convert_format_back(format: vk::Format) -> Option<Format> {
    match format {
        vk::Format::R8G8B8A8_UNORM => Some(Format::Rgba8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(Format::Rgba8Srgb),
        vk::Format::B8G8R8A8_UNORM => Some(Format::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(Format::Bgra8Srgb),
        vk::Format::R16G16B16A16_SFLOAT => Some(Format::Rgba16Float),
        _ => None,
    }
}

pub fn convert_tiling(tiling: ImageTiling) -> vk::ImageTiling {
    match tiling {
        ImageTiling::Optimal => vk::ImageTiling::OPTIMAL,
        ImageTiling::Linear => vk::ImageTiling::LINEAR,
    }
}

pub fn convert_image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(ImageUsage::TRANSFER_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::STORAGE) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
        result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }

    result
}

/// Format features an image needs for the given usage.
pub fn required_format_features(usage: ImageUsage) -> vk::FormatFeatureFlags {
    let mut result = vk::FormatFeatureFlags::empty();

    if usage.contains(ImageUsage::TRANSFER_SRC) {
        result |= vk::FormatFeatureFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        result |= vk::FormatFeatureFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        result |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
    }
    if usage.contains(ImageUsage::STORAGE) {
        result |= vk::FormatFeatureFlags::STORAGE_IMAGE;
    }
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
        result |= vk::FormatFeatureFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
        result |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    }

    result
}

pub fn convert_aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    let mut result = vk::ImageAspectFlags::empty();
    if aspect.contains(ImageAspect::COLOR) {
        result |= vk::ImageAspectFlags::COLOR;
    }
    if aspect.contains(ImageAspect::DEPTH) {
        result |= vk::ImageAspectFlags::DEPTH;
    }
    if aspect.contains(ImageAspect::STENCIL) {
        result |= vk::ImageAspectFlags::STENCIL;
    }
    result
}

pub fn convert_subresource_range(range: &SubresourceRange) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: convert_aspect(range.aspect),
        base_mip_level: range.base_mip_level,
        level_count: range.mip_level_count,
        base_array_layer: range.base_array_layer,
        layer_count: range.array_layer_count,
    }
}

pub fn convert_extent(extent: Extent3d) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: extent.depth,
    }
}

/// Far corner of a blit region.
pub fn extent_corner(extent: Extent3d) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}

pub fn convert_view_kind(kind: ImageViewKind) -> vk::ImageViewType {
    match kind {
        ImageViewKind::D2 => vk::ImageViewType::TYPE_2D,
        ImageViewKind::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
        ImageViewKind::D3 => vk::ImageViewType::TYPE_3D,
        ImageViewKind::Cube => vk::ImageViewType::CUBE,
    }
}

pub fn convert_filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub fn convert_mipmap_mode(filter: Filter) -> vk::SamplerMipmapMode {
    match filter {
        Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
        Filter::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

pub fn convert_descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

pub fn convert_binding_flags(flags: DescriptorBindingFlags) -> vk::DescriptorBindingFlags {
    let mut result = vk::DescriptorBindingFlags::empty();
    if flags.contains(DescriptorBindingFlags::PARTIALLY_BOUND) {
        result |= vk::DescriptorBindingFlags::PARTIALLY_BOUND;
    }
    if flags.contains(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT) {
        result |= vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT;
    }
    if flags.contains(DescriptorBindingFlags::UPDATE_AFTER_BIND) {
        result |= vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
    }
    result
}

pub fn convert_shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::GEOMETRY) {
        result |= vk::ShaderStageFlags::GEOMETRY;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        result |= vk::ShaderStageFlags::COMPUTE;
    }
    if stages.contains(ShaderStages::RAYGEN) {
        result |= vk::ShaderStageFlags::RAYGEN_KHR;
    }
    if stages.contains(ShaderStages::MISS) {
        result |= vk::ShaderStageFlags::MISS_KHR;
    }
    if stages.contains(ShaderStages::CLOSEST_HIT) {
        result |= vk::ShaderStageFlags::CLOSEST_HIT_KHR;
    }
    if stages.contains(ShaderStages::ANY_HIT) {
        result |= vk::ShaderStageFlags::ANY_HIT_KHR;
    }
    result
}

pub fn convert_bind_point(bind_point: PipelineBindPoint) -> vk::PipelineBindPoint {
    match bind_point {
        PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
        PipelineBindPoint::RayTracing => vk::PipelineBindPoint::RAY_TRACING_KHR,
    }
}

pub fn convert_pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    let mut result = vk::PipelineStageFlags::empty();
    let table = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStages::DRAW_INDIRECT, vk::PipelineStageFlags::DRAW_INDIRECT),
        (PipelineStages::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (PipelineStages::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (PipelineStages::EARLY_FRAGMENT_TESTS, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS),
        (PipelineStages::LATE_FRAGMENT_TESTS, vk::PipelineStageFlags::LATE_FRAGMENT_TESTS),
        (PipelineStages::COLOR_ATTACHMENT_OUTPUT, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
        (PipelineStages::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        (
            PipelineStages::ACCELERATION_STRUCTURE_BUILD,
            vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        ),
        (PipelineStages::RAY_TRACING_SHADER, vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR),
        (PipelineStages::ALL_COMMANDS, vk::PipelineStageFlags::ALL_COMMANDS),
    ];
    for (ours, theirs) in table {
        if stages.contains(ours) {
            result |= theirs;
        }
    }
    result
}

/// Image layout a resource state implies.
pub fn state_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthStencil => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::CopyDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::CopySrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        ResourceState::Common
        | ResourceState::UnorderedAccess
        | ResourceState::ReadGeneric
        | ResourceState::VertexBuffer
        | ResourceState::ConstantBuffer
        | ResourceState::IndexBuffer
        | ResourceState::IndirectArg
        | ResourceState::AccelerationStructureRead
        | ResourceState::AccelerationStructureWrite => vk::ImageLayout::GENERAL,
    }
}

/// Accesses that must be made available (as source) or visible (as
/// destination) for a resource in this state.
pub fn state_access(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Undefined | ResourceState::Present => vk::AccessFlags::empty(),
        ResourceState::Common => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ResourceState::VertexBuffer => vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ResourceState::ConstantBuffer => vk::AccessFlags::UNIFORM_READ,
        ResourceState::IndexBuffer => vk::AccessFlags::INDEX_READ,
        ResourceState::RenderTarget => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        ResourceState::UnorderedAccess => {
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
        }
        ResourceState::DepthStencil => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        ResourceState::ShaderResource => vk::AccessFlags::SHADER_READ,
        ResourceState::IndirectArg => vk::AccessFlags::INDIRECT_COMMAND_READ,
        ResourceState::CopyDst => vk::AccessFlags::TRANSFER_WRITE,
        ResourceState::CopySrc => vk::AccessFlags::TRANSFER_READ,
        ResourceState::ReadGeneric => vk::AccessFlags::MEMORY_READ,
        ResourceState::AccelerationStructureRead => {
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
        }
        ResourceState::AccelerationStructureWrite => {
            vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR
                | vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
        }
    }
}

/// Pipeline stages that touch a resource in this state.
pub fn state_stages(state: ResourceState) -> vk::PipelineStageFlags {
    match state {
        ResourceState::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
        ResourceState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ResourceState::Common | ResourceState::ReadGeneric => {
            vk::PipelineStageFlags::ALL_COMMANDS
        }
        ResourceState::VertexBuffer | ResourceState::IndexBuffer => {
            vk::PipelineStageFlags::VERTEX_INPUT
        }
        ResourceState::ConstantBuffer
        | ResourceState::UnorderedAccess
        | ResourceState::ShaderResource => {
            vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER
        }
        ResourceState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceState::DepthStencil => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        ResourceState::IndirectArg => vk::PipelineStageFlags::DRAW_INDIRECT,
        ResourceState::CopyDst | ResourceState::CopySrc => vk::PipelineStageFlags::TRANSFER,
        ResourceState::AccelerationStructureRead | ResourceState::AccelerationStructureWrite => {
            vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR
        }
    }
}

pub fn convert_as_kind(kind: AccelerationStructureKind) -> vk::AccelerationStructureTypeKHR {
    match kind {
        AccelerationStructureKind::BottomLevel => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelerationStructureKind::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

pub fn convert_as_flags(
    flags: AccelerationStructureBuildFlags,
) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut result = vk::BuildAccelerationStructureFlagsKHR::empty();
    if flags.contains(AccelerationStructureBuildFlags::PREFER_FAST_TRACE) {
        result |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    }
    if flags.contains(AccelerationStructureBuildFlags::PREFER_FAST_BUILD) {
        result |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD;
    }
    if flags.contains(AccelerationStructureBuildFlags::ALLOW_UPDATE) {
        result |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    result
}

pub fn convert_as_mode(mode: AccelerationStructureBuildMode) -> vk::BuildAccelerationStructureModeKHR {
    match mode {
        AccelerationStructureBuildMode::Build => vk::BuildAccelerationStructureModeKHR::BUILD,
        AccelerationStructureBuildMode::Update => vk::BuildAccelerationStructureModeKHR::UPDATE,
    }
}

/// Build geometry description. Addresses of zero are fine for size queries.
pub fn convert_as_geometry(
    geometry: &AccelerationStructureGeometry,
) -> vk::AccelerationStructureGeometryKHR<'static> {
    match *geometry {
        AccelerationStructureGeometry::Triangles {
            vertex_address,
            vertex_stride,
            max_vertex,
            index_address,
            opaque,
            ..
        } => {
            let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                .vertex_format(vk::Format::R32G32B32_SFLOAT)
                .vertex_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: vertex_address,
                })
                .vertex_stride(vertex_stride)
                .max_vertex(max_vertex)
                .index_type(vk::IndexType::UINT32)
                .index_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: index_address,
                });
            let flags = if opaque {
                vk::GeometryFlagsKHR::OPAQUE
            } else {
                vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION
            };
            vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
                .flags(flags)
        }
        AccelerationStructureGeometry::Instances { address, .. } => {
            let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: address,
                });
            vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
                .flags(vk::GeometryFlagsKHR::OPAQUE)
        }
    }
}

pub fn convert_command_buffer_usage(usage: CommandBufferUsage) -> vk::CommandBufferUsageFlags {
    let mut result = vk::CommandBufferUsageFlags::empty();
    if usage.contains(CommandBufferUsage::ONE_TIME_SUBMIT) {
        result |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
    }
    if usage.contains(CommandBufferUsage::RENDER_PASS_CONTINUE) {
        result |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
    }
    if usage.contains(CommandBufferUsage::SIMULTANEOUS_USE) {
        result |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
    }
    result
}
