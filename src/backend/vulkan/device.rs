//! Vulkan physical and logical device management, plus capability discovery.

use std::ffi::CStr;

use ash::vk;

use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::DeviceCapabilities;
use crate::config::RenderConfig;

/// Extensions needed for acceleration structures and ray queries.
const RAYTRACING_EXTENSIONS: [&CStr; 3] = [
    ash::khr::acceleration_structure::NAME,
    ash::khr::deferred_host_operations::NAME,
    ash::khr::ray_query::NAME,
];

/// Everything decided while picking a device.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub capabilities: DeviceCapabilities,
}

/// Pick the best device that can present to `surface`, preferring discrete
/// GPUs, and discover what it can do under `config`.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    config: &RenderConfig,
) -> BackendResult<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        BackendError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(BackendError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(u32, SelectedDevice)> = None;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let Some(queue_family) =
            find_graphics_queue_family(instance, surface_loader, surface, device)
        else {
            log::info!("Skipping GPU {}: no graphics queue that can present", device_name);
            continue;
        };
        let features = unsafe { instance.get_physical_device_features(device) };
        if features.sampler_anisotropy == vk::FALSE {
            log::info!("Skipping GPU {}: no anisotropic filtering", device_name);
            continue;
        }
        if !supports_extension(instance, device, ash::khr::swapchain::NAME) {
            log::info!("Skipping GPU {}: no swapchain support", device_name);
            continue;
        }

        let mut score = 0;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            let capabilities = discover_capabilities(instance, device, device_name, config);
            best = Some((
                score,
                SelectedDevice {
                    physical_device: device,
                    queue_family,
                    capabilities,
                },
            ));
        }
    }

    best.map(|(_, selected)| selected)
        .ok_or_else(|| BackendError::InitializationFailed("No suitable GPU found".to_string()))
}

fn find_graphics_queue_family(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families.iter().enumerate().find_map(|(index, family)| {
        let index = index as u32;
        let present = unsafe {
            surface_loader.get_physical_device_surface_support(physical_device, index, surface)
        }
        .unwrap_or(false);
        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && family.queue_flags.contains(vk::QueueFlags::COMPUTE);
        (graphics && present).then_some(index)
    })
}

fn supports_extension(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    name: &CStr,
) -> bool {
    let Ok(available) =
        (unsafe { instance.enumerate_device_extension_properties(physical_device) })
    else {
        return false;
    };
    available.iter().any(|ext| {
        let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        ext_name == name
    })
}

/// Query features and limits. Optional features are only reported when the
/// config asks for them and the device has them.
fn discover_capabilities(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device_name: String,
    config: &RenderConfig,
) -> DeviceCapabilities {
    let mut vulkan_12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut acceleration_structure = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut ray_query = vk::PhysicalDeviceRayQueryFeaturesKHR::default();

    let has_raytracing_extensions = RAYTRACING_EXTENSIONS
        .iter()
        .all(|name| supports_extension(instance, physical_device, name));

    {
        let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_12);
        if has_raytracing_extensions {
            features = features
                .push_next(&mut acceleration_structure)
                .push_next(&mut ray_query);
        }
        unsafe { instance.get_physical_device_features2(physical_device, &mut features) };
    }

    let mut as_properties = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
    let mut indexing_properties = vk::PhysicalDeviceDescriptorIndexingProperties::default();
    let limits = {
        let mut properties =
            vk::PhysicalDeviceProperties2::default().push_next(&mut indexing_properties);
        if has_raytracing_extensions {
            properties = properties.push_next(&mut as_properties);
        }
        unsafe { instance.get_physical_device_properties2(physical_device, &mut properties) };
        properties.properties.limits
    };

    let buffer_device_address = vulkan_12.buffer_device_address == vk::TRUE;
    let device_bindless = vulkan_12.descriptor_indexing == vk::TRUE
        && vulkan_12.descriptor_binding_partially_bound == vk::TRUE
        && vulkan_12.descriptor_binding_variable_descriptor_count == vk::TRUE
        && vulkan_12.runtime_descriptor_array == vk::TRUE
        && vulkan_12.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
        && vulkan_12.descriptor_binding_storage_buffer_update_after_bind == vk::TRUE
        && vulkan_12.shader_sampled_image_array_non_uniform_indexing == vk::TRUE;
    let device_raytracing = has_raytracing_extensions
        && buffer_device_address
        && acceleration_structure.acceleration_structure == vk::TRUE
        && ray_query.ray_query == vk::TRUE;

    let bindless = config.bindless && device_bindless;
    let raytracing = config.raytracing && device_raytracing;
    if config.bindless && !device_bindless {
        log::warn!("{}: bindless descriptors requested but unsupported", device_name);
    }
    if config.raytracing && !device_raytracing {
        log::warn!("{}: raytracing requested but unsupported", device_name);
    }

    let max_bindless_resources = if bindless {
        config.max_bindless_resources.min(
            indexing_properties
                .max_descriptor_set_update_after_bind_sampled_images
                .min(indexing_properties.max_per_stage_descriptor_update_after_bind_sampled_images),
        )
    } else {
        0
    };

    DeviceCapabilities {
        device_name,
        raytracing,
        bindless,
        buffer_device_address,
        max_bound_descriptor_sets: limits.max_bound_descriptor_sets,
        max_bindless_resources,
        min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
        min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
        min_acceleration_structure_scratch_offset_alignment: if raytracing {
            as_properties.min_acceleration_structure_scratch_offset_alignment as u64
        } else {
            DeviceCapabilities::default().min_acceleration_structure_scratch_offset_alignment
        },
    }
}

/// Create the logical device with the features the capabilities promise.
pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
) -> BackendResult<ash::Device> {
    let caps = &selected.capabilities;
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selected.queue_family)
        .queue_priorities(&queue_priorities)];

    let mut device_extensions = vec![ash::khr::swapchain::NAME.as_ptr()];
    if caps.raytracing {
        device_extensions.extend(RAYTRACING_EXTENSIONS.iter().map(|name| name.as_ptr()));
    }
    #[cfg(target_os = "macos")]
    device_extensions.push(ash::khr::portability_subset::NAME.as_ptr());

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

    let mut vulkan_12 = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(caps.buffer_device_address);
    if caps.bindless {
        vulkan_12 = vulkan_12
            .descriptor_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true);
    }
    let mut acceleration_structure =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
    let mut ray_query = vk::PhysicalDeviceRayQueryFeaturesKHR::default().ray_query(true);

    let mut create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_12);
    if caps.raytracing {
        create_info = create_info
            .push_next(&mut acceleration_structure)
            .push_next(&mut ray_query);
    }

    let device = unsafe { instance.create_device(selected.physical_device, &create_info, None) }
        .map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
        })?;

    log::info!(
        "Created device on {} (bindless: {}, raytracing: {})",
        caps.device_name,
        caps.bindless,
        caps.raytracing
    );
    Ok(device)
}
