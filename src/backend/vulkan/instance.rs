//! Vulkan instance creation and configuration.

use std::ffi::{CStr, CString};

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::backend::traits::{BackendError, BackendResult};

use super::debug;

/// Ray queries and buffer device addresses need Vulkan 1.2 at least.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance plus the optional validation messenger.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a Vulkan instance able to present to `display`.
///
/// Validation is only enabled when requested and the layer is installed;
/// a missing layer is a warning, not an error.
pub fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: RawDisplayHandle,
    validation_enabled: bool,
) -> BackendResult<InstanceBundle> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);
    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new(app_name).map_err(|_| {
        BackendError::InitializationFailed("application name contains a NUL byte".to_string())
    })?;
    let engine_name = c"render-core";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let surface_extensions = ash_window::enumerate_required_extensions(display).map_err(|e| {
        BackendError::InitializationFailed(format!(
            "No surface extensions for this display: {:?}",
            e
        ))
    })?;
    let mut extensions = surface_extensions.to_vec();
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let (debug_utils, debug_messenger) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils) {
            Ok(messenger) => (Some(debug_utils), Some(messenger)),
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        }
    } else {
        (None, None)
    };

    log::info!(
        "Created Vulkan instance (validation: {})",
        validation_available
    );

    Ok(InstanceBundle {
        instance,
        debug_utils,
        debug_messenger,
    })
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available_layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}
