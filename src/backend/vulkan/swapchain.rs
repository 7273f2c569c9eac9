//! Surface negotiation and swapchain creation.

use ash::vk;

use super::conversion::{convert_format, convert_format_back, convert_result};
use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::{Extent2d, Format};

/// Formats tried in order when the surface offers several.
const PREFERRED_FORMATS: [Format; 4] = [
    Format::Bgra8Srgb,
    Format::Rgba8Srgb,
    Format::Bgra8Unorm,
    Format::Rgba8Unorm,
];

/// A live swapchain and its images.
pub struct VulkanSwapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: Format,
    pub extent: Extent2d,
}

/// Everything swapchain creation needs from the backend.
pub struct SwapchainContext<'a> {
    pub surface_loader: &'a ash::khr::surface::Instance,
    pub swapchain_loader: &'a ash::khr::swapchain::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
}

/// Create a swapchain for `requested` extent, retiring `old` if given.
///
/// The caller destroys `old` after this returns.
pub fn create_swapchain(
    ctx: &SwapchainContext<'_>,
    requested: Extent2d,
    vsync: bool,
    old: vk::SwapchainKHR,
) -> BackendResult<VulkanSwapchain> {
    let capabilities = unsafe {
        ctx.surface_loader
            .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
    }
    .map_err(|e| convert_result("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?;

    let formats = unsafe {
        ctx.surface_loader
            .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
    }
    .map_err(|e| convert_result("vkGetPhysicalDeviceSurfaceFormatsKHR", e))?;
    let (format, surface_format) = choose_format(&formats)?;

    let present_modes = unsafe {
        ctx.surface_loader
            .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
    }
    .map_err(|e| convert_result("vkGetPhysicalDeviceSurfacePresentModesKHR", e))?;
    let present_mode = choose_present_mode(&present_modes, vsync);

    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: requested.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    };
    if extent.width == 0 || extent.height == 0 {
        return Err(BackendError::SurfaceOutOfDate);
    }

    let image_count = (capabilities.min_image_count + 1).min(if capabilities.max_image_count > 0 {
        capabilities.max_image_count
    } else {
        u32::MAX
    });

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(ctx.surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old);

    let swapchain = unsafe { ctx.swapchain_loader.create_swapchain(&create_info, None) }
        .map_err(|e| convert_result("vkCreateSwapchainKHR", e))?;

    let images = match unsafe { ctx.swapchain_loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { ctx.swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(convert_result("vkGetSwapchainImagesKHR", e));
        }
    };

    log::info!(
        "Created swapchain: {}x{} {:?} with {} images ({:?})",
        extent.width,
        extent.height,
        format,
        images.len(),
        present_mode
    );

    Ok(VulkanSwapchain {
        swapchain,
        images,
        format,
        extent: Extent2d::new(extent.width, extent.height),
    })
}

fn choose_format(
    formats: &[vk::SurfaceFormatKHR],
) -> BackendResult<(Format, vk::SurfaceFormatKHR)> {
    for preferred in PREFERRED_FORMATS {
        let wanted = convert_format(preferred);
        if let Some(found) = formats.iter().find(|f| {
            f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            return Ok((preferred, *found));
        }
    }
    formats
        .iter()
        .find_map(|f| convert_format_back(f.format).map(|format| (format, *f)))
        .ok_or_else(|| BackendError::Unsupported("no known surface format".to_string()))
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync {
        for candidate in [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE] {
            if modes.contains(&candidate) {
                return candidate;
            }
        }
    }
    vk::PresentModeKHR::FIFO
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_prefers_srgb() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let (format, _) = choose_format(&formats).unwrap();
        assert_eq!(format, Format::Bgra8Srgb);
    }

    #[test]
    fn test_unknown_formats_are_unsupported() {
        let formats = [surface_format(vk::Format::A2B10G10R10_UNORM_PACK32)];
        assert!(matches!(
            choose_format(&formats),
            Err(BackendError::Unsupported(_))
        ));
    }

    #[test]
    fn test_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }
}
