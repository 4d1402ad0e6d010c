use ash::{khr::swapchain, vk};
use thiserror::Error;

use crate::vulkan::queue::QueueFamilyIndices;

pub const SWAPCHAIN_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const SWAPCHAIN_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;
pub const MIN_SWAPCHAIN_IMAGES: u32 = 3;

#[derive(Debug, Error)]
pub enum SwapchainSupportError {
    #[error("Failed to enumerate swapchain support: {0}")]
    EnumerateSwapchainSupportFailed(String),

    #[error("Failed to enumerate swapchain formats: {0}")]
    EnumerateSwapchainFormatsFailed(String),

    #[error("Failed to enumerate swapchain present modes: {0}")]
    EnumerateSwapchainPresentModesFailed(String),
}

pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub fn get_swapchain_support_details(
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Result<SwapchainSupportDetails, SwapchainSupportError> {
    Ok(unsafe {
        SwapchainSupportDetails {
            capabilities: surface_loader
                .get_physical_device_surface_capabilities(device, surface)
                .map_err(|e| {
                    SwapchainSupportError::EnumerateSwapchainSupportFailed(e.to_string())
                })?,
            formats: surface_loader
                .get_physical_device_surface_formats(device, surface)
                .map_err(|e| {
                    SwapchainSupportError::EnumerateSwapchainFormatsFailed(e.to_string())
                })?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(device, surface)
                .map_err(|e| {
                    SwapchainSupportError::EnumerateSwapchainPresentModesFailed(e.to_string())
                })?,
        }
    })
}

#[derive(Debug, Error)]
pub enum SwapchainManagerError {
    #[error(transparent)]
    Support(#[from] SwapchainSupportError),

    #[error("Surface does not support B8G8R8A8_SRGB with SRGB_NONLINEAR")]
    UnsupportedSurfaceFormat,

    #[error("Failed to create swapchain: {0}")]
    CreateSwapchainFailed(String),

    #[error("Failed to get swapchain images: {0}")]
    GetSwapchainImagesFailed(String),

    #[error("Failed to create swapchain image view: {0}")]
    CreateImageViewFailed(String),
}

pub struct SwapchainManager {
    pub swapchain_loader: swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub image_extent: vk::Extent2D,
    device: ash::Device,
}

impl SwapchainManager {
    pub fn new(
        instance: &ash::Instance,
        logical_device: &ash::Device,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
        queue_family_indices: &QueueFamilyIndices,
        window_extent: vk::Extent2D,
    ) -> Result<Self, SwapchainManagerError> {
        let support_details =
            get_swapchain_support_details(surface_loader, surface, physical_device)?;

        let surface_format = select_surface_format(&support_details.formats)
            .ok_or(SwapchainManagerError::UnsupportedSurfaceFormat)?;
        let min_image_count = determine_image_count(&support_details.capabilities);
        let image_extent = determine_swapchain_extent(window_extent, &support_details.capabilities);
        let present_mode = select_preferred_present_mode(&support_details.present_modes);

        let mut swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support_details.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let indices = [
            queue_family_indices.graphics_queue_family_index,
            queue_family_indices.present_queue_family_index,
        ];
        if queue_family_indices.is_shared() {
            swapchain_create_info =
                swapchain_create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        } else {
            swapchain_create_info = swapchain_create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&indices);
        }

        let swapchain_loader = swapchain::Device::new(instance, logical_device);

        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(|e| SwapchainManagerError::CreateSwapchainFailed(e.to_string()))
        }?;

        let images = unsafe {
            swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(|e| SwapchainManagerError::GetSwapchainImagesFailed(e.to_string()))?
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let view = unsafe { logical_device.create_image_view(&view_info, None) }
                .map_err(|e| SwapchainManagerError::CreateImageViewFailed(e.to_string()))?;
            image_views.push(view);
        }

        log::info!(
            "Swapchain created: {} images, {}x{}, {:?}",
            images.len(),
            image_extent.width,
            image_extent.height,
            present_mode
        );

        Ok(Self {
            swapchain_loader,
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            image_extent,
            device: logical_device.clone(),
        })
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

/// The format is fixed; a surface that cannot provide it is rejected rather
/// than negotiated.
fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == SWAPCHAIN_FORMAT && f.color_space == SWAPCHAIN_COLOR_SPACE)
        .copied()
}

fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = MIN_SWAPCHAIN_IMAGES.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

fn determine_swapchain_extent(
    window_extent: vk::Extent2D,
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let width = window_extent.width.clamp(
        capabilities.min_image_extent.width,
        capabilities.max_image_extent.width,
    );
    let height = window_extent.height.clamp(
        capabilities.min_image_extent.height,
        capabilities.max_image_extent.height,
    );
    vk::Extent2D { width, height }
}

fn select_preferred_present_mode(
    available_present_modes: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if available_present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // FIFO is guaranteed to be available on all platforms
        vk::PresentModeKHR::FIFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        }
    }

    #[test]
    fn requests_at_least_three_images() {
        assert_eq!(determine_image_count(&capabilities(2, 8)), 3);
        assert_eq!(determine_image_count(&capabilities(4, 8)), 4);
        assert_eq!(determine_image_count(&capabilities(1, 0)), 3);
        assert_eq!(determine_image_count(&capabilities(1, 2)), 2);
    }

    #[test]
    fn rejects_surfaces_without_the_fixed_format() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert!(select_surface_format(&formats).is_none());

        let formats = [
            formats[0],
            vk::SurfaceFormatKHR {
                format: SWAPCHAIN_FORMAT,
                color_space: SWAPCHAIN_COLOR_SPACE,
            },
        ];
        assert_eq!(select_surface_format(&formats).map(|f| f.format), Some(SWAPCHAIN_FORMAT));
    }

    #[test]
    fn clamps_window_extent_when_surface_leaves_it_open() {
        let extent = determine_swapchain_extent(
            vk::Extent2D {
                width: 4096,
                height: 0,
            },
            &capabilities(2, 3),
        );
        assert_eq!(
            extent,
            vk::Extent2D {
                width: 1024,
                height: 1
            }
        );
    }
}
