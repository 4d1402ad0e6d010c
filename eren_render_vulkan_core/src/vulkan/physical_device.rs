use std::ffi::CStr;

use ash::{khr, vk};
use thiserror::Error;

use crate::vulkan::{
    instance::VulkanInstanceManager,
    queue::{QueueFamilyIndices, find_queue_family_indices},
    surface::SurfaceManager,
    swapchain::get_swapchain_support_details,
};

#[derive(Debug, Error)]
pub enum PhysicalDeviceManagerError {
    #[error("Failed to enumerate physical devices: {0}")]
    EnumeratePhysicalDevicesFailed(String),

    #[error("Failed to find a GPU with Vulkan 1.3, dynamic rendering and buffer device address")]
    FindSuitableGpuFailed,
}

pub struct PhysicalDeviceManager {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family_indices: QueueFamilyIndices,
    pub device_name: String,
}

impl PhysicalDeviceManager {
    pub fn new(
        instance_manager: &VulkanInstanceManager,
        surface_manager: &SurfaceManager,
    ) -> Result<Self, PhysicalDeviceManagerError> {
        let instance = &instance_manager.instance;
        let physical_devices = unsafe {
            instance.enumerate_physical_devices().map_err(|e| {
                PhysicalDeviceManagerError::EnumeratePhysicalDevicesFailed(e.to_string())
            })?
        };

        let (physical_device, queue_family_indices) = physical_devices
            .into_iter()
            .find_map(|physical_device| {
                let queue_family_indices = find_queue_family_indices(
                    instance,
                    &surface_manager.surface_loader,
                    surface_manager.surface,
                    physical_device,
                )?;

                if !check_device_extension_support(instance, physical_device) {
                    return None;
                }

                let swapchain_adequate = get_swapchain_support_details(
                    &surface_manager.surface_loader,
                    surface_manager.surface,
                    physical_device,
                )
                .map(|support| !support.formats.is_empty() && !support.present_modes.is_empty())
                .unwrap_or(false);

                (swapchain_adequate && check_device_feature_support(instance, physical_device))
                    .then_some((physical_device, queue_family_indices))
            })
            .ok_or(PhysicalDeviceManagerError::FindSuitableGpuFailed)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        log::info!("Selected GPU: {device_name}");

        Ok(Self {
            physical_device,
            queue_family_indices,
            device_name,
        })
    }
}

pub fn get_required_device_extensions() -> Vec<&'static CStr> {
    let mut extensions = vec![khr::swapchain::NAME];
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        extensions.push(ash::khr::portability_subset::NAME);
    }
    extensions
}

fn check_device_extension_support(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let available_extensions = unsafe {
        instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_default()
    };

    get_required_device_extensions().iter().all(|required| {
        available_extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *required))
    })
}

fn check_device_feature_support(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features12)
        .push_next(&mut features13);

    unsafe { instance.get_physical_device_features2(device, &mut features) };

    features12.buffer_device_address == vk::TRUE
        && features12.descriptor_indexing == vk::TRUE
        && features12.descriptor_binding_partially_bound == vk::TRUE
        && features12.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
        && features12.runtime_descriptor_array == vk::TRUE
        && features13.dynamic_rendering == vk::TRUE
        && features13.synchronization2 == vk::TRUE
}
