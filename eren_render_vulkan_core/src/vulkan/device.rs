use ash::vk;
use thiserror::Error;

use crate::vulkan::{physical_device::get_required_device_extensions, queue::QueueFamilyIndices};

#[derive(Debug, Error)]
pub enum DeviceManagerError {
    #[error("Failed to create device: {0}")]
    CreateDeviceFailed(#[source] vk::Result),
}

pub struct DeviceManager {
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl DeviceManager {
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_indices: &QueueFamilyIndices,
    ) -> Result<Self, DeviceManagerError> {
        let graphics_index = queue_family_indices.graphics_queue_family_index;
        let present_index = queue_family_indices.present_queue_family_index;

        let queue_priority = [1.0f32];
        let mut queue_infos = vec![
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_index)
                .queue_priorities(&queue_priority),
        ];

        if !queue_family_indices.is_shared() {
            queue_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(present_index)
                    .queue_priorities(&queue_priority),
            );
        }

        let raw_required_device_extensions: Vec<*const i8> = get_required_device_extensions()
            .iter()
            .map(|s| s.as_ptr())
            .collect();

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .descriptor_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .runtime_descriptor_array(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&raw_required_device_extensions)
            .push_next(&mut features12)
            .push_next(&mut features13);

        let device = unsafe {
            instance
                .create_device(physical_device, &device_info, None)
                .map_err(DeviceManagerError::CreateDeviceFailed)?
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_index, 0) };
        let present_queue = unsafe { device.get_device_queue(present_index, 0) };

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
        })
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
