use ash::vk;

#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyIndices {
    pub graphics_queue_family_index: u32,
    pub present_queue_family_index: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics_queue_family_index == self.present_queue_family_index
    }
}

/// Resolves graphics and presentation families. Prefers a single family that
/// can do both.
pub fn find_queue_family_indices(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Option<QueueFamilyIndices> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let mut graphics = None;
    let mut present = None;

    for (i, queue_family) in queue_families.iter().enumerate() {
        let index = i as u32;
        let supports_graphics = queue_family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let supports_present = unsafe {
            surface_loader
                .get_physical_device_surface_support(physical_device, index, surface)
                .unwrap_or(false)
        };

        if supports_graphics && supports_present {
            return Some(QueueFamilyIndices {
                graphics_queue_family_index: index,
                present_queue_family_index: index,
            });
        }

        if supports_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if supports_present && present.is_none() {
            present = Some(index);
        }
    }

    Some(QueueFamilyIndices {
        graphics_queue_family_index: graphics?,
        present_queue_family_index: present?,
    })
}
