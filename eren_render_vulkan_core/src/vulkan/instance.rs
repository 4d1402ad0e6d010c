use std::ffi::{CStr, CString};

use ash::vk;
use thiserror::Error;
use winit::raw_window_handle::RawDisplayHandle;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Debug, Error)]
pub enum VulkanInstanceManagerError {
    #[error("Failed to enumerate required extensions: {0}")]
    ExtensionEnumerationFailed(String),

    #[error("Invalid application name: {0}")]
    InvalidApplicationName(String),

    #[error("Failed to create instance: {0}")]
    CreateInstanceFailed(String),

    #[error("Failed to create debug utils messenger: {0}")]
    CreateDebugUtilsMessengerFailed(String),
}

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub struct VulkanInstanceManager {
    pub instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
}

impl VulkanInstanceManager {
    pub fn new(
        entry: &ash::Entry,
        display_handle: RawDisplayHandle,
        application_name: &str,
        enable_validation: bool,
    ) -> Result<Self, VulkanInstanceManagerError> {
        let app_name = CString::new(application_name)
            .map_err(|e| VulkanInstanceManagerError::InvalidApplicationName(e.to_string()))?;

        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3)
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"ErenEngine")
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let layer_name_pointers: Vec<*const i8> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let mut extension_name_pointers: Vec<*const i8> =
            ash_window::enumerate_required_extensions(display_handle)
                .map_err(|e| VulkanInstanceManagerError::ExtensionEnumerationFailed(e.to_string()))?
                .to_vec();

        if enable_validation {
            extension_name_pointers.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let mut instance_create_flags = vk::InstanceCreateFlags::empty();

        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            use ash::khr::{get_physical_device_properties2, portability_enumeration};

            extension_name_pointers.push(portability_enumeration::NAME.as_ptr());
            extension_name_pointers.push(get_physical_device_properties2::NAME.as_ptr());
            instance_create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let mut debug_create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .pfn_user_callback(Some(vulkan_debug_utils_callback));

        let mut instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_name_pointers)
            .enabled_extension_names(&extension_name_pointers)
            .flags(instance_create_flags);

        if enable_validation {
            instance_create_info = instance_create_info.push_next(&mut debug_create_info);
        }

        let instance = unsafe {
            entry
                .create_instance(&instance_create_info, None)
                .map_err(|e| VulkanInstanceManagerError::CreateInstanceFailed(e.to_string()))?
        };

        let debug_messenger = if enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(entry, &instance);
            let messenger = unsafe {
                loader
                    .create_debug_utils_messenger(&debug_create_info, None)
                    .map_err(|e| {
                        VulkanInstanceManagerError::CreateDebugUtilsMessengerFailed(e.to_string())
                    })?
            };
            log::info!("Validation layer enabled");
            Some(DebugMessenger { loader, messenger })
        } else {
            None
        };

        Ok(Self {
            instance,
            debug_messenger,
        })
    }
}

impl Drop for VulkanInstanceManager {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug_messenger.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn vulkan_debug_utils_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }.to_string_lossy();
    let ty = format!("{:?}", message_type).to_lowercase();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[vulkan][{ty}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[vulkan][{ty}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("[vulkan][{ty}] {message}"),
        _ => log::trace!("[vulkan][{ty}] {message}"),
    }
    vk::FALSE
}
