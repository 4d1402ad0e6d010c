use ash::vk;
use gpu_allocator::{
    AllocationError, AllocationSizes, AllocatorDebugSettings, MemoryLocation,
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Failed to create allocator: {0}")]
    CreateAllocatorFailed(#[source] AllocationError),

    #[error("Failed to create image: {0}")]
    CreateImageFailed(#[source] vk::Result),

    #[error("Failed to allocate memory: {0}")]
    AllocateMemoryFailed(#[source] AllocationError),

    #[error("Failed to bind memory to image: {0}")]
    BindMemoryToImageFailed(#[source] vk::Result),

    #[error("Failed to create buffer: {0}")]
    CreateBufferFailed(#[source] vk::Result),

    #[error("Failed to bind memory to buffer: {0}")]
    BindMemoryToBufferFailed(#[source] vk::Result),
}

pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
) -> Result<Allocator, MemoryError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device: device.clone(),
        physical_device,
        debug_settings: AllocatorDebugSettings {
            log_leaks_on_shutdown: true,
            ..Default::default()
        },
        buffer_device_address: true,
        allocation_sizes: AllocationSizes::default(),
    })
    .map_err(MemoryError::CreateAllocatorFailed)
}

pub fn create_buffer_with_allocation(
    device: &ash::Device,
    allocator: &mut Allocator,
    name: &str,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> Result<(vk::Buffer, Allocation), MemoryError> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }
        .map_err(MemoryError::CreateBufferFailed)?;

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let allocation = allocator
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| {
            unsafe { device.destroy_buffer(buffer, None) };
            MemoryError::AllocateMemoryFailed(e)
        })?;

    if let Err(e) =
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
    {
        unsafe { device.destroy_buffer(buffer, None) };
        let _ = allocator.free(allocation);
        return Err(MemoryError::BindMemoryToBufferFailed(e));
    }

    Ok((buffer, allocation))
}

pub fn create_image_with_allocation(
    device: &ash::Device,
    allocator: &mut Allocator,
    name: &str,
    image_info: &vk::ImageCreateInfo,
) -> Result<(vk::Image, Allocation), MemoryError> {
    let image = unsafe { device.create_image(image_info, None) }
        .map_err(MemoryError::CreateImageFailed)?;

    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let allocation = allocator
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| {
            unsafe { device.destroy_image(image, None) };
            MemoryError::AllocateMemoryFailed(e)
        })?;

    if let Err(e) =
        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
    {
        unsafe { device.destroy_image(image, None) };
        let _ = allocator.free(allocation);
        return Err(MemoryError::BindMemoryToImageFailed(e));
    }

    Ok((image, allocation))
}
