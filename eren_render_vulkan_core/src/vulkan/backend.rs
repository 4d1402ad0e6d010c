use std::{
    collections::HashMap,
    mem::ManuallyDrop,
    sync::{Mutex, MutexGuard, PoisonError},
};

use ash::vk::{self, Handle};
use gpu_allocator::vulkan::{Allocation, Allocator};
use thiserror::Error;
use winit::{
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::Window,
};

use crate::{
    backend::{
        AcquiredImage, BarrierMasks, DescriptorBinding, GpuBackend, GpuBuffer, GpuError,
        GpuImage, GraphicsPipeline, GraphicsPipelineDesc, ImageDesc, ImageDescriptorWrite,
        MemoryLocation, RenderingDesc, SubmitDesc, SwapchainImage,
    },
    config::ContextConfig,
    vulkan::{
        device::{DeviceManager, DeviceManagerError},
        instance::{VulkanInstanceManager, VulkanInstanceManagerError},
        memory::{
            MemoryError, create_allocator, create_buffer_with_allocation,
            create_image_with_allocation,
        },
        physical_device::{PhysicalDeviceManager, PhysicalDeviceManagerError},
        surface::{SurfaceManager, SurfaceManagerError},
        swapchain::{SwapchainManager, SwapchainManagerError},
    },
};

#[derive(Debug, Error)]
pub enum VulkanBackendError {
    #[error("Failed to load Vulkan entry: {0}")]
    LoadEntryFailed(String),

    #[error("Window handle unavailable: {0}")]
    WindowHandleUnavailable(String),

    #[error(transparent)]
    Instance(#[from] VulkanInstanceManagerError),

    #[error(transparent)]
    Surface(#[from] SurfaceManagerError),

    #[error(transparent)]
    PhysicalDevice(#[from] PhysicalDeviceManagerError),

    #[error(transparent)]
    Device(#[from] DeviceManagerError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Swapchain(#[from] SwapchainManagerError),
}

/// [`GpuBackend`] over ash and gpu-allocator.
///
/// Field order is drop order: allocations and the allocator go first, the
/// instance and the loader last.
pub struct VulkanBackend {
    allocations: Mutex<HashMap<u64, Allocation>>,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    swapchain_images: Vec<SwapchainImage>,
    swapchain_manager: SwapchainManager,
    command_pool_family: u32,
    device_manager: DeviceManager,
    physical_device_manager: PhysicalDeviceManager,
    surface_manager: SurfaceManager,
    instance_manager: VulkanInstanceManager,
    _entry: ash::Entry,
}

impl VulkanBackend {
    pub fn new(window: &Window, config: &ContextConfig) -> Result<Self, VulkanBackendError> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| VulkanBackendError::LoadEntryFailed(e.to_string()))?;

        let display_handle = window
            .display_handle()
            .map_err(|e| VulkanBackendError::WindowHandleUnavailable(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| VulkanBackendError::WindowHandleUnavailable(e.to_string()))?
            .as_raw();

        let instance_manager = VulkanInstanceManager::new(
            &entry,
            display_handle,
            &config.application_name,
            config.enable_validation,
        )?;
        log::info!("Vulkan instance created");

        let surface_manager =
            SurfaceManager::new(&entry, &instance_manager, display_handle, window_handle)?;

        let physical_device_manager =
            PhysicalDeviceManager::new(&instance_manager, &surface_manager)?;
        let queue_family_indices = physical_device_manager.queue_family_indices;

        let device_manager = DeviceManager::new(
            &instance_manager.instance,
            physical_device_manager.physical_device,
            &queue_family_indices,
        )?;
        log::info!(
            "Logical device created (graphics family {}, present family {})",
            queue_family_indices.graphics_queue_family_index,
            queue_family_indices.present_queue_family_index
        );

        let allocator = create_allocator(
            &instance_manager.instance,
            physical_device_manager.physical_device,
            &device_manager.device,
        )?;

        let window_size = window.inner_size();
        let swapchain_manager = SwapchainManager::new(
            &instance_manager.instance,
            &device_manager.device,
            &surface_manager.surface_loader,
            surface_manager.surface,
            physical_device_manager.physical_device,
            &queue_family_indices,
            vk::Extent2D {
                width: window_size.width,
                height: window_size.height,
            },
        )?;

        let swapchain_images = swapchain_manager
            .images
            .iter()
            .zip(&swapchain_manager.image_views)
            .map(|(&image, &view)| SwapchainImage { image, view })
            .collect();

        Ok(Self {
            allocations: Mutex::new(HashMap::new()),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            swapchain_images,
            swapchain_manager,
            command_pool_family: queue_family_indices.graphics_queue_family_index,
            device_manager,
            physical_device_manager,
            surface_manager,
            instance_manager,
            _entry: entry,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device_manager.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance_manager.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device_manager.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.device_manager.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.device_manager.present_queue
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface_manager.surface
    }

    fn lock_allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_allocations(&self) -> MutexGuard<'_, HashMap<u64, Allocation>> {
        self.allocations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_allocation(&self, raw_handle: u64) {
        let Some(allocation) = self.lock_allocations().remove(&raw_handle) else {
            log::warn!("No allocation recorded for handle {raw_handle:#x}");
            return;
        };
        if let Err(e) = self.lock_allocator().free(allocation) {
            log::error!("Failed to free allocation for handle {raw_handle:#x}: {e}");
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device_manager.device.device_wait_idle() {
                log::error!("Device wait idle failed during teardown: {e}");
            }
        }

        let leaked: Vec<(u64, Allocation)> = self.lock_allocations().drain().collect();
        if !leaked.is_empty() {
            log::warn!("{} GPU allocations still alive at shutdown", leaked.len());
        }
        {
            let mut allocator = self.lock_allocator();
            for (_, allocation) in leaked {
                let _ = allocator.free(allocation);
            }
        }

        unsafe { ManuallyDrop::drop(&mut self.allocator) };
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Keeps the driver result (or allocator error) behind a failed creation.
fn memory_error(name: &str, error: MemoryError) -> GpuError {
    let name = name.to_string();
    match error {
        MemoryError::CreateAllocatorFailed(source) | MemoryError::AllocateMemoryFailed(source) => {
            GpuError::AllocationFailed { name, source }
        }
        MemoryError::CreateBufferFailed(source) | MemoryError::BindMemoryToBufferFailed(source) => {
            GpuError::CreateBufferFailed { name, source }
        }
        MemoryError::CreateImageFailed(source) | MemoryError::BindMemoryToImageFailed(source) => {
            GpuError::CreateImageFailed { name, source }
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn create_buffer(
        &self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<GpuBuffer, GpuError> {
        let device = self.device();
        let (buffer, allocation) = create_buffer_with_allocation(
            device,
            &mut self.lock_allocator(),
            name,
            size,
            usage,
            location,
        )
        .map_err(|e| {
            log::error!("Buffer `{name}` ({size} bytes) allocation failed: {e}");
            memory_error(name, e)
        })?;

        let device_address = usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .then(|| unsafe {
                device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
            });

        self.lock_allocations().insert(buffer.as_raw(), allocation);

        Ok(GpuBuffer {
            handle: buffer,
            size,
            usage,
            location,
            device_address,
        })
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let mut allocations = self.lock_allocations();
        let mapped = allocations
            .get_mut(&buffer.handle.as_raw())
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or(GpuError::BufferNotMapped(buffer.handle))?;

        let start = offset as usize;
        let end = start + data.len();
        if end as vk::DeviceSize > buffer.size || end > mapped.len() {
            return Err(GpuError::WriteOutOfBounds {
                offset,
                len: data.len(),
                size: buffer.size,
            });
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) {
        unsafe { self.device().destroy_buffer(buffer.handle, None) };
        self.release_allocation(buffer.handle.as_raw());
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> Result<GpuImage, GpuError> {
        let device = self.device();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let create_failed = |source: vk::Result| {
            log::error!("Image `{}` creation failed: {source}", desc.name);
            GpuError::CreateImageFailed {
                name: desc.name.to_string(),
                source,
            }
        };

        let (image, allocation) =
            create_image_with_allocation(device, &mut self.lock_allocator(), desc.name, &image_info)
                .map_err(|e| {
                    log::error!("Image `{}` allocation failed: {e}", desc.name);
                    memory_error(desc.name, e)
                })?;
        self.lock_allocations().insert(image.as_raw(), allocation);

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(subresource_range(desc.aspect));

        let view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                self.release_allocation(image.as_raw());
                return Err(create_failed(e));
            }
        };

        Ok(GpuImage {
            handle: image,
            view,
            format: desc.format,
            extent: desc.extent,
            aspect: desc.aspect,
        })
    }

    fn destroy_image(&self, image: GpuImage) {
        unsafe {
            self.device().destroy_image_view(image.view, None);
            self.device().destroy_image(image.handle, None);
        }
        self.release_allocation(image.handle.as_raw());
    }

    fn create_sampler(&self, filter: vk::Filter) -> Result<vk::Sampler, GpuError> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        unsafe { self.device().create_sampler(&sampler_info, None) }
            .map_err(GpuError::CreateSamplerFailed)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device().destroy_sampler(sampler, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<vk::DescriptorSetLayout, GpuError> {
        let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.ty)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect();

        let binding_flags: Vec<vk::DescriptorBindingFlags> = bindings
            .iter()
            .map(|binding| {
                if binding.bindless {
                    vk::DescriptorBindingFlags::PARTIALLY_BOUND
                        | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                } else {
                    vk::DescriptorBindingFlags::empty()
                }
            })
            .collect();

        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let layout_flags = if bindings.iter().any(|binding| binding.bindless) {
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(layout_flags)
            .bindings(&layout_bindings)
            .push_next(&mut flags_info);

        unsafe { self.device().create_descriptor_set_layout(&layout_info, None) }
            .map_err(GpuError::DescriptorCreationFailed)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device().destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        update_after_bind: bool,
    ) -> Result<vk::DescriptorPool, GpuError> {
        let flags = if update_after_bind {
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(max_sets)
            .pool_sizes(sizes);

        unsafe { self.device().create_descriptor_pool(&pool_info, None) }
            .map_err(GpuError::DescriptorCreationFailed)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device().destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, GpuError> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(std::slice::from_ref(&layout));

        let sets = unsafe { self.device().allocate_descriptor_sets(&alloc_info) }
            .map_err(GpuError::DescriptorCreationFailed)?;
        sets.first()
            .copied()
            .ok_or(GpuError::DescriptorCreationFailed(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    fn write_image_descriptor(&self, write: &ImageDescriptorWrite) {
        let image_info = vk::DescriptorImageInfo::default()
            .image_layout(write.layout)
            .image_view(write.view)
            .sampler(write.sampler);

        let descriptor_write = vk::WriteDescriptorSet::default()
            .dst_set(write.set)
            .dst_binding(write.binding)
            .dst_array_element(write.array_element)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&image_info));

        unsafe { self.device().update_descriptor_sets(&[descriptor_write], &[]) };
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<GraphicsPipeline, GpuError> {
        let device = self.device();
        let pipeline_failed = |source: vk::Result| {
            log::error!("Pipeline `{}` creation failed: {source}", desc.name);
            GpuError::PipelineCreationFailed {
                name: desc.name.to_string(),
                source,
            }
        };

        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(desc.set_layouts)
            .push_constant_ranges(desc.push_constant_ranges);

        let pipeline_layout = unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }
            .map_err(pipeline_failed)?;

        let create_module = |code: &[u32]| {
            let create_info = vk::ShaderModuleCreateInfo::default().code(code);
            unsafe { device.create_shader_module(&create_info, None) }
                .map_err(|source| GpuError::ShaderModuleCreationFailed {
                    name: desc.name.to_string(),
                    source,
                })
        };

        let vertex_shader_module = match create_module(desc.vertex_spirv) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(e);
            }
        };
        let fragment_shader_module = match create_module(desc.fragment_spirv) {
            Ok(module) => module,
            Err(e) => {
                unsafe {
                    device.destroy_shader_module(vertex_shader_module, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                }
                return Err(e);
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader_module)
                .name(c"main"),
        ];

        let binding_descriptions: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_input
            .iter()
            .map(|layout| vk::VertexInputBindingDescription {
                binding: 0,
                stride: layout.stride,
                input_rate: vk::VertexInputRate::VERTEX,
            })
            .collect();
        let attribute_descriptions = desc
            .vertex_input
            .map(|layout| layout.attributes)
            .unwrap_or(&[]);

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(attribute_descriptions);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_info = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let rasterizer_info = vk::PipelineRasterizationStateCreateInfo::default()
            .line_width(1.0)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .cull_mode(desc.cull_mode)
            .polygon_mode(vk::PolygonMode::FILL);

        let multisampler_info = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();

        let color_blend_info =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_format.is_some())
            .depth_write_enable(desc.depth_format.is_some())
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .max_depth_bounds(1.0);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(desc.color_formats)
            .depth_attachment_format(desc.depth_format.unwrap_or(vk::Format::UNDEFINED));

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterizer_info)
            .multisample_state(&multisampler_info)
            .depth_stencil_state(&depth_stencil_info)
            .color_blend_state(&color_blend_info)
            .dynamic_state(&dynamic_state_info)
            .layout(pipeline_layout)
            .push_next(&mut rendering_info);

        let result = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        unsafe {
            device.destroy_shader_module(vertex_shader_module, None);
            device.destroy_shader_module(fragment_shader_module, None);
        }

        let pipeline = match result {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(pipeline_failed(e));
            }
        };

        Ok(GraphicsPipeline {
            pipeline,
            layout: pipeline_layout,
        })
    }

    fn destroy_graphics_pipeline(&self, pipeline: GraphicsPipeline) {
        unsafe {
            self.device().destroy_pipeline(pipeline.pipeline, None);
            self.device()
                .destroy_pipeline_layout(pipeline.layout, None);
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, GpuError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe {
            self.device()
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(GpuError::SyncCreationFailed)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device().destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        unsafe { self.device().wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(GpuError::FenceWaitFailed)
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        unsafe { self.device().reset_fences(&[fence]) }
            .map_err(GpuError::FenceWaitFailed)
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError> {
        unsafe {
            self.device()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(GpuError::SyncCreationFailed)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device().destroy_semaphore(semaphore, None) };
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool, GpuError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.command_pool_family);

        unsafe { self.device().create_command_pool(&pool_info, None) }
            .map_err(GpuError::CommandBufferFailed)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device().destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(
        &self,
        pool: vk::CommandPool,
    ) -> Result<vk::CommandBuffer, GpuError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device().allocate_command_buffers(&alloc_info) }
            .map_err(GpuError::CommandBufferFailed)?;
        buffers
            .first()
            .copied()
            .ok_or(GpuError::CommandBufferFailed(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        unsafe {
            self.device()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(GpuError::CommandBufferFailed)
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        one_time_submit: bool,
    ) -> Result<(), GpuError> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        unsafe {
            self.device()
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default().flags(flags))
        }
        .map_err(GpuError::CommandBufferFailed)
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        unsafe { self.device().end_command_buffer(cmd) }
            .map_err(GpuError::CommandBufferFailed)
    }

    fn submit(&self, submit: &SubmitDesc) -> Result<(), GpuError> {
        let command_buffer_info =
            vk::CommandBufferSubmitInfo::default().command_buffer(submit.command_buffer);

        let wait_infos: Vec<vk::SemaphoreSubmitInfo> = submit
            .wait
            .iter()
            .map(|&(semaphore, stage)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(stage)
            })
            .collect();
        let signal_infos: Vec<vk::SemaphoreSubmitInfo> = submit
            .signal
            .iter()
            .map(|&semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS)
            })
            .collect();

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(std::slice::from_ref(&command_buffer_info))
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);

        unsafe {
            self.device()
                .queue_submit2(self.graphics_queue(), &[submit_info], submit.fence)
        }
        .map_err(GpuError::SubmitFailed)
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<AcquiredImage, GpuError> {
        let (index, suboptimal) = unsafe {
            self.swapchain_manager.swapchain_loader.acquire_next_image(
                self.swapchain_manager.swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        }
        .map_err(GpuError::AcquireImageFailed)?;

        Ok(AcquiredImage { index, suboptimal })
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<bool, GpuError> {
        let swapchains = [self.swapchain_manager.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_manager
                .swapchain_loader
                .queue_present(self.present_queue(), &present_info)
        }
        .map_err(GpuError::PresentFailed)
    }

    fn swapchain_images(&self) -> &[SwapchainImage] {
        &self.swapchain_images
    }

    fn swapchain_format(&self) -> vk::Format {
        self.swapchain_manager.format
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain_manager.image_extent
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        unsafe { self.device().device_wait_idle() }
            .map_err(GpuError::WaitIdleFailed)
    }

    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let masks = BarrierMasks::for_transition(old_layout, new_layout);

        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(masks.src_stage)
            .src_access_mask(masks.src_access)
            .dst_stage_mask(masks.dst_stage)
            .dst_access_mask(masks.dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range(aspect));

        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));

        unsafe { self.device().cmd_pipeline_barrier2(cmd, &dependency_info) };
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: vk::DeviceSize,
    ) {
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.device()
                .cmd_copy_buffer(cmd, src.handle, dst.handle, &[region])
        };
    }

    fn cmd_copy_buffer_to_image(&self, cmd: vk::CommandBuffer, src: &GpuBuffer, dst: &GpuImage) {
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(dst.aspect)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: dst.extent.width,
                height: dst.extent.height,
                depth: 1,
            });

        unsafe {
            self.device().cmd_copy_buffer_to_image(
                cmd,
                src.handle,
                dst.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, rendering: &RenderingDesc<'_>) {
        let color_attachments: Vec<vk::RenderingAttachmentInfo> = rendering
            .color_attachments
            .iter()
            .map(|attachment| {
                let info = vk::RenderingAttachmentInfo::default()
                    .image_view(attachment.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .store_op(vk::AttachmentStoreOp::STORE);
                match attachment.clear {
                    Some(color) => info.load_op(vk::AttachmentLoadOp::CLEAR).clear_value(
                        vk::ClearValue {
                            color: vk::ClearColorValue { float32: color },
                        },
                    ),
                    None => info.load_op(vk::AttachmentLoadOp::LOAD),
                }
            })
            .collect();

        let depth_attachment = rendering.depth_attachment.map(|depth| {
            let info = vk::RenderingAttachmentInfo::default()
                .image_view(depth.view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .store_op(vk::AttachmentStoreOp::STORE);
            match depth.clear {
                Some(value) => info.load_op(vk::AttachmentLoadOp::CLEAR).clear_value(
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: value,
                            stencil: 0,
                        },
                    },
                ),
                None => info.load_op(vk::AttachmentLoadOp::LOAD),
            }
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: rendering.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe { self.device().cmd_begin_rendering(cmd, &rendering_info) };
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device().cmd_end_rendering(cmd) };
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: &GraphicsPipeline) {
        unsafe {
            self.device()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline)
        };
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                &[],
            )
        };
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device()
                .cmd_push_constants(cmd, layout, stages, offset, data)
        };
    }

    fn cmd_set_viewport_and_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.,
            y: 0.,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.,
            max_depth: 1.,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device().cmd_set_viewport(cmd, 0, &[viewport]);
            self.device().cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: &GpuBuffer) {
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(cmd, 0, &[buffer.handle], &[0])
        };
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: &GpuBuffer) {
        unsafe {
            self.device()
                .cmd_bind_index_buffer(cmd, buffer.handle, 0, vk::IndexType::UINT32)
        };
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device()
                .cmd_draw(cmd, vertex_count, instance_count, 0, 0)
        };
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, instance_count: u32) {
        unsafe {
            self.device()
                .cmd_draw_indexed(cmd, index_count, instance_count, 0, 0, 0)
        };
    }
}
