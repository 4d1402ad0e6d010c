//! The fixed set of verbs the engine drives on the graphics API.
//!
//! Everything above this trait (device context, caches, stages, frame
//! scheduling) is written against [`GpuBackend`] and never calls ash
//! directly. [`crate::vulkan::VulkanBackend`] is the real implementation;
//! [`recording::RecordingBackend`] replays nothing and records everything.

#[cfg(any(test, feature = "recording"))]
pub mod recording;

use ash::vk;
use thiserror::Error;

pub use gpu_allocator::{AllocationError, MemoryLocation};

/// Failures reported by backend verbs.
///
/// Driver failures keep their [`vk::Result`] so callers can match on codes
/// such as `ERROR_OUT_OF_DATE_KHR` or `ERROR_DEVICE_LOST`.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("Failed to create buffer `{name}`: {source}")]
    CreateBufferFailed {
        name: String,
        #[source]
        source: vk::Result,
    },

    #[error("Failed to create image `{name}`: {source}")]
    CreateImageFailed {
        name: String,
        #[source]
        source: vk::Result,
    },

    #[error("Failed to allocate memory for `{name}`: {source}")]
    AllocationFailed {
        name: String,
        #[source]
        source: AllocationError,
    },

    #[error("Buffer {0:?} is not host visible")]
    BufferNotMapped(vk::Buffer),

    #[error("Write of {len} bytes at offset {offset} overflows buffer of {size} bytes")]
    WriteOutOfBounds {
        offset: vk::DeviceSize,
        len: usize,
        size: vk::DeviceSize,
    },

    #[error("Failed to create sampler: {0}")]
    CreateSamplerFailed(#[source] vk::Result),

    #[error("Failed to create descriptor object: {0}")]
    DescriptorCreationFailed(#[source] vk::Result),

    #[error("Failed to create shader module for `{name}`: {source}")]
    ShaderModuleCreationFailed {
        name: String,
        #[source]
        source: vk::Result,
    },

    #[error("Failed to create pipeline `{name}`: {source}")]
    PipelineCreationFailed {
        name: String,
        #[source]
        source: vk::Result,
    },

    #[error("Failed to create synchronization primitive: {0}")]
    SyncCreationFailed(#[source] vk::Result),

    #[error("Failed to wait for fence: {0}")]
    FenceWaitFailed(#[source] vk::Result),

    #[error("Command buffer operation failed: {0}")]
    CommandBufferFailed(#[source] vk::Result),

    #[error("Queue submission failed: {0}")]
    SubmitFailed(#[source] vk::Result),

    #[error("Failed to acquire swapchain image: {0}")]
    AcquireImageFailed(#[source] vk::Result),

    #[error("Failed to present swapchain image: {0}")]
    PresentFailed(#[source] vk::Result),

    #[error("Failed to wait for device idle: {0}")]
    WaitIdleFailed(#[source] vk::Result),
}

impl GpuError {
    /// The driver result behind this error, when there is one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::CreateBufferFailed { source, .. }
            | Self::CreateImageFailed { source, .. }
            | Self::ShaderModuleCreationFailed { source, .. }
            | Self::PipelineCreationFailed { source, .. } => Some(*source),
            Self::CreateSamplerFailed(result)
            | Self::DescriptorCreationFailed(result)
            | Self::SyncCreationFailed(result)
            | Self::FenceWaitFailed(result)
            | Self::CommandBufferFailed(result)
            | Self::SubmitFailed(result)
            | Self::AcquireImageFailed(result)
            | Self::PresentFailed(result)
            | Self::WaitIdleFailed(result) => Some(*result),
            Self::AllocationFailed { .. }
            | Self::BufferNotMapped(_)
            | Self::WriteOutOfBounds { .. } => None,
        }
    }
}

/// A device buffer plus the metadata needed to use it.
///
/// Copies alias the same allocation. Exactly one owner (a cache or the
/// deletion queue) hands it back to [`GpuBackend::destroy_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    /// Set when the buffer was created with `SHADER_DEVICE_ADDRESS` usage.
    pub device_address: Option<vk::DeviceAddress>,
}

impl GpuBuffer {
    pub fn address(&self) -> vk::DeviceAddress {
        self.device_address.unwrap_or(0)
    }
}

/// Image + view + format + extent. The allocation stays with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuImage {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    /// Partially bound + update-after-bind, for bindless arrays.
    pub bindless: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub array_element: u32,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub layout: vk::ImageLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexInputLayout<'a> {
    pub stride: u32,
    pub attributes: &'a [vk::VertexInputAttributeDescription],
}

#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    pub name: &'a str,
    pub vertex_spirv: &'a [u32],
    pub fragment_spirv: &'a [u32],
    pub vertex_input: Option<VertexInputLayout<'a>>,
    pub push_constant_ranges: &'a [vk::PushConstantRange],
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub color_formats: &'a [vk::Format],
    pub depth_format: Option<vk::Format>,
    pub cull_mode: vk::CullModeFlags,
}

#[derive(Debug)]
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct ColorAttachment {
    pub view: vk::ImageView,
    /// `None` loads the previous contents.
    pub clear: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Copy)]
pub struct DepthAttachment {
    pub view: vk::ImageView,
    pub clear: Option<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderingDesc<'a> {
    pub extent: vk::Extent2D,
    pub color_attachments: &'a [ColorAttachment],
    pub depth_attachment: Option<DepthAttachment>,
}

#[derive(Debug, Clone, Copy)]
pub struct SubmitDesc {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    pub signal: Option<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// Synchronisation scopes of one image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl BarrierMasks {
    pub fn for_transition(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        let (src_stage, src_access) = layout_scope(old_layout);
        let (dst_stage, dst_access) = layout_scope(new_layout);
        Self {
            src_stage,
            src_access,
            dst_stage,
            dst_access,
        }
    }
}

/// Stage and access masks for the layouts the engine moves images through.
fn layout_scope(layout: vk::ImageLayout) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    match layout {
        // Render targets are shared by all frame slots. Discarding their
        // contents must still wait for, and make available, the previous
        // frame's attachment writes and sampled reads.
        vk::ImageLayout::UNDEFINED => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_WRITE,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::NONE,
        ),
        _ => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
    }
}

pub trait GpuBackend: 'static {
    fn create_buffer(
        &self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<GpuBuffer, GpuError>;

    /// Copies `data` into the mapped memory of a host-visible buffer.
    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> Result<(), GpuError>;

    fn destroy_buffer(&self, buffer: GpuBuffer);

    fn create_image(&self, desc: &ImageDesc<'_>) -> Result<GpuImage, GpuError>;
    fn destroy_image(&self, image: GpuImage);

    fn create_sampler(&self, filter: vk::Filter) -> Result<vk::Sampler, GpuError>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> Result<vk::DescriptorSetLayout, GpuError>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        update_after_bind: bool,
    ) -> Result<vk::DescriptorPool, GpuError>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, GpuError>;
    fn write_image_descriptor(&self, write: &ImageDescriptorWrite);

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<GraphicsPipeline, GpuError>;
    fn destroy_graphics_pipeline(&self, pipeline: GraphicsPipeline);

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, GpuError>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks without timeout.
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<(), GpuError>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError>;

    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_command_pool(&self) -> Result<vk::CommandPool, GpuError>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(
        &self,
        pool: vk::CommandPool,
    ) -> Result<vk::CommandBuffer, GpuError>;
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), GpuError>;
    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        one_time_submit: bool,
    ) -> Result<(), GpuError>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), GpuError>;

    fn submit(&self, submit: &SubmitDesc) -> Result<(), GpuError>;

    fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<AcquiredImage, GpuError>;
    /// Returns `true` when the swapchain reported itself suboptimal.
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<bool, GpuError>;
    fn swapchain_images(&self) -> &[SwapchainImage];
    fn swapchain_format(&self) -> vk::Format;
    fn swapchain_extent(&self) -> vk::Extent2D;

    fn wait_idle(&self) -> Result<(), GpuError>;

    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    );
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: vk::DeviceSize,
    );
    /// Copies tightly packed pixels into mip 0 of `dst`, which must be in
    /// `TRANSFER_DST_OPTIMAL`.
    fn cmd_copy_buffer_to_image(&self, cmd: vk::CommandBuffer, src: &GpuBuffer, dst: &GpuImage);
    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, rendering: &RenderingDesc<'_>);
    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: &GraphicsPipeline);
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_set_viewport_and_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: &GpuBuffer);
    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: &GpuBuffer);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32);
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, instance_count: u32);
}
