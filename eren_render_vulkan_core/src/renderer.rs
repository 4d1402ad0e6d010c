use ash::vk;

use crate::backend::{GpuBackend, GpuError, SwapchainImage};

/// What a renderer may touch during the Update phase of one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Frame-in-flight slot, `frame_number % FRAMES_IN_FLIGHT`.
    pub frame_index: usize,
    pub frame_number: u64,
    pub extent: vk::Extent2D,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub command_buffer: vk::CommandBuffer,
    pub frame_index: usize,
    pub frame_number: u64,
    pub image_index: u32,
    pub swapchain_image: SwapchainImage,
    pub extent: vk::Extent2D,
}

/// Anything the frame scheduler drives.
pub trait Renderer<B: GpuBackend> {
    /// Writes per-slot data. The slot's previous GPU work has completed.
    fn prepare(&mut self, backend: &B, frame: &FrameInfo) -> Result<(), GpuError>;

    /// Records draw commands. The swapchain image is in
    /// `COLOR_ATTACHMENT_OPTIMAL` and must be left there.
    fn render(&self, backend: &B, frame: &FrameContext);
}
