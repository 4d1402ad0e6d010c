//! The fixed deferred pipeline: G-buffer geometry, then fullscreen lighting.

pub mod gbuffer;
pub mod lighting;

use ash::vk;
use eren_render_vulkan_core::backend::{GpuBackend, GpuImage};

use crate::{
    mesh::MeshCache, pipeline::PipelineCache, scene::RenderObject, texture::TextureCache,
};

pub use gbuffer::{GBuffer, GBufferStage, GeometryPushConstants};
pub use lighting::{LightingPushConstants, LightingStage};

/// Everything a stage reads while recording one frame.
#[derive(Clone, Copy)]
pub struct StageInputs<'a> {
    pub command_buffer: vk::CommandBuffer,
    pub extent: vk::Extent2D,
    /// Device address of this frame slot's `SceneData`.
    pub scene_address: vk::DeviceAddress,
    pub objects: &'a [RenderObject],
    pub meshes: &'a MeshCache,
    pub textures: &'a TextureCache,
    pub pipelines: &'a PipelineCache,
    pub gbuffer: &'a GBuffer,
    pub depth: GpuImage,
    pub target: vk::ImageView,
    pub clear_color: [f32; 4],
}

/// One draw pass. Owns a pipeline in the [`PipelineCache`] and gives it
/// back on cleanup.
pub trait RenderStage<B: GpuBackend> {
    fn name(&self) -> &'static str;

    fn draw(&self, backend: &B, inputs: &StageInputs<'_>);

    fn cleanup(&mut self, backend: &B, pipelines: &mut PipelineCache);
}
