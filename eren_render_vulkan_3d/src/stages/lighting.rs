use std::mem::size_of;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use eren_render_vulkan_core::backend::{ColorAttachment, GpuBackend, RenderingDesc};

use super::{RenderStage, StageInputs};
use crate::{
    ids::PipelineId,
    pipeline::{PipelineCache, PipelineDesc, PipelineError},
    texture::TextureCache,
};

pub const LIGHTING_SHADER: &str = "lighting";

/// Scene address plus the bindless slots of the G-buffer targets.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct LightingPushConstants {
    pub scene: vk::DeviceAddress,
    pub albedo: u32,
    pub normal: u32,
    pub metallic_roughness: u32,
    pub position: u32,
}

/// Shades the swapchain image from the G-buffer with one fullscreen quad.
#[derive(Debug)]
pub struct LightingStage {
    pipeline: PipelineId,
}

impl LightingStage {
    pub fn new<B: GpuBackend>(
        backend: &B,
        pipelines: &mut PipelineCache,
        textures: &TextureCache,
    ) -> Result<Self, PipelineError> {
        let pipeline = pipelines.build(
            backend,
            &PipelineDesc {
                name: "lighting",
                shader: LIGHTING_SHADER,
                vertex_input: None,
                push_constant_ranges: &[vk::PushConstantRange {
                    stage_flags: vk::ShaderStageFlags::FRAGMENT,
                    offset: 0,
                    size: size_of::<LightingPushConstants>() as u32,
                }],
                set_layouts: &[textures.bindless_layout()],
                color_formats: &[backend.swapchain_format()],
                depth_format: None,
                cull_mode: vk::CullModeFlags::NONE,
            },
        )?;
        Ok(Self { pipeline })
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }
}

impl<B: GpuBackend> RenderStage<B> for LightingStage {
    fn name(&self) -> &'static str {
        "lighting"
    }

    fn draw(&self, backend: &B, inputs: &StageInputs<'_>) {
        let cmd = inputs.command_buffer;

        backend.cmd_begin_rendering(
            cmd,
            &RenderingDesc {
                extent: inputs.extent,
                color_attachments: &[ColorAttachment {
                    view: inputs.target,
                    clear: Some(inputs.clear_color),
                }],
                depth_attachment: None,
            },
        );

        let pipeline = inputs.pipelines.get(self.pipeline);
        backend.cmd_bind_pipeline(cmd, pipeline);
        backend.cmd_set_viewport_and_scissor(cmd, inputs.extent);
        backend.cmd_bind_descriptor_set(cmd, pipeline.layout, 0, inputs.textures.bindless_set());

        let gbuffer = inputs.gbuffer;
        let constants = LightingPushConstants {
            scene: inputs.scene_address,
            albedo: gbuffer.albedo.0,
            normal: gbuffer.normal.0,
            metallic_roughness: gbuffer.metallic_roughness.0,
            position: gbuffer.position.0,
        };
        backend.cmd_push_constants(
            cmd,
            pipeline.layout,
            vk::ShaderStageFlags::FRAGMENT,
            0,
            bytemuck::bytes_of(&constants),
        );
        // Two triangles generated from gl_VertexIndex.
        backend.cmd_draw(cmd, 6, 1);

        backend.cmd_end_rendering(cmd);
    }

    fn cleanup(&mut self, backend: &B, pipelines: &mut PipelineCache) {
        pipelines.release(backend, self.pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_are_packed() {
        assert_eq!(size_of::<LightingPushConstants>(), 24);
    }
}
