use std::mem::size_of;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use eren_render_vulkan_core::backend::{
    ColorAttachment, DepthAttachment, GpuBackend, RenderingDesc,
};
use glam::Mat4;

use super::{RenderStage, StageInputs};
use crate::{
    ids::{PipelineId, TextureId},
    mesh::Vertex,
    pipeline::{PipelineCache, PipelineDesc, PipelineError},
    texture::{TextureCache, TextureCacheError},
};

pub const GBUFFER_SHADER: &str = "gbuffer";

/// Per-draw data for the geometry shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GeometryPushConstants {
    pub model: Mat4,
    pub scene: vk::DeviceAddress,
    pub material: u32,
    pub _pad: u32,
}

/// The deferred targets, registered as render targets in the texture cache
/// so the lighting shader samples them by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBuffer {
    pub albedo: TextureId,
    pub normal: TextureId,
    pub metallic_roughness: TextureId,
    pub position: TextureId,
    pub extent: vk::Extent2D,
}

impl GBuffer {
    pub const FORMATS: [vk::Format; 4] = [
        vk::Format::R8G8B8A8_UNORM,
        vk::Format::R16G16B16A16_SFLOAT,
        vk::Format::R8G8B8A8_UNORM,
        vk::Format::R32G32B32A32_SFLOAT,
    ];

    pub fn new<B: GpuBackend>(
        backend: &B,
        textures: &mut TextureCache,
        extent: vk::Extent2D,
    ) -> Result<Self, TextureCacheError> {
        let [albedo, normal, metallic_roughness, position] = Self::FORMATS;
        Ok(Self {
            albedo: textures.add_render_target(backend, "gbuffer.albedo", albedo, extent)?,
            normal: textures.add_render_target(backend, "gbuffer.normal", normal, extent)?,
            metallic_roughness: textures.add_render_target(
                backend,
                "gbuffer.metallic_roughness",
                metallic_roughness,
                extent,
            )?,
            position: textures.add_render_target(backend, "gbuffer.position", position, extent)?,
            extent,
        })
    }

    /// Attachment order, matching [`Self::FORMATS`] and the shader outputs.
    pub fn targets(&self) -> [TextureId; 4] {
        [self.albedo, self.normal, self.metallic_roughness, self.position]
    }
}

/// Draws every render object into the G-buffer.
#[derive(Debug)]
pub struct GBufferStage {
    pipeline: PipelineId,
}

impl GBufferStage {
    pub fn new<B: GpuBackend>(
        backend: &B,
        pipelines: &mut PipelineCache,
        textures: &TextureCache,
        depth_format: vk::Format,
    ) -> Result<Self, PipelineError> {
        let pipeline = pipelines.build(
            backend,
            &PipelineDesc {
                name: "gbuffer",
                shader: GBUFFER_SHADER,
                vertex_input: Some(Vertex::input_layout()),
                push_constant_ranges: &[vk::PushConstantRange {
                    stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    offset: 0,
                    size: size_of::<GeometryPushConstants>() as u32,
                }],
                set_layouts: &[textures.bindless_layout()],
                color_formats: &GBuffer::FORMATS,
                depth_format: Some(depth_format),
                cull_mode: vk::CullModeFlags::BACK,
            },
        )?;
        Ok(Self { pipeline })
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }
}

impl<B: GpuBackend> RenderStage<B> for GBufferStage {
    fn name(&self) -> &'static str {
        "gbuffer"
    }

    fn draw(&self, backend: &B, inputs: &StageInputs<'_>) {
        let cmd = inputs.command_buffer;
        let targets = inputs.gbuffer.targets().map(|id| inputs.textures.get(id).image);

        for target in &targets {
            backend.cmd_transition_image(
                cmd,
                target.handle,
                target.aspect,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
        }
        backend.cmd_transition_image(
            cmd,
            inputs.depth.handle,
            inputs.depth.aspect,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );

        let attachments = targets.map(|target| ColorAttachment {
            view: target.view,
            clear: Some([0.0; 4]),
        });
        backend.cmd_begin_rendering(
            cmd,
            &RenderingDesc {
                extent: inputs.gbuffer.extent,
                color_attachments: &attachments,
                depth_attachment: Some(DepthAttachment {
                    view: inputs.depth.view,
                    clear: Some(1.0),
                }),
            },
        );

        let pipeline = inputs.pipelines.get(self.pipeline);
        backend.cmd_bind_pipeline(cmd, pipeline);
        backend.cmd_set_viewport_and_scissor(cmd, inputs.gbuffer.extent);
        backend.cmd_bind_descriptor_set(cmd, pipeline.layout, 0, inputs.textures.bindless_set());

        for object in inputs.objects {
            let mesh = inputs.meshes.get(object.mesh);
            let constants = GeometryPushConstants {
                model: object.transform,
                scene: inputs.scene_address,
                material: object.material.0,
                _pad: 0,
            };
            backend.cmd_push_constants(
                cmd,
                pipeline.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&constants),
            );
            backend.cmd_bind_vertex_buffer(cmd, &mesh.vertex_buffer);
            backend.cmd_bind_index_buffer(cmd, &mesh.index_buffer);
            backend.cmd_draw_indexed(cmd, mesh.index_count, 1);
        }

        backend.cmd_end_rendering(cmd);

        for target in &targets {
            backend.cmd_transition_image(
                cmd,
                target.handle,
                target.aspect,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        }
    }

    fn cleanup(&mut self, backend: &B, pipelines: &mut PipelineCache) {
        pipelines.release(backend, self.pipeline);
    }
}

#[cfg(test)]
mod tests {
    use std::mem::offset_of;

    use eren_render_vulkan_core::backend::recording::{Event, RecordingBackend};

    use super::*;

    #[test]
    fn push_constants_fit_the_shader_block() {
        assert_eq!(size_of::<GeometryPushConstants>(), 80);
        assert_eq!(offset_of!(GeometryPushConstants, scene), 64);
        assert_eq!(offset_of!(GeometryPushConstants, material), 72);
    }

    #[test]
    fn gbuffer_targets_are_bindless_textures() {
        let backend = RecordingBackend::new();
        let mut textures = TextureCache::new(&backend, 8).unwrap();
        let extent = backend.swapchain_extent();

        let gbuffer = GBuffer::new(&backend, &mut textures, extent).unwrap();

        assert_eq!(
            gbuffer.targets(),
            [TextureId(0), TextureId(1), TextureId(2), TextureId(3)]
        );
        assert!(textures.is_loaded("gbuffer.position"));
        let formats: Vec<_> = backend
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::CreateImage { format, .. } => Some(format),
                _ => None,
            })
            .collect();
        assert_eq!(formats, GBuffer::FORMATS.to_vec());

        textures.cleanup(&backend);
        backend.assert_all_released();
    }
}
