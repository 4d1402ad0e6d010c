use ash::vk;
use eren_render_vulkan_core::backend::{
    GpuBackend, GpuError, GraphicsPipeline, GraphicsPipelineDesc, VertexInputLayout,
};
use thiserror::Error;

use crate::{
    ids::{PipelineId, next_id},
    shader::{ShaderError, ShaderLibrary},
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load shaders for pipeline `{name}`: {source}")]
    Shader {
        name: String,
        #[source]
        source: ShaderError,
    },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Everything a stage decides about its pipeline. Shader bytecode is
/// resolved by name through the cache's [`ShaderLibrary`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    pub name: &'a str,
    /// Loads `Shaders/<shader>.vert.spv` and `Shaders/<shader>.frag.spv`.
    pub shader: &'a str,
    pub vertex_input: Option<VertexInputLayout<'a>>,
    pub push_constant_ranges: &'a [vk::PushConstantRange],
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub color_formats: &'a [vk::Format],
    pub depth_format: Option<vk::Format>,
    pub cull_mode: vk::CullModeFlags,
}

#[derive(Debug)]
struct PipelineEntry {
    name: String,
    pipeline: Option<GraphicsPipeline>,
}

/// Owns every graphics pipeline. Pipelines are immutable once built; a
/// released slot keeps its id so ids are never reused.
#[derive(Debug)]
pub struct PipelineCache {
    shaders: ShaderLibrary,
    entries: Vec<PipelineEntry>,
}

impl PipelineCache {
    pub fn new(shaders: ShaderLibrary) -> Self {
        Self {
            shaders,
            entries: Vec::new(),
        }
    }

    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    pub fn build<B: GpuBackend>(
        &mut self,
        backend: &B,
        desc: &PipelineDesc<'_>,
    ) -> Result<PipelineId, PipelineError> {
        let id = PipelineId(next_id(self.entries.len()));
        let spirv = self
            .shaders
            .load_pair(desc.shader)
            .map_err(|source| PipelineError::Shader {
                name: desc.name.to_string(),
                source,
            })?;

        let pipeline = backend.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: desc.name,
            vertex_spirv: &spirv.vertex,
            fragment_spirv: &spirv.fragment,
            vertex_input: desc.vertex_input,
            push_constant_ranges: desc.push_constant_ranges,
            set_layouts: desc.set_layouts,
            color_formats: desc.color_formats,
            depth_format: desc.depth_format,
            cull_mode: desc.cull_mode,
        })?;

        self.entries.push(PipelineEntry {
            name: desc.name.to_string(),
            pipeline: Some(pipeline),
        });
        log::info!("Pipeline `{}` built as {id}", desc.name);
        Ok(id)
    }

    /// Panics if `id` is unknown or already released.
    pub fn get(&self, id: PipelineId) -> &GraphicsPipeline {
        let Some(entry) = self.entries.get(id.index()) else {
            panic!("{id} out of range ({} pipelines)", self.entries.len());
        };
        match &entry.pipeline {
            Some(pipeline) => pipeline,
            None => panic!("pipeline `{}` ({id}) was released", entry.name),
        }
    }

    pub fn is_live(&self, id: PipelineId) -> bool {
        self.entries
            .get(id.index())
            .is_some_and(|entry| entry.pipeline.is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroys one pipeline ahead of [`Self::cleanup`]. Releasing twice is
    /// a no-op.
    pub fn release<B: GpuBackend>(&mut self, backend: &B, id: PipelineId) {
        let count = self.entries.len();
        let Some(entry) = self.entries.get_mut(id.index()) else {
            panic!("{id} out of range ({count} pipelines)");
        };
        if let Some(pipeline) = entry.pipeline.take() {
            backend.destroy_graphics_pipeline(pipeline);
            log::debug!("Pipeline `{}` released", entry.name);
        }
    }

    /// Destroys every pipeline still alive, newest first. Must run before
    /// the device goes away.
    pub fn cleanup<B: GpuBackend>(self, backend: &B) {
        let mut released = 0;
        for pipeline in self.entries.into_iter().rev().filter_map(|entry| entry.pipeline) {
            backend.destroy_graphics_pipeline(pipeline);
            released += 1;
        }
        log::info!("Pipeline cache released {released} pipelines");
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use eren_render_vulkan_core::backend::recording::{RecordingBackend, ResourceKind};

    use super::*;
    use crate::shader::SPIRV_MAGIC;

    fn stub_shader(root: &Path, name: &str) {
        let dir = root.join("Shaders");
        fs::create_dir_all(&dir).unwrap();
        for stage in ["vert", "frag"] {
            fs::write(
                dir.join(format!("{name}.{stage}.spv")),
                SPIRV_MAGIC.to_le_bytes(),
            )
            .unwrap();
        }
    }

    fn desc<'a>(name: &'a str, shader: &'a str) -> PipelineDesc<'a> {
        PipelineDesc {
            name,
            shader,
            vertex_input: None,
            push_constant_ranges: &[],
            set_layouts: &[],
            color_formats: &[vk::Format::R8G8B8A8_UNORM],
            depth_format: None,
            cull_mode: vk::CullModeFlags::NONE,
        }
    }

    #[test]
    fn builds_pipelines_with_increasing_ids() {
        let root = tempfile::tempdir().unwrap();
        stub_shader(root.path(), "flat");
        let backend = RecordingBackend::new();
        let mut cache = PipelineCache::new(ShaderLibrary::new(root.path()));

        let first = cache.build(&backend, &desc("first", "flat")).unwrap();
        let second = cache.build(&backend, &desc("second", "flat")).unwrap();

        assert_eq!((first, second), (PipelineId(0), PipelineId(1)));
        assert_ne!(cache.get(first).pipeline, cache.get(second).pipeline);

        cache.cleanup(&backend);
        backend.assert_all_released();
    }

    #[test]
    fn released_pipelines_are_skipped_by_cleanup() {
        let root = tempfile::tempdir().unwrap();
        stub_shader(root.path(), "flat");
        let backend = RecordingBackend::new();
        let mut cache = PipelineCache::new(ShaderLibrary::new(root.path()));
        let id = cache.build(&backend, &desc("early", "flat")).unwrap();
        cache.build(&backend, &desc("late", "flat")).unwrap();

        cache.release(&backend, id);
        cache.release(&backend, id);
        assert!(!cache.is_live(id));
        assert_eq!(cache.len(), 2);

        cache.cleanup(&backend);
        assert_eq!(backend.destroyed(ResourceKind::Pipeline), 2);
        backend.assert_all_released();
    }

    #[test]
    #[should_panic(expected = "was released")]
    fn getting_a_released_pipeline_panics() {
        let root = tempfile::tempdir().unwrap();
        stub_shader(root.path(), "flat");
        let backend = RecordingBackend::new();
        let mut cache = PipelineCache::new(ShaderLibrary::new(root.path()));
        let id = cache.build(&backend, &desc("gone", "flat")).unwrap();

        cache.release(&backend, id);
        cache.get(id);
    }

    #[test]
    fn missing_shaders_fail_the_build() {
        let root = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::new();
        let mut cache = PipelineCache::new(ShaderLibrary::new(root.path()));

        assert!(matches!(
            cache.build(&backend, &desc("lighting", "lighting")),
            Err(PipelineError::Shader { name, .. }) if name == "lighting"
        ));
        assert!(cache.is_empty());
        assert_eq!(backend.created(ResourceKind::Pipeline), 0);
    }
}
