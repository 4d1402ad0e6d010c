use std::{mem::size_of, ops::Range, path::Path};

use ash::vk;
use eren_render_vulkan_core::{
    backend::{GpuBackend, GpuBuffer, GpuError, GpuImage, MemoryLocation},
    config::ContextConfig,
    context::{DeviceContext, DeviceContextError},
    frame::{FRAMES_IN_FLIGHT, FrameError, FrameScheduler},
    renderer::{FrameContext, FrameInfo, Renderer},
};
use thiserror::Error;

use crate::{
    assets::{ImportedModel, LoadError, SceneAssets, load_model},
    config::RendererConfig,
    import::import_gltf,
    material::MaterialCacheError,
    pipeline::PipelineError,
    scene::{FrameInput, PointLight, RenderObject, SceneData},
    shader::ShaderLibrary,
    stages::{GBuffer, GBufferStage, LightingStage, RenderStage, StageInputs},
    texture::TextureCacheError,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Context(#[from] DeviceContextError),

    #[error("Failed to build pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Failed to create render targets: {0}")]
    RenderTarget(#[from] TextureCacheError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Material(#[from] MaterialCacheError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Records into the swapchain image after the lighting stage, e.g. a UI.
pub trait Overlay<B: GpuBackend> {
    /// The image is in `COLOR_ATTACHMENT_OPTIMAL` and must be left there.
    fn draw(&self, backend: &B, frame: &FrameContext);

    fn cleanup(&mut self, _backend: &B) {}
}

/// The deferred renderer: caches, stages and per-slot scene data.
///
/// Assets are loaded first, then [`Self::finish_loading`] freezes the
/// material and light buffers. After that only transforms and the frame
/// input change.
pub struct Renderer3D<B: GpuBackend> {
    assets: SceneAssets,
    gbuffer: GBuffer,
    stages: Vec<Box<dyn RenderStage<B>>>,
    scene_buffers: [GpuBuffer; FRAMES_IN_FLIGHT],
    point_lights: Vec<PointLight>,
    light_buffer: Option<GpuBuffer>,
    objects: Vec<RenderObject>,
    input: FrameInput,
    overlay: Option<Box<dyn Overlay<B>>>,
    depth: GpuImage,
    clear_color: [f32; 4],
    loaded: bool,
}

impl<B: GpuBackend> Renderer3D<B> {
    pub fn new(ctx: &DeviceContext<B>, config: &RendererConfig) -> Result<Self, EngineError> {
        let backend = ctx.backend();
        let mut assets = SceneAssets::new(
            backend,
            ShaderLibrary::new(&config.project_root),
            config.texture_capacity,
        )?;

        let mut stages: Vec<Box<dyn RenderStage<B>>> = Vec::new();
        let mut scene_buffers = Vec::with_capacity(FRAMES_IN_FLIGHT);
        let built = Self::build(ctx, &mut assets, &mut stages, &mut scene_buffers);

        let gbuffer = match built {
            Ok(gbuffer) => gbuffer,
            Err(e) => {
                log::error!("Renderer initialisation failed: {e}");
                for buffer in scene_buffers {
                    backend.destroy_buffer(buffer);
                }
                for stage in &mut stages {
                    stage.cleanup(backend, &mut assets.pipelines);
                }
                assets.cleanup(backend);
                return Err(e);
            }
        };

        let scene_buffers: [GpuBuffer; FRAMES_IN_FLIGHT] = match scene_buffers.try_into() {
            Ok(buffers) => buffers,
            Err(_) => unreachable!("one scene buffer per frame in flight"),
        };

        log::info!(
            "Deferred renderer ready: {} stages, G-buffer {}x{}",
            stages.len(),
            gbuffer.extent.width,
            gbuffer.extent.height
        );

        Ok(Self {
            assets,
            gbuffer,
            stages,
            scene_buffers,
            point_lights: Vec::new(),
            light_buffer: None,
            objects: Vec::new(),
            input: FrameInput::default(),
            overlay: None,
            depth: ctx.depth_image(),
            clear_color: config.clear_color,
            loaded: false,
        })
    }

    fn build(
        ctx: &DeviceContext<B>,
        assets: &mut SceneAssets,
        stages: &mut Vec<Box<dyn RenderStage<B>>>,
        scene_buffers: &mut Vec<GpuBuffer>,
    ) -> Result<GBuffer, EngineError> {
        let backend = ctx.backend();
        let gbuffer = GBuffer::new(backend, &mut assets.textures, backend.swapchain_extent())?;

        stages.push(Box::new(GBufferStage::new(
            backend,
            &mut assets.pipelines,
            &assets.textures,
            ctx.depth_image().format,
        )?));
        stages.push(Box::new(LightingStage::new(
            backend,
            &mut assets.pipelines,
            &assets.textures,
        )?));

        for slot in 0..FRAMES_IN_FLIGHT {
            scene_buffers.push(backend.create_buffer(
                &format!("scene data {slot}"),
                size_of::<SceneData>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                MemoryLocation::CpuToGpu,
            )?);
        }

        Ok(gbuffer)
    }

    pub fn assets(&self) -> &SceneAssets {
        &self.assets
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn scene_buffer(&self, frame_index: usize) -> &GpuBuffer {
        &self.scene_buffers[frame_index]
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Uploads an imported model and queues one render object per mesh.
    /// Returns the indices of the new objects.
    pub fn load_model(
        &mut self,
        ctx: &DeviceContext<B>,
        model: &ImportedModel,
    ) -> Result<Range<usize>, EngineError> {
        assert!(!self.loaded, "model `{}` loaded after finish_loading", model.name);

        let objects = load_model(ctx, &mut self.assets, model)?;
        let start = self.objects.len();
        self.objects.extend(objects);
        Ok(start..self.objects.len())
    }

    /// Direct access to the caches for hand-built content. Load phase only.
    pub fn assets_mut(&mut self) -> &mut SceneAssets {
        assert!(!self.loaded, "caches are read-only after finish_loading");
        &mut self.assets
    }

    pub fn add_object(&mut self, object: RenderObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn objects(&self) -> &[RenderObject] {
        &self.objects
    }

    /// Transforms may change every frame; ids should not.
    pub fn objects_mut(&mut self) -> &mut [RenderObject] {
        &mut self.objects
    }

    pub fn add_point_light(&mut self, light: PointLight) {
        assert!(!self.loaded, "point light added after finish_loading");
        self.point_lights.push(light);
    }

    pub fn set_frame_input(&mut self, input: FrameInput) {
        self.input = input;
    }

    pub fn set_overlay(&mut self, overlay: Box<dyn Overlay<B>>) {
        self.overlay = Some(overlay);
    }

    /// Uploads the material and point-light buffers. Must run once, after
    /// the last model is loaded and before the first frame.
    pub fn finish_loading(&mut self, ctx: &DeviceContext<B>) -> Result<(), EngineError> {
        self.assets.materials.upload(ctx)?;

        if !self.point_lights.is_empty() {
            self.light_buffer = Some(ctx.upload_buffer(
                "point lights",
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                bytemuck::cast_slice(&self.point_lights),
            )?);
        }

        self.loaded = true;
        log::info!(
            "Loading finished: {} objects, {} meshes, {} textures, {} materials, {} point lights",
            self.objects.len(),
            self.assets.meshes.len(),
            self.assets.textures.len(),
            self.assets.materials.get_count(),
            self.point_lights.len()
        );
        Ok(())
    }

    /// Releases stages, per-frame buffers and every cache. The GPU must be
    /// idle.
    pub fn cleanup(self, backend: &B) {
        let Self {
            mut assets,
            mut stages,
            scene_buffers,
            light_buffer,
            mut overlay,
            ..
        } = self;

        if let Some(overlay) = &mut overlay {
            overlay.cleanup(backend);
        }
        for stage in stages.iter_mut().rev() {
            log::debug!("Cleaning up stage `{}`", stage.name());
            stage.cleanup(backend, &mut assets.pipelines);
        }
        if let Some(buffer) = light_buffer {
            backend.destroy_buffer(buffer);
        }
        for buffer in scene_buffers {
            backend.destroy_buffer(buffer);
        }
        assets.cleanup(backend);
        log::info!("Deferred renderer cleaned up");
    }
}

impl<B: GpuBackend> Renderer<B> for Renderer3D<B> {
    fn prepare(&mut self, backend: &B, frame: &FrameInfo) -> Result<(), GpuError> {
        assert!(self.loaded, "frame drawn before finish_loading");

        let scene = SceneData::new(
            &self.input,
            self.assets.materials.address(),
            self.light_buffer.map_or(0, |buffer| buffer.address()),
            self.point_lights.len() as u32,
        );
        backend.write_buffer(
            &self.scene_buffers[frame.frame_index],
            0,
            bytemuck::bytes_of(&scene),
        )
    }

    fn render(&self, backend: &B, frame: &FrameContext) {
        let inputs = StageInputs {
            command_buffer: frame.command_buffer,
            extent: frame.extent,
            scene_address: self.scene_buffers[frame.frame_index].address(),
            objects: &self.objects,
            meshes: &self.assets.meshes,
            textures: &self.assets.textures,
            pipelines: &self.assets.pipelines,
            gbuffer: &self.gbuffer,
            depth: self.depth,
            target: frame.swapchain_image.view,
            clear_color: self.clear_color,
        };

        for stage in &self.stages {
            stage.draw(backend, &inputs);
        }
        if let Some(overlay) = &self.overlay {
            overlay.draw(backend, frame);
        }
    }
}

/// Device context, frame scheduler and deferred renderer in one place.
pub struct Engine3D<B: GpuBackend> {
    renderer: Option<Renderer3D<B>>,
    scheduler: FrameScheduler,
    ctx: DeviceContext<B>,
}

impl<B: GpuBackend> Engine3D<B> {
    pub fn new(
        backend: B,
        context_config: &ContextConfig,
        config: &RendererConfig,
    ) -> Result<Self, EngineError> {
        let mut ctx = DeviceContext::new(backend, context_config)?;
        let renderer = match Renderer3D::new(&ctx, config) {
            Ok(renderer) => renderer,
            Err(e) => {
                ctx.cleanup()?;
                return Err(e);
            }
        };

        Ok(Self {
            renderer: Some(renderer),
            scheduler: FrameScheduler::new(),
            ctx,
        })
    }

    pub fn context(&self) -> &DeviceContext<B> {
        &self.ctx
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Panics after [`Self::cleanup`].
    pub fn renderer(&self) -> &Renderer3D<B> {
        match &self.renderer {
            Some(renderer) => renderer,
            None => panic!("engine used after cleanup"),
        }
    }

    /// Panics after [`Self::cleanup`].
    pub fn renderer_mut(&mut self) -> &mut Renderer3D<B> {
        match &mut self.renderer {
            Some(renderer) => renderer,
            None => panic!("engine used after cleanup"),
        }
    }

    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<Range<usize>, EngineError> {
        let model = import_gltf(path).map_err(LoadError::from)?;
        self.load_imported(&model)
    }

    pub fn load_imported(&mut self, model: &ImportedModel) -> Result<Range<usize>, EngineError> {
        let Self { renderer, ctx, .. } = self;
        match renderer {
            Some(renderer) => renderer.load_model(ctx, model),
            None => panic!("engine used after cleanup"),
        }
    }

    pub fn finish_loading(&mut self) -> Result<(), EngineError> {
        let Self { renderer, ctx, .. } = self;
        match renderer {
            Some(renderer) => renderer.finish_loading(ctx),
            None => panic!("engine used after cleanup"),
        }
    }

    pub fn draw_frame(&mut self) -> Result<(), FrameError> {
        let Self {
            renderer,
            scheduler,
            ctx,
        } = self;
        match renderer {
            Some(renderer) => scheduler.draw_frame(ctx, renderer),
            None => panic!("engine used after cleanup"),
        }
    }

    /// Waits for the GPU, then releases the renderer and the context.
    /// Safe to call more than once.
    pub fn cleanup(&mut self) -> Result<(), GpuError> {
        if let Some(renderer) = self.renderer.take() {
            self.ctx.wait_idle()?;
            renderer.cleanup(self.ctx.backend());
        }
        self.ctx.cleanup()
    }
}

impl<B: GpuBackend> Drop for Engine3D<B> {
    fn drop(&mut self) {
        if self.renderer.is_some() {
            log::warn!("Engine dropped without cleanup; cleaning up now");
            if let Err(e) = self.cleanup() {
                log::error!("Cleanup during drop failed: {e}");
            }
        }
    }
}
