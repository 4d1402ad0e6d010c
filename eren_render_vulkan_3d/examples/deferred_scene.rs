//! Loads a glTF file (or a built-in plane when none is given) and renders it
//! through the deferred pipeline.
//!
//! The engine loads SPIR-V only. Compile the GLSL sources once before the
//! first run (`glslc` ships with the Vulkan SDK):
//!
//! ```text
//! cd eren_render_vulkan_3d/Shaders
//! for s in gbuffer.vert gbuffer.frag lighting.vert lighting.frag; do
//!     glslc --target-env=vulkan1.3 "$s" -o "$s.spv"
//! done
//! cd ../..
//! cargo run --example deferred_scene -- path/to/model.gltf
//! ```
//!
//! Set `EREN_PROJECT_ROOT` to load shaders from another directory.

use std::path::PathBuf;

use eren_render_vulkan_3d::{
    Engine3D,
    assets::{ImportedMaterial, ImportedMesh, ImportedModel},
    config::RendererConfig,
    mesh::{CpuMesh, Vertex},
    scene::{FrameInput, PointLight},
};
use eren_render_vulkan_core::{config::ContextConfig, vulkan::VulkanBackend};
use eren_window::{
    error::handle_fatal_error,
    window::{WindowConfig, WindowEventHandler, WindowLifecycleManager, WindowSize},
};
use glam::{Mat4, Vec3};
use winit::window::Window;

fn plane_model() -> ImportedModel {
    let vertex = |x: f32, z: f32, u: f32, v: f32| Vertex {
        position: [x, 0.0, z],
        uv: [u, v],
        normal: [0.0, 1.0, 0.0],
        tangent: [1.0, 0.0, 0.0, 1.0],
    };

    ImportedModel {
        name: "plane".into(),
        meshes: vec![ImportedMesh {
            mesh: CpuMesh {
                name: "plane".into(),
                vertices: vec![
                    vertex(-1.0, -1.0, 0.0, 0.0),
                    vertex(1.0, -1.0, 1.0, 0.0),
                    vertex(1.0, 1.0, 1.0, 1.0),
                    vertex(-1.0, 1.0, 0.0, 1.0),
                ],
                indices: vec![0, 2, 1, 2, 0, 3],
            },
            material: Some(0),
            transform: Mat4::from_scale(Vec3::splat(3.0)),
        }],
        materials: vec![ImportedMaterial {
            name: "untextured".into(),
            textures: Vec::new(),
        }],
    }
}

struct DeferredScene {
    model_path: Option<PathBuf>,
    engine: Option<Engine3D<VulkanBackend>>,
    aspect: f32,
    frame: u64,
}

impl DeferredScene {
    fn load(&self, engine: &mut Engine3D<VulkanBackend>) {
        let loaded = match &self.model_path {
            Some(path) => engine.load_model(path),
            None => engine.load_imported(&plane_model()),
        };
        if let Err(e) = loaded {
            handle_fatal_error(e, "Failed to load scene");
        }

        let renderer = engine.renderer_mut();
        renderer.add_point_light(PointLight::new(
            Vec3::new(2.0, 2.0, 2.0),
            8.0,
            Vec3::new(1.0, 0.6, 0.3),
            4.0,
        ));
        renderer.add_point_light(PointLight::new(
            Vec3::new(-2.0, 1.5, -1.0),
            6.0,
            Vec3::new(0.3, 0.5, 1.0),
            3.0,
        ));

        if let Err(e) = engine.finish_loading() {
            handle_fatal_error(e, "Failed to finish loading");
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            if let Err(e) = engine.cleanup() {
                log::error!("Cleanup failed: {e}");
            }
        }
    }
}

impl WindowEventHandler for DeferredScene {
    fn on_window_ready(&mut self, window: &Window) {
        let size = window.inner_size();
        self.aspect = size.width.max(1) as f32 / size.height.max(1) as f32;

        let context_config = ContextConfig::from_env().with_application_name("deferred_scene");
        let backend = VulkanBackend::new(window, &context_config)
            .unwrap_or_else(|e| handle_fatal_error(e, "Failed to initialise Vulkan"));
        let mut engine = Engine3D::new(backend, &context_config, &RendererConfig::from_env())
            .unwrap_or_else(|e| handle_fatal_error(e, "Failed to create renderer"));

        self.load(&mut engine);
        self.engine = Some(engine);
    }

    fn on_window_lost(&mut self) {
        self.shutdown();
    }

    fn on_window_resized(&mut self, size: WindowSize) {
        // Without swapchain recreation the image extent stays fixed.
        log::debug!("Window resized to {}x{}", size.width, size.height);
    }

    fn redraw(&mut self) {
        let Some(engine) = &mut self.engine else {
            return;
        };

        let angle = self.frame as f32 * 0.005;
        let eye = Vec3::new(6.0 * angle.cos(), 3.0, 6.0 * angle.sin());
        engine
            .renderer_mut()
            .set_frame_input(FrameInput::look_at(eye, Vec3::ZERO, 60f32.to_radians(), self.aspect));

        if let Err(e) = engine.draw_frame() {
            handle_fatal_error(e, "Failed to draw frame");
        }
        self.frame += 1;
    }

    fn on_window_close_requested(&mut self) {
        self.shutdown();
    }
}

fn main() {
    env_logger::init();

    let handler = DeferredScene {
        model_path: std::env::args().nth(1).map(PathBuf::from),
        engine: None,
        aspect: 16.0 / 9.0,
        frame: 0,
    };

    if let Err(e) = WindowLifecycleManager::new(
        WindowConfig {
            width: 1280,
            height: 720,
            title: "Deferred Scene",
        },
        handler,
    )
    .start_event_loop()
    {
        handle_fatal_error(e, "Event loop failed");
    }
}
