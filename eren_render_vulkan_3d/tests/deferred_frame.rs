use std::{cell::Cell, fs, path::Path, rc::Rc};

use eren_render_vulkan_3d::{
    Engine3D, EngineError, Overlay,
    assets::{ImportedMaterial, ImportedMesh, ImportedModel},
    config::RendererConfig,
    ids::MaterialId,
    mesh::{CpuMesh, Vertex},
    pipeline::PipelineError,
    scene::PointLight,
    shader::SPIRV_MAGIC,
    texture::TextureCacheError,
};
use eren_render_vulkan_core::{
    backend::{
        GpuBackend,
        recording::{Event, RecordingBackend, ResourceKind},
    },
    config::ContextConfig,
    frame::FRAMES_IN_FLIGHT,
    renderer::FrameContext,
    vk,
};
use glam::{Mat4, Vec3};
use tempfile::TempDir;

fn project_root() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let shaders = root.path().join("Shaders");
    fs::create_dir_all(&shaders).unwrap();
    for name in ["gbuffer", "lighting"] {
        for stage in ["vert", "frag"] {
            fs::write(
                shaders.join(format!("{name}.{stage}.spv")),
                SPIRV_MAGIC.to_le_bytes(),
            )
            .unwrap();
        }
    }
    root
}

fn engine(root: &Path) -> Engine3D<RecordingBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    Engine3D::new(
        RecordingBackend::new(),
        &ContextConfig::default(),
        &RendererConfig::default().with_project_root(root),
    )
    .unwrap()
}

fn triangle_model() -> ImportedModel {
    let vertex = |x: f32, y: f32| Vertex {
        position: [x, y, 0.0],
        uv: [x, y],
        normal: [0.0, 0.0, 1.0],
        tangent: [1.0, 0.0, 0.0, 1.0],
    };
    ImportedModel {
        name: "triangle".into(),
        meshes: vec![ImportedMesh {
            mesh: CpuMesh {
                name: "triangle".into(),
                vertices: vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(0.0, 1.0)],
                indices: vec![0, 1, 2],
            },
            material: Some(0),
            transform: Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)),
        }],
        materials: vec![ImportedMaterial {
            name: "blank".into(),
            textures: Vec::new(),
        }],
    }
}

/// Push-constant payloads of the geometry stage, in recording order.
fn geometry_push_constants(events: &[Event]) -> Vec<Vec<u8>> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::PushConstants { data, .. } if data.len() == 80 => Some(data.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn single_triangle_is_one_indexed_draw() {
    let root = project_root();
    let mut engine = engine(root.path());

    let objects = engine.load_imported(&triangle_model()).unwrap();
    assert_eq!(objects, 0..1);
    engine.finish_loading().unwrap();
    engine.context().clear_events();

    engine.draw_frame().unwrap();

    let events = engine.context().events();
    let indexed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::DrawIndexed {
                index_count,
                instance_count,
                ..
            } => Some((*index_count, *instance_count)),
            _ => None,
        })
        .collect();
    assert_eq!(indexed, vec![(3, 1)]);

    let pushed = geometry_push_constants(&events);
    assert_eq!(pushed.len(), 1);
    let material = u32::from_le_bytes(pushed[0][72..76].try_into().unwrap());
    assert_eq!(material, MaterialId(0).0);
    let scene = u64::from_le_bytes(pushed[0][64..72].try_into().unwrap());
    assert_eq!(scene, engine.renderer().scene_buffer(0).address());
    let model_mat = Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0));
    let model: &[u8] = bytemuck::bytes_of(&model_mat);
    assert_eq!(&pushed[0][..64], model);

    engine.cleanup().unwrap();
    engine.context().assert_all_released();
}

#[test]
fn geometry_runs_before_lighting_and_overlay() {
    struct CountingOverlay(Rc<Cell<u32>>);

    impl Overlay<RecordingBackend> for CountingOverlay {
        fn draw(&self, backend: &RecordingBackend, frame: &FrameContext) {
            self.0.set(self.0.get() + 1);
            backend.cmd_draw(frame.command_buffer, 3, 1);
        }
    }

    let root = project_root();
    let mut engine = engine(root.path());
    let overlay_draws = Rc::new(Cell::new(0));
    engine
        .renderer_mut()
        .set_overlay(Box::new(CountingOverlay(Rc::clone(&overlay_draws))));
    engine.load_imported(&triangle_model()).unwrap();
    engine.finish_loading().unwrap();
    engine.context().clear_events();

    engine.draw_frame().unwrap();

    let events = engine.context().events();
    let position = |predicate: &dyn Fn(&Event) -> bool| events.iter().position(predicate).unwrap();
    let geometry = position(&|e: &Event| matches!(e, Event::DrawIndexed { .. }));
    let lighting = position(&|e: &Event| matches!(e, Event::Draw { vertex_count: 6, .. }));
    let overlay = position(&|e: &Event| matches!(e, Event::Draw { vertex_count: 3, .. }));
    let present_barrier = position(&|e: &Event| {
        matches!(
            e,
            Event::TransitionImage {
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..
            }
        )
    });
    assert!(geometry < lighting);
    assert!(lighting < overlay);
    assert!(overlay < present_barrier);
    assert_eq!(overlay_draws.get(), 1);

    // Lighting samples the G-buffer only after it left attachment layout.
    let gbuffer_read = events[..lighting]
        .iter()
        .filter(|e| {
            matches!(
                e,
                Event::TransitionImage {
                    old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    ..
                }
            )
        })
        .count();
    assert_eq!(gbuffer_read, 4);

    engine.cleanup().unwrap();
}

#[test]
fn shared_targets_are_rewritten_after_previous_frame_writes() {
    let root = project_root();
    let mut engine = engine(root.path());
    engine.load_imported(&triangle_model()).unwrap();
    engine.finish_loading().unwrap();
    engine.context().clear_events();

    for _ in 0..FRAMES_IN_FLIGHT + 1 {
        engine.draw_frame().unwrap();
    }

    let textures = &engine.renderer().assets().textures;
    let mut shared: Vec<vk::Image> = engine
        .renderer()
        .gbuffer()
        .targets()
        .iter()
        .map(|&id| textures.get(id).image.handle)
        .collect();
    shared.push(engine.context().depth_image().handle);

    let discards: Vec<_> = engine
        .context()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::TransitionImage {
                image,
                old_layout: vk::ImageLayout::UNDEFINED,
                masks,
                ..
            } if shared.contains(&image) => Some(masks),
            _ => None,
        })
        .collect();
    assert_eq!(discards.len(), shared.len() * (FRAMES_IN_FLIGHT + 1));
    for masks in discards {
        assert_eq!(masks.src_stage, vk::PipelineStageFlags2::ALL_COMMANDS);
        assert!(masks.src_access.contains(vk::AccessFlags2::MEMORY_WRITE));
    }

    engine.cleanup().unwrap();
}

#[test]
fn unknown_texture_names_are_errors() {
    let root = project_root();
    let mut engine = engine(root.path());
    let textures = &engine.renderer().assets().textures;

    assert!(!textures.is_loaded("bricks.png"));
    assert!(matches!(
        textures.get_id_by_name("bricks.png"),
        Err(TextureCacheError::UnknownName(name)) if name == "bricks.png"
    ));

    engine.cleanup().unwrap();
}

#[test]
fn each_slot_waits_on_its_own_fence() {
    let root = project_root();
    let mut engine = engine(root.path());
    engine.load_imported(&triangle_model()).unwrap();
    engine.finish_loading().unwrap();
    engine.context().clear_events();

    let slot0 = engine.context().frame(0).render_fence;
    let mut waited_at = Vec::new();
    for iteration in 0..2 * FRAMES_IN_FLIGHT + 1 {
        let before = engine.context().events().len();
        engine.draw_frame().unwrap();
        let waited = engine.context().events()[before..]
            .iter()
            .any(|e| *e == Event::WaitForFence(slot0));
        if waited {
            waited_at.push(iteration);
        }
    }

    assert_eq!(waited_at, vec![0, 2, 4]);
    assert!(engine.context().max_in_flight() <= FRAMES_IN_FLIGHT);

    engine.cleanup().unwrap();
}

#[test]
fn scene_data_alternates_between_slot_buffers() {
    let root = project_root();
    let mut engine = engine(root.path());
    engine
        .renderer_mut()
        .add_point_light(PointLight::new(Vec3::Y, 5.0, Vec3::ONE, 2.0));
    engine.finish_loading().unwrap();
    engine.context().clear_events();

    for _ in 0..3 {
        engine.draw_frame().unwrap();
    }

    let scene_buffers: Vec<vk::Buffer> = (0..FRAMES_IN_FLIGHT)
        .map(|slot| engine.renderer().scene_buffer(slot).handle)
        .collect();
    let writes: Vec<vk::Buffer> = engine
        .context()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::WriteBuffer { buffer, .. } if scene_buffers.contains(&buffer) => Some(buffer),
            _ => None,
        })
        .collect();
    assert_eq!(
        writes,
        vec![scene_buffers[0], scene_buffers[1], scene_buffers[0]]
    );

    // point_light_count sits at byte 256 of the scene block.
    let bytes = engine.context().read_buffer(scene_buffers[0]);
    assert_eq!(u32::from_le_bytes(bytes[256..260].try_into().unwrap()), 1);
    assert_ne!(u64::from_le_bytes(bytes[240..248].try_into().unwrap()), 0);

    engine.cleanup().unwrap();
}

#[test]
fn cleanup_releases_every_object_once() {
    let root = project_root();
    let mut engine = engine(root.path());
    engine.load_imported(&triangle_model()).unwrap();
    engine
        .renderer_mut()
        .add_point_light(PointLight::new(Vec3::ZERO, 1.0, Vec3::ONE, 1.0));
    engine.finish_loading().unwrap();
    engine.draw_frame().unwrap();

    engine.cleanup().unwrap();
    engine.cleanup().unwrap();

    let ctx = engine.context();
    ctx.assert_all_released();
    for kind in [
        ResourceKind::Buffer,
        ResourceKind::Image,
        ResourceKind::Sampler,
        ResourceKind::Pipeline,
        ResourceKind::DescriptorPool,
        ResourceKind::DescriptorSetLayout,
    ] {
        assert_eq!(ctx.created(kind), ctx.destroyed(kind), "{kind:?}");
    }
    assert_eq!(ctx.created(ResourceKind::Pipeline), 2);
}

#[test]
fn missing_shaders_abort_startup_cleanly() {
    let root = tempfile::tempdir().unwrap();
    let config = RendererConfig::default().with_project_root(root.path());

    let result = Engine3D::new(RecordingBackend::new(), &ContextConfig::default(), &config);

    assert!(matches!(
        result,
        Err(EngineError::Pipeline(PipelineError::Shader { .. }))
    ));
}
