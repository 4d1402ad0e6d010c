use std::sync::Arc;

use eren_render_vulkan_core::{
    backend::{GpuBackend, GpuError},
    context::DeviceContext,
};
use glam::Mat4;
use thiserror::Error;

use crate::{
    ids::{MaterialId, TextureId},
    import::ImportError,
    material::{Material, MaterialCache, TextureKind},
    mesh::{CpuMesh, MeshCache, MeshCacheError},
    pipeline::PipelineCache,
    scene::RenderObject,
    shader::ShaderLibrary,
    texture::{TextureCache, TextureCacheError, TextureData},
};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("Failed to load mesh: {0}")]
    Mesh(#[from] MeshCacheError),

    #[error("Failed to load texture: {0}")]
    Texture(#[from] TextureCacheError),
}

/// A texture slot of an imported material. `name` identifies the image
/// across materials and models and is the texture cache key.
#[derive(Debug, Clone)]
pub struct TextureRef {
    pub kind: TextureKind,
    pub name: String,
    pub data: Arc<TextureData>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportedMaterial {
    pub name: String,
    pub textures: Vec<TextureRef>,
}

#[derive(Debug, Clone)]
pub struct ImportedMesh {
    pub mesh: CpuMesh,
    /// Index into [`ImportedModel::materials`]; `None` uses a blank material.
    pub material: Option<usize>,
    /// Local-to-world, with the node hierarchy already applied.
    pub transform: Mat4,
}

#[derive(Debug, Clone, Default)]
pub struct ImportedModel {
    pub name: String,
    pub meshes: Vec<ImportedMesh>,
    pub materials: Vec<ImportedMaterial>,
}

/// The resource caches, passed by reference through the load chain.
#[derive(Debug)]
pub struct SceneAssets {
    pub meshes: MeshCache,
    pub textures: TextureCache,
    pub materials: MaterialCache,
    pub pipelines: PipelineCache,
}

impl SceneAssets {
    pub fn new<B: GpuBackend>(
        backend: &B,
        shaders: ShaderLibrary,
        texture_capacity: u32,
    ) -> Result<Self, GpuError> {
        Ok(Self {
            meshes: MeshCache::new(),
            textures: TextureCache::new(backend, texture_capacity)?,
            materials: MaterialCache::new(),
            pipelines: PipelineCache::new(shaders),
        })
    }

    /// Releases every cache. Pipelines go first; the bindless layout they
    /// were built against goes with the textures.
    pub fn cleanup<B: GpuBackend>(self, backend: &B) {
        self.pipelines.cleanup(backend);
        self.materials.cleanup(backend);
        self.meshes.cleanup(backend);
        self.textures.cleanup(backend);
    }
}

/// Resolves a texture through the cache, uploading it only if no earlier
/// material loaded the same name.
fn resolve_texture<B: GpuBackend>(
    ctx: &DeviceContext<B>,
    textures: &mut TextureCache,
    texture: &TextureRef,
) -> Result<TextureId, TextureCacheError> {
    if textures.is_loaded(&texture.name) {
        return textures.get_id_by_name(&texture.name);
    }
    textures.add(ctx, &texture.name, &texture.data)
}

/// Uploads every mesh, texture and material of `model` and returns one
/// render object per mesh.
pub fn load_model<B: GpuBackend>(
    ctx: &DeviceContext<B>,
    assets: &mut SceneAssets,
    model: &ImportedModel,
) -> Result<Vec<RenderObject>, LoadError> {
    let textures_before = assets.textures.len();

    let mut material_ids = Vec::with_capacity(model.materials.len());
    for imported in &model.materials {
        let mut material = Material::default();
        for texture in &imported.textures {
            let id = resolve_texture(ctx, &mut assets.textures, texture)?;
            material.set_texture(texture.kind, id);
        }
        material_ids.push(assets.materials.add(material));
    }

    let mut blank_material: Option<MaterialId> = None;
    let mut objects = Vec::with_capacity(model.meshes.len());
    for imported in &model.meshes {
        let material = match imported.material.and_then(|index| material_ids.get(index)) {
            Some(id) => *id,
            None => {
                if imported.material.is_some() {
                    log::warn!(
                        "Mesh `{}` references a missing material; using a blank one",
                        imported.mesh.name
                    );
                }
                *blank_material.get_or_insert_with(|| assets.materials.add(Material::default()))
            }
        };

        objects.push(RenderObject {
            mesh: assets.meshes.add(ctx, &imported.mesh)?,
            material,
            transform: imported.transform,
        });
    }

    log::info!(
        "Loaded model `{}`: {} meshes, {} materials, {} new textures",
        model.name,
        objects.len(),
        material_ids.len(),
        assets.textures.len() - textures_before
    );

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use eren_render_vulkan_core::{
        backend::recording::{RecordingBackend, ResourceKind},
        config::ContextConfig,
    };

    use super::*;
    use crate::{ids::MeshId, mesh::Vertex};

    fn triangle(name: &str) -> CpuMesh {
        CpuMesh {
            name: name.into(),
            vertices: vec![Vertex::default(); 3],
            indices: vec![0, 1, 2],
        }
    }

    fn texture(kind: TextureKind, name: &str) -> TextureRef {
        TextureRef {
            kind,
            name: name.into(),
            data: Arc::new(TextureData::solid([200, 100, 50, 255], kind.is_srgb())),
        }
    }

    #[test]
    fn shared_textures_upload_once() {
        let mut ctx = DeviceContext::new(RecordingBackend::new(), &ContextConfig::default())
            .unwrap();
        let root = tempfile::tempdir().unwrap();
        let mut assets = SceneAssets::new(ctx.backend(), ShaderLibrary::new(root.path()), 16)
            .unwrap();

        let model = ImportedModel {
            name: "crates".into(),
            materials: vec![
                ImportedMaterial {
                    name: "wood".into(),
                    textures: vec![
                        texture(TextureKind::Diffuse, "wood.png"),
                        texture(TextureKind::Normal, "flat_normal.png"),
                    ],
                },
                ImportedMaterial {
                    name: "painted wood".into(),
                    textures: vec![
                        texture(TextureKind::Diffuse, "paint.png"),
                        texture(TextureKind::Normal, "flat_normal.png"),
                    ],
                },
            ],
            meshes: vec![
                ImportedMesh {
                    mesh: triangle("a"),
                    material: Some(1),
                    transform: Mat4::IDENTITY,
                },
                ImportedMesh {
                    mesh: triangle("b"),
                    material: None,
                    transform: Mat4::from_translation(glam::Vec3::X),
                },
            ],
        };

        let objects = load_model(&ctx, &mut assets, &model).unwrap();

        assert_eq!(assets.textures.len(), 3);
        let wood = assets.materials.get(MaterialId(0));
        let paint = assets.materials.get(MaterialId(1));
        assert_eq!(wood.normal, paint.normal);
        assert_ne!(wood.diffuse, paint.diffuse);
        assert!(wood.metallic_roughness.is_null());

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].mesh, MeshId(0));
        assert_eq!(objects[0].material, MaterialId(1));
        assert_eq!(objects[1].material, MaterialId(2));
        assert_eq!(*assets.materials.get(MaterialId(2)), Material::default());
        assert_eq!(objects[1].transform, Mat4::from_translation(glam::Vec3::X));

        // Loading again reuses every texture.
        load_model(&ctx, &mut assets, &model).unwrap();
        assert_eq!(assets.textures.len(), 3);
        assert_eq!(ctx.created(ResourceKind::Image), 1 + 3);

        assets.cleanup(ctx.backend());
        ctx.cleanup().unwrap();
        ctx.assert_all_released();
    }
}
