use std::{collections::HashMap, path::Path, sync::Arc};

use glam::Mat4;
use gltf::image::{Data as ImageData, Format, Source};
use thiserror::Error;

use crate::{
    assets::{ImportedMaterial, ImportedMesh, ImportedModel, TextureRef},
    material::TextureKind,
    mesh::{CpuMesh, Vertex},
    texture::TextureData,
};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read glTF file: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("`{0}` contains no scene")]
    NoScene(String),

    #[error("Primitive of mesh `{mesh}` has no {attribute}")]
    MissingAttribute {
        mesh: String,
        attribute: &'static str,
    },

    #[error("Image `{name}` uses unsupported pixel format {format:?}")]
    UnsupportedImageFormat { name: String, format: Format },
}

struct Importer<'a> {
    model_name: String,
    source_key: String,
    buffers: &'a [gltf::buffer::Data],
    images: &'a [ImageData],
    decoded: HashMap<(usize, bool), Arc<TextureData>>,
    meshes: Vec<ImportedMesh>,
}

/// Reads a glTF/GLB file into CPU records. Every primitive of every node in
/// the default scene becomes one [`ImportedMesh`] with its world transform
/// baked in.
pub fn import_gltf(path: impl AsRef<Path>) -> Result<ImportedModel, ImportError> {
    let path = path.as_ref();
    let (document, buffers, images) = gltf::import(path)?;

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| ImportError::NoScene(path.display().to_string()))?;

    let mut importer = Importer {
        model_name: path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string()),
        source_key: path.display().to_string(),
        buffers: &buffers,
        images: &images,
        decoded: HashMap::new(),
        meshes: Vec::new(),
    };

    let materials = document
        .materials()
        .map(|material| importer.material(&material))
        .collect::<Result<Vec<_>, _>>()?;

    for node in scene.nodes() {
        importer.visit(&node, Mat4::IDENTITY)?;
    }

    log::info!(
        "Imported `{}`: {} meshes, {} materials, {} images",
        path.display(),
        importer.meshes.len(),
        materials.len(),
        importer.decoded.len()
    );

    Ok(ImportedModel {
        name: importer.model_name,
        meshes: importer.meshes,
        materials,
    })
}

impl Importer<'_> {
    fn visit(&mut self, node: &gltf::Node<'_>, parent: Mat4) -> Result<(), ImportError> {
        let transform = parent * Mat4::from_cols_array_2d(&node.transform().matrix());

        if let Some(mesh) = node.mesh() {
            let mesh_name = mesh
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}#mesh{}", self.model_name, mesh.index()));

            for primitive in mesh.primitives() {
                let name = format!("{mesh_name}#{}", primitive.index());
                self.meshes.push(ImportedMesh {
                    mesh: self.primitive(name, &primitive)?,
                    material: primitive.material().index(),
                    transform,
                });
            }
        }

        for child in node.children() {
            self.visit(&child, transform)?;
        }
        Ok(())
    }

    fn primitive(
        &self,
        name: String,
        primitive: &gltf::Primitive<'_>,
    ) -> Result<CpuMesh, ImportError> {
        let reader = primitive.reader(|buffer| Some(&self.buffers[buffer.index()]));

        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .ok_or_else(|| ImportError::MissingAttribute {
                mesh: name.clone(),
                attribute: "positions",
            })?
            .collect();
        let count = positions.len();

        let normals: Vec<[f32; 3]> = reader
            .read_normals()
            .map(|normals| normals.collect())
            .unwrap_or_else(|| vec![[0.0, 0.0, 1.0]; count]);
        let uvs: Vec<[f32; 2]> = reader
            .read_tex_coords(0)
            .map(|uvs| uvs.into_f32().collect())
            .unwrap_or_else(|| vec![[0.0, 0.0]; count]);
        let tangents: Vec<[f32; 4]> = reader
            .read_tangents()
            .map(|tangents| tangents.collect())
            .unwrap_or_else(|| vec![[1.0, 0.0, 0.0, 1.0]; count]);

        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, position)| Vertex {
                position: *position,
                uv: uvs.get(i).copied().unwrap_or_default(),
                normal: normals.get(i).copied().unwrap_or([0.0, 0.0, 1.0]),
                tangent: tangents.get(i).copied().unwrap_or([1.0, 0.0, 0.0, 1.0]),
            })
            .collect();

        // Unindexed primitives draw their vertices in order.
        let indices = reader
            .read_indices()
            .map(|indices| indices.into_u32().collect())
            .unwrap_or_else(|| (0..count as u32).collect());

        Ok(CpuMesh {
            name,
            vertices,
            indices,
        })
    }

    fn material(&mut self, material: &gltf::Material<'_>) -> Result<ImportedMaterial, ImportError> {
        let pbr = material.pbr_metallic_roughness();
        let slots = [
            (
                TextureKind::Diffuse,
                pbr.base_color_texture().map(|info| info.texture()),
            ),
            (
                TextureKind::Normal,
                material.normal_texture().map(|info| info.texture()),
            ),
            (
                TextureKind::MetallicRoughness,
                pbr.metallic_roughness_texture().map(|info| info.texture()),
            ),
            (
                TextureKind::Emissive,
                material.emissive_texture().map(|info| info.texture()),
            ),
        ];

        let mut textures = Vec::new();
        for (kind, texture) in slots {
            if let Some(texture) = texture {
                textures.push(self.texture(kind, &texture.source())?);
            }
        }

        Ok(ImportedMaterial {
            name: material
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}#material", self.model_name)),
            textures,
        })
    }

    fn texture(
        &mut self,
        kind: TextureKind,
        image: &gltf::Image<'_>,
    ) -> Result<TextureRef, ImportError> {
        let srgb = kind.is_srgb();
        let base = match image.source() {
            Source::Uri { uri, .. } => uri.to_string(),
            Source::View { .. } => format!("{}#image{}", self.source_key, image.index()),
        };
        // The same image sampled as colour and as data is two textures.
        let name = if srgb { base } else { format!("{base}#linear") };

        let data = match self.decoded.get(&(image.index(), srgb)) {
            Some(data) => Arc::clone(data),
            None => {
                let data = Arc::new(texture_data(&name, &self.images[image.index()], srgb)?);
                self.decoded.insert((image.index(), srgb), Arc::clone(&data));
                data
            }
        };

        Ok(TextureRef { kind, name, data })
    }
}

fn texture_data(name: &str, image: &ImageData, srgb: bool) -> Result<TextureData, ImportError> {
    let channels = match image.format {
        Format::R8 => 1,
        Format::R8G8 => 2,
        Format::R8G8B8 => 3,
        Format::R8G8B8A8 => 4,
        format => {
            return Err(ImportError::UnsupportedImageFormat {
                name: name.to_string(),
                format,
            });
        }
    };

    Ok(TextureData {
        width: image.width,
        height: image.height,
        channels,
        srgb,
        pixels: image.pixels.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    /// One triangle under a translated parent node, with embedded buffers.
    fn write_triangle_gltf(dir: &Path) -> std::path::PathBuf {
        let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let indices: [u16; 3] = [0, 1, 2];
        let mut bytes: Vec<u8> = bytemuck::cast_slice(&positions).to_vec();
        bytes.extend_from_slice(bytemuck::cast_slice(&indices));
        bytes.extend_from_slice(&[0, 0]);
        fs::write(dir.join("triangle.bin"), &bytes).unwrap();

        let json = r#"{
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [
                { "translation": [0.0, 2.0, 0.0], "children": [1] },
                { "mesh": 0, "scale": [2.0, 2.0, 2.0] }
            ],
            "meshes": [{
                "name": "tri",
                "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1 }]
            }],
            "buffers": [{ "uri": "triangle.bin", "byteLength": 44 }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
            ],
            "accessors": [
                {
                    "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                    "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
                },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
            ]
        }"#;
        let path = dir.join("triangle.gltf");
        fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn imports_meshes_with_baked_transforms() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_triangle_gltf(dir.path());

        let model = import_gltf(&path).unwrap();

        assert_eq!(model.name, "triangle");
        assert_eq!(model.meshes.len(), 1);
        assert!(model.materials.is_empty());

        let imported = &model.meshes[0];
        assert_eq!(imported.mesh.name, "tri#0");
        assert_eq!(imported.mesh.indices, vec![0, 1, 2]);
        assert_eq!(imported.mesh.vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(imported.mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(imported.material, None);

        let world = imported.transform.transform_point3(glam::Vec3::X);
        assert_eq!(world, glam::Vec3::new(2.0, 2.0, 0.0));
    }

    #[test]
    fn missing_files_are_import_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            import_gltf(dir.path().join("absent.gltf")),
            Err(ImportError::Gltf(_))
        ));
    }

    #[test]
    fn only_eight_bit_images_are_accepted() {
        let image = ImageData {
            pixels: vec![0; 12],
            format: Format::R8G8B8,
            width: 2,
            height: 2,
        };
        let data = texture_data("rgb", &image, true).unwrap();
        assert_eq!((data.channels, data.srgb), (3, true));

        let wide = ImageData {
            pixels: vec![0; 8],
            format: Format::R16,
            width: 2,
            height: 2,
        };
        assert!(matches!(
            texture_data("wide", &wide, false),
            Err(ImportError::UnsupportedImageFormat { .. })
        ));
    }
}
