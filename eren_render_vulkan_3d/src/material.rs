use std::mem::size_of;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use eren_render_vulkan_core::{
    backend::{GpuBackend, GpuBuffer},
    context::{DeviceContext, DeviceContextError},
};
use thiserror::Error;

use crate::ids::{MaterialId, TextureId, next_id};

#[derive(Debug, Error)]
pub enum MaterialCacheError {
    #[error("Material buffer has already been uploaded")]
    AlreadyUploaded,

    #[error("Failed to upload material buffer: {0}")]
    Upload(#[from] DeviceContextError),
}

/// Which texture slot of a [`Material`] an image feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Diffuse,
    Normal,
    MetallicRoughness,
    Emissive,
}

impl TextureKind {
    pub const ALL: [TextureKind; 4] = [
        TextureKind::Diffuse,
        TextureKind::Normal,
        TextureKind::MetallicRoughness,
        TextureKind::Emissive,
    ];

    /// Colour textures are stored sRGB; data textures stay linear.
    pub fn is_srgb(self) -> bool {
        matches!(self, TextureKind::Diffuse | TextureKind::Emissive)
    }
}

/// GPU layout of one material: four bindless texture slots.
///
/// The material buffer is a tightly packed array of these indexed by
/// [`MaterialId`]. `TextureId::NULL` means the shader uses its fallback.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Material {
    pub diffuse: TextureId,
    pub normal: TextureId,
    pub metallic_roughness: TextureId,
    pub emissive: TextureId,
}

impl Material {
    pub fn texture(&self, kind: TextureKind) -> TextureId {
        match kind {
            TextureKind::Diffuse => self.diffuse,
            TextureKind::Normal => self.normal,
            TextureKind::MetallicRoughness => self.metallic_roughness,
            TextureKind::Emissive => self.emissive,
        }
    }

    pub fn set_texture(&mut self, kind: TextureKind, id: TextureId) {
        match kind {
            TextureKind::Diffuse => self.diffuse = id,
            TextureKind::Normal => self.normal = id,
            TextureKind::MetallicRoughness => self.metallic_roughness = id,
            TextureKind::Emissive => self.emissive = id,
        }
    }
}

/// CPU list of materials, frozen into one read-only device buffer by
/// [`Self::upload`] once loading is done.
#[derive(Debug, Default)]
pub struct MaterialCache {
    materials: Vec<Material>,
    buffer: Option<GpuBuffer>,
    uploaded: bool,
}

impl MaterialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics once the buffer has been uploaded.
    pub fn add(&mut self, material: Material) -> MaterialId {
        assert!(!self.uploaded, "material added after the buffer was uploaded");

        let id = MaterialId(next_id(self.materials.len()));
        self.materials.push(material);
        log::debug!("Material {id} added: {material:?}");
        id
    }

    /// Panics if `id` was not returned by this cache.
    pub fn get(&self, id: MaterialId) -> &Material {
        match self.materials.get(id.index()) {
            Some(material) => material,
            None => panic!("{id} out of range ({} materials)", self.materials.len()),
        }
    }

    /// Every material in id order, as the shader sees them.
    pub fn get_material_data(&self) -> &[u8] {
        bytemuck::cast_slice(&self.materials)
    }

    pub fn get_count(&self) -> u32 {
        self.materials.len() as u32
    }

    /// Copies all materials into a device-local storage buffer and returns
    /// its device address. Only one upload is allowed.
    pub fn upload<B: GpuBackend>(
        &mut self,
        ctx: &DeviceContext<B>,
    ) -> Result<vk::DeviceAddress, MaterialCacheError> {
        if self.uploaded {
            return Err(MaterialCacheError::AlreadyUploaded);
        }

        if self.materials.is_empty() {
            log::warn!("No materials loaded; material buffer address is 0");
            self.uploaded = true;
            return Ok(0);
        }

        let buffer = ctx.upload_buffer(
            "materials",
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            self.get_material_data(),
        )?;
        self.buffer = Some(buffer);
        self.uploaded = true;

        log::info!(
            "Uploaded {} materials ({} bytes)",
            self.materials.len(),
            self.materials.len() * size_of::<Material>()
        );
        Ok(buffer.address())
    }

    /// 0 until [`Self::upload`] has run with at least one material.
    pub fn address(&self) -> vk::DeviceAddress {
        self.buffer.map_or(0, |buffer| buffer.address())
    }

    pub fn buffer(&self) -> Option<&GpuBuffer> {
        self.buffer.as_ref()
    }

    pub fn cleanup<B: GpuBackend>(self, backend: &B) {
        if let Some(buffer) = self.buffer {
            backend.destroy_buffer(buffer);
        }
    }
}
