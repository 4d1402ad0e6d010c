use std::{borrow::Cow, collections::HashMap};

use ash::vk;
use eren_render_vulkan_core::{
    backend::{GpuBackend, GpuError, GpuImage, ImageDesc},
    context::{DeviceContext, DeviceContextError},
    descriptors::BindlessTextures,
};
use thiserror::Error;

use crate::ids::{TextureId, next_id};

#[derive(Debug, Error)]
pub enum TextureCacheError {
    #[error("No texture named `{0}` has been loaded")]
    UnknownName(String),

    #[error("Texture `{name}` has {channels} channels; only 1 to 4 are supported")]
    UnsupportedChannelCount { name: String, channels: u8 },

    #[error("Texture `{name}` should hold {expected} bytes of pixels but holds {actual}")]
    PixelSizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Texture `{name}` does not fit in the bindless array ({capacity} slots)")]
    CapacityExceeded { name: String, capacity: u32 },

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("Failed to upload texture: {0}")]
    Upload(#[from] DeviceContextError),
}

/// Decoded, tightly packed 8-bit pixels.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Colour data (diffuse, emissive) is sampled as sRGB.
    pub srgb: bool,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn solid(rgba: [u8; 4], srgb: bool) -> Self {
        Self {
            width: 1,
            height: 1,
            channels: 4,
            srgb,
            pixels: rgba.to_vec(),
        }
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuTexture {
    pub name: String,
    pub image: GpuImage,
    pub render_target: bool,
}

/// Picks the upload format for `data`, widening RGB to RGBA since
/// three-channel 8-bit formats are rarely sampleable.
fn upload_format<'a>(
    name: &str,
    data: &'a TextureData,
) -> Result<(vk::Format, Cow<'a, [u8]>), TextureCacheError> {
    let expected = data.width as usize * data.height as usize * data.channels as usize;
    if !(1..=4).contains(&data.channels) {
        return Err(TextureCacheError::UnsupportedChannelCount {
            name: name.to_string(),
            channels: data.channels,
        });
    }
    if data.pixels.len() != expected {
        return Err(TextureCacheError::PixelSizeMismatch {
            name: name.to_string(),
            expected,
            actual: data.pixels.len(),
        });
    }

    let rgba = if data.srgb {
        vk::Format::R8G8B8A8_SRGB
    } else {
        vk::Format::R8G8B8A8_UNORM
    };

    Ok(match data.channels {
        1 => (vk::Format::R8_UNORM, Cow::Borrowed(&data.pixels[..])),
        2 => (vk::Format::R8G8_UNORM, Cow::Borrowed(&data.pixels[..])),
        3 => {
            let mut expanded = Vec::with_capacity(data.pixels.len() / 3 * 4);
            for rgb in data.pixels.chunks_exact(3) {
                expanded.extend_from_slice(rgb);
                expanded.push(u8::MAX);
            }
            (rgba, Cow::Owned(expanded))
        }
        _ => (rgba, Cow::Borrowed(&data.pixels[..])),
    })
}

/// Sampled images and render targets, addressed by [`TextureId`].
///
/// A texture's id is also its slot in the bindless array, so shaders index
/// `textures[id]` directly. Names are unique: callers check [`Self::is_loaded`]
/// before decoding and adding, and adding a name twice panics.
#[derive(Debug)]
pub struct TextureCache {
    textures: Vec<GpuTexture>,
    ids_by_name: HashMap<String, TextureId>,
    bindless: BindlessTextures,
    sampler: vk::Sampler,
}

impl TextureCache {
    pub fn new<B: GpuBackend>(backend: &B, capacity: u32) -> Result<Self, GpuError> {
        let bindless = BindlessTextures::new(backend, capacity)?;
        let sampler = match backend.create_sampler(vk::Filter::LINEAR) {
            Ok(sampler) => sampler,
            Err(e) => {
                bindless.destroy(backend);
                return Err(e);
            }
        };

        Ok(Self {
            textures: Vec::new(),
            ids_by_name: HashMap::new(),
            bindless,
            sampler,
        })
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.ids_by_name.contains_key(name)
    }

    pub fn get_id_by_name(&self, name: &str) -> Result<TextureId, TextureCacheError> {
        self.ids_by_name
            .get(name)
            .copied()
            .ok_or_else(|| TextureCacheError::UnknownName(name.to_string()))
    }

    /// Uploads `data` and publishes it in the bindless array.
    ///
    /// Panics if `name` is already loaded.
    pub fn add<B: GpuBackend>(
        &mut self,
        ctx: &DeviceContext<B>,
        name: &str,
        data: &TextureData,
    ) -> Result<TextureId, TextureCacheError> {
        let id = self.reserve(name)?;
        let (format, pixels) = upload_format(name, data)?;

        let image = ctx.upload_image(
            &ImageDesc {
                name,
                format,
                extent: data.extent(),
                usage: vk::ImageUsageFlags::SAMPLED,
                aspect: vk::ImageAspectFlags::COLOR,
            },
            &pixels,
        )?;

        self.publish(ctx.backend(), id, name, image, false);
        log::debug!(
            "Texture `{name}` added as {id}: {}x{} {format:?}",
            data.width,
            data.height
        );
        Ok(id)
    }

    /// Creates a colour attachment that later stages sample through the
    /// bindless array. Its contents are undefined until first rendered.
    ///
    /// Panics if `name` is already loaded.
    pub fn add_render_target<B: GpuBackend>(
        &mut self,
        backend: &B,
        name: &str,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<TextureId, TextureCacheError> {
        let id = self.reserve(name)?;
        let image = backend.create_image(&ImageDesc {
            name,
            format,
            extent,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
        })?;

        self.publish(backend, id, name, image, true);
        log::debug!(
            "Render target `{name}` added as {id}: {}x{} {format:?}",
            extent.width,
            extent.height
        );
        Ok(id)
    }

    fn reserve(&self, name: &str) -> Result<TextureId, TextureCacheError> {
        assert!(
            !self.is_loaded(name),
            "texture `{name}` already loaded; check is_loaded before add"
        );

        let id = TextureId(next_id(self.textures.len()));
        if id.0 >= self.bindless.capacity() {
            return Err(TextureCacheError::CapacityExceeded {
                name: name.to_string(),
                capacity: self.bindless.capacity(),
            });
        }
        Ok(id)
    }

    fn publish<B: GpuBackend>(
        &mut self,
        backend: &B,
        id: TextureId,
        name: &str,
        image: GpuImage,
        render_target: bool,
    ) {
        self.bindless.write(
            backend,
            id.0,
            image.view,
            self.sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        self.textures.push(GpuTexture {
            name: name.to_string(),
            image,
            render_target,
        });
        self.ids_by_name.insert(name.to_string(), id);
    }

    /// Panics if `id` was not returned by this cache.
    pub fn get(&self, id: TextureId) -> &GpuTexture {
        match self.textures.get(id.index()) {
            Some(texture) => texture,
            None => panic!("{id} out of range ({} textures)", self.textures.len()),
        }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn bindless_layout(&self) -> vk::DescriptorSetLayout {
        self.bindless.layout()
    }

    pub fn bindless_set(&self) -> vk::DescriptorSet {
        self.bindless.set()
    }

    /// Destroys every image, the sampler and the bindless set.
    pub fn cleanup<B: GpuBackend>(self, backend: &B) {
        let count = self.textures.len();
        for texture in self.textures.into_iter().rev() {
            backend.destroy_image(texture.image);
        }
        backend.destroy_sampler(self.sampler);
        self.bindless.destroy(backend);
        log::info!("Texture cache released {count} textures");
    }
}

#[cfg(test)]
mod tests {
    use eren_render_vulkan_core::{
        backend::recording::{Event, RecordingBackend, ResourceKind},
        config::ContextConfig,
    };

    use super::*;

    fn context() -> DeviceContext<RecordingBackend> {
        DeviceContext::new(RecordingBackend::new(), &ContextConfig::default()).unwrap()
    }

    fn checker(channels: u8) -> TextureData {
        TextureData {
            width: 2,
            height: 2,
            channels,
            srgb: false,
            pixels: vec![128; 4 * channels as usize],
        }
    }

    #[test]
    fn name_lookup_follows_add() {
        let mut ctx = context();
        let mut cache = TextureCache::new(ctx.backend(), 16).unwrap();

        assert!(!cache.is_loaded("bricks.png"));
        let id = cache.add(&ctx, "bricks.png", &checker(4)).unwrap();
        assert!(cache.is_loaded("bricks.png"));
        assert_eq!(cache.get_id_by_name("bricks.png").unwrap(), id);
        assert_eq!(id, TextureId(0));
        assert_eq!(cache.get(id).name, "bricks.png");

        cache.cleanup(ctx.backend());
        ctx.cleanup().unwrap();
        ctx.assert_all_released();
    }

    #[test]
    fn unknown_names_are_an_error() {
        let backend = RecordingBackend::new();
        let cache = TextureCache::new(&backend, 4).unwrap();

        assert!(matches!(
            cache.get_id_by_name("missing.png"),
            Err(TextureCacheError::UnknownName(name)) if name == "missing.png"
        ));
        cache.cleanup(&backend);
    }

    #[test]
    #[should_panic(expected = "already loaded")]
    fn adding_a_name_twice_panics() {
        let ctx = context();
        let mut cache = TextureCache::new(ctx.backend(), 4).unwrap();
        cache.add(&ctx, "a.png", &checker(4)).unwrap();
        let _ = cache.add(&ctx, "a.png", &checker(4));
    }

    #[test]
    fn texture_ids_are_bindless_slots() {
        let mut ctx = context();
        let mut cache = TextureCache::new(ctx.backend(), 4).unwrap();
        ctx.clear_events();

        let first = cache.add(&ctx, "a.png", &checker(1)).unwrap();
        let second = cache
            .add_render_target(
                ctx.backend(),
                "gbuffer.albedo",
                vk::Format::R8G8B8A8_UNORM,
                vk::Extent2D {
                    width: 8,
                    height: 8,
                },
            )
            .unwrap();

        let slots: Vec<(u32, vk::ImageView)> = ctx
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::WriteImageDescriptor {
                    array_element,
                    view,
                    ..
                } => Some((array_element, view)),
                _ => None,
            })
            .collect();
        assert_eq!(
            slots,
            vec![
                (first.0, cache.get(first).image.view),
                (second.0, cache.get(second).image.view)
            ]
        );
        assert!(cache.get(second).render_target);

        cache.cleanup(ctx.backend());
        ctx.cleanup().unwrap();
        ctx.assert_all_released();
    }

    #[test]
    fn channel_counts_map_to_formats() {
        let img = checker(1);
        let (format, pixels) = upload_format("r", &img).unwrap();
        assert_eq!(format, vk::Format::R8_UNORM);
        assert_eq!(pixels.len(), 4);

        let (format, _) = upload_format("rg", &checker(2)).unwrap();
        assert_eq!(format, vk::Format::R8G8_UNORM);

        let srgb = TextureData {
            srgb: true,
            ..checker(4)
        };
        let (format, _) = upload_format("rgba", &srgb).unwrap();
        assert_eq!(format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn rgb_is_widened_to_rgba() {
        let data = TextureData {
            width: 2,
            height: 1,
            channels: 3,
            srgb: false,
            pixels: vec![1, 2, 3, 4, 5, 6],
        };
        let (format, pixels) = upload_format("rgb", &data).unwrap();
        assert_eq!(format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(&pixels[..], &[1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn malformed_pixel_data_is_rejected() {
        assert!(matches!(
            upload_format("five", &checker(5)),
            Err(TextureCacheError::UnsupportedChannelCount { channels: 5, .. })
        ));

        let short = TextureData {
            pixels: vec![0; 3],
            ..checker(4)
        };
        assert!(matches!(
            upload_format("short", &short),
            Err(TextureCacheError::PixelSizeMismatch {
                expected: 16,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn full_bindless_array_is_reported() {
        let mut ctx = context();
        let mut cache = TextureCache::new(ctx.backend(), 1).unwrap();
        cache.add(&ctx, "a.png", &checker(4)).unwrap();

        assert!(matches!(
            cache.add(&ctx, "b.png", &checker(4)),
            Err(TextureCacheError::CapacityExceeded { capacity: 1, .. })
        ));
        assert!(!cache.is_loaded("b.png"));

        cache.cleanup(ctx.backend());
        ctx.cleanup().unwrap();
        assert_eq!(
            ctx.created(ResourceKind::Image),
            ctx.destroyed(ResourceKind::Image)
        );
    }
}
