use ash::vk;

use crate::backend::{DescriptorBinding, GpuBackend, GpuError, ImageDescriptorWrite};

pub const BINDLESS_TEXTURE_BINDING: u32 = 0;
pub const DEFAULT_BINDLESS_CAPACITY: u32 = 1024;

/// One descriptor set holding a partially bound array of combined image
/// samplers. Shaders index it with a texture id.
#[derive(Debug)]
pub struct BindlessTextures {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    capacity: u32,
}

impl BindlessTextures {
    pub fn new<B: GpuBackend>(backend: &B, capacity: u32) -> Result<Self, GpuError> {
        let layout = backend.create_descriptor_set_layout(&[DescriptorBinding {
            binding: BINDLESS_TEXTURE_BINDING,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: capacity,
            stages: vk::ShaderStageFlags::FRAGMENT,
            bindless: true,
        }])?;

        let pool = match backend.create_descriptor_pool(
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: capacity,
            }],
            1,
            true,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                backend.destroy_descriptor_set_layout(layout);
                return Err(e);
            }
        };

        let set = match backend.allocate_descriptor_set(pool, layout) {
            Ok(set) => set,
            Err(e) => {
                backend.destroy_descriptor_pool(pool);
                backend.destroy_descriptor_set_layout(layout);
                return Err(e);
            }
        };

        log::debug!("Bindless texture set created with {capacity} slots");

        Ok(Self {
            layout,
            pool,
            set,
            capacity,
        })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Points slot `index` at `view`. Panics past the array capacity.
    pub fn write<B: GpuBackend>(
        &self,
        backend: &B,
        index: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) {
        assert!(
            index < self.capacity,
            "bindless slot {index} out of range (capacity {})",
            self.capacity
        );
        backend.write_image_descriptor(&ImageDescriptorWrite {
            set: self.set,
            binding: BINDLESS_TEXTURE_BINDING,
            array_element: index,
            view,
            sampler,
            layout,
        });
    }

    /// Frees the pool (and with it the set) and the layout.
    pub fn destroy<B: GpuBackend>(self, backend: &B) {
        backend.destroy_descriptor_pool(self.pool);
        backend.destroy_descriptor_set_layout(self.layout);
    }
}
