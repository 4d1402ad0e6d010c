use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use eren_render_vulkan_core::{
    backend::{GpuBackend, GpuBuffer, VertexInputLayout},
    context::{DeviceContext, DeviceContextError},
};
use thiserror::Error;

use crate::ids::{MeshId, next_id};

#[derive(Debug, Error)]
pub enum MeshCacheError {
    #[error("Mesh `{0}` has no vertices or no indices")]
    EmptyMesh(String),

    #[error("Failed to upload mesh: {0}")]
    Upload(#[from] DeviceContextError),
}

/// One vertex as the geometry shader reads it (binding 0, locations 0..=3).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    /// `w` is the bitangent sign.
    pub tangent: [f32; 4],
}

static VERTEX_ATTRIBUTES: [vk::VertexInputAttributeDescription; 4] = [
    vk::VertexInputAttributeDescription {
        location: 0,
        binding: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: offset_of!(Vertex, position) as u32,
    },
    vk::VertexInputAttributeDescription {
        location: 1,
        binding: 0,
        format: vk::Format::R32G32_SFLOAT,
        offset: offset_of!(Vertex, uv) as u32,
    },
    vk::VertexInputAttributeDescription {
        location: 2,
        binding: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: offset_of!(Vertex, normal) as u32,
    },
    vk::VertexInputAttributeDescription {
        location: 3,
        binding: 0,
        format: vk::Format::R32G32B32A32_SFLOAT,
        offset: offset_of!(Vertex, tangent) as u32,
    },
];

impl Vertex {
    pub fn input_layout() -> VertexInputLayout<'static> {
        VertexInputLayout {
            stride: size_of::<Vertex>() as u32,
            attributes: &VERTEX_ATTRIBUTES,
        }
    }
}

/// Mesh data as produced by an importer. Dropped once uploaded.
#[derive(Debug, Clone, Default)]
pub struct CpuMesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMesh {
    pub vertex_buffer: GpuBuffer,
    pub index_buffer: GpuBuffer,
    pub vertex_count: u32,
    pub index_count: u32,
}

#[derive(Debug, Default)]
pub struct MeshCache {
    meshes: Vec<GpuMesh>,
}

impl MeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads `mesh` into device-local vertex and index buffers.
    pub fn add<B: GpuBackend>(
        &mut self,
        ctx: &DeviceContext<B>,
        mesh: &CpuMesh,
    ) -> Result<MeshId, MeshCacheError> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(MeshCacheError::EmptyMesh(mesh.name.clone()));
        }

        let id = MeshId(next_id(self.meshes.len()));

        let vertex_buffer = ctx.upload_buffer(
            &format!("{} vertices", mesh.name),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&mesh.vertices),
        )?;
        let index_buffer = match ctx.upload_buffer(
            &format!("{} indices", mesh.name),
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&mesh.indices),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                ctx.destroy_buffer(vertex_buffer);
                return Err(e.into());
            }
        };

        self.meshes.push(GpuMesh {
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertices.len() as u32,
            index_count: mesh.indices.len() as u32,
        });

        log::debug!(
            "Mesh `{}` added as {id}: {} vertices, {} indices",
            mesh.name,
            mesh.vertices.len(),
            mesh.indices.len()
        );

        Ok(id)
    }

    /// Panics if `id` was not returned by this cache.
    pub fn get(&self, id: MeshId) -> &GpuMesh {
        match self.meshes.get(id.index()) {
            Some(mesh) => mesh,
            None => panic!("{id} out of range ({} meshes)", self.meshes.len()),
        }
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Destroys every mesh buffer. The GPU must be done with them.
    pub fn cleanup<B: GpuBackend>(self, backend: &B) {
        let count = self.meshes.len();
        for mesh in self.meshes.into_iter().rev() {
            backend.destroy_buffer(mesh.index_buffer);
            backend.destroy_buffer(mesh.vertex_buffer);
        }
        if count > 0 {
            log::info!("Mesh cache released {count} meshes");
        }
    }
}

#[cfg(test)]
mod tests {
    use eren_render_vulkan_core::{
        backend::recording::{RecordingBackend, ResourceKind},
        config::ContextConfig,
    };

    use super::*;

    fn context() -> DeviceContext<RecordingBackend> {
        DeviceContext::new(RecordingBackend::new(), &ContextConfig::default()).unwrap()
    }

    fn quad() -> CpuMesh {
        let vertex = |x: f32, y: f32| Vertex {
            position: [x, y, 0.0],
            uv: [x, y],
            normal: [0.0, 0.0, 1.0],
            tangent: [1.0, 0.0, 0.0, 1.0],
        };
        CpuMesh {
            name: "quad".into(),
            vertices: vec![
                vertex(0.0, 0.0),
                vertex(1.0, 0.0),
                vertex(1.0, 1.0),
                vertex(0.0, 1.0),
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }

    #[test]
    fn vertex_layout_matches_the_shader_interface() {
        assert_eq!(size_of::<Vertex>(), 48);
        let layout = Vertex::input_layout();
        assert_eq!(layout.stride, 48);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20, 32]);
    }

    #[test]
    fn uploaded_mesh_round_trips() {
        let mut ctx = context();
        let mut cache = MeshCache::new();
        let mesh = quad();

        let id = cache.add(&ctx, &mesh).unwrap();
        let gpu = *cache.get(id);

        assert_eq!(gpu.index_count, 6);
        assert_eq!(gpu.vertex_buffer.size, 4 * size_of::<Vertex>() as u64);
        assert_eq!(
            ctx.read_buffer(gpu.vertex_buffer.handle),
            bytemuck::cast_slice::<Vertex, u8>(&mesh.vertices)
        );
        assert_eq!(
            ctx.read_buffer(gpu.index_buffer.handle),
            bytemuck::cast_slice::<u32, u8>(&mesh.indices)
        );

        cache.cleanup(ctx.backend());
        ctx.cleanup().unwrap();
        ctx.assert_all_released();
    }

    #[test]
    fn ids_start_at_zero_and_increase() {
        let mut ctx = context();
        let mut cache = MeshCache::new();

        let ids: Vec<_> = (0..3).map(|_| cache.add(&ctx, &quad()).unwrap()).collect();
        assert_eq!(ids, vec![MeshId(0), MeshId(1), MeshId(2)]);
        assert_eq!(cache.len(), 3);

        cache.cleanup(ctx.backend());
        // Two staging buffers and two mesh buffers per add.
        assert_eq!(ctx.created(ResourceKind::Buffer), 12);
        assert_eq!(ctx.destroyed(ResourceKind::Buffer), 12);
        ctx.cleanup().unwrap();
    }

    #[test]
    fn empty_meshes_are_rejected() {
        let ctx = context();
        let mut cache = MeshCache::new();
        let mesh = CpuMesh {
            indices: Vec::new(),
            ..quad()
        };

        assert!(matches!(
            cache.add(&ctx, &mesh),
            Err(MeshCacheError::EmptyMesh(name)) if name == "quad"
        ));
        assert!(cache.is_empty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn unknown_ids_panic() {
        MeshCache::new().get(MeshId(0));
    }
}
