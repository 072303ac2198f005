use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use uuid::Uuid;

/// Identity of a [`Mesh`] instance. Registry entries are keyed by it, so
/// every node holding the same `Arc<Mesh>` shares one set of GPU buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(Uuid);

/// Interleaved vertex layout uploaded to vertex buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    #[must_use]
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Triangle mesh data
///
/// CPU-side only. Not `Clone`: a copy would need a new identity, use
/// `Arc<Mesh>` to share one mesh between nodes.
#[derive(Debug)]
pub struct Mesh {
    id: MeshId,
    pub name: String,

    pub positions: Vec<[f32; 3]>,
    /// Same length as `positions`, or empty.
    pub normals: Vec<[f32; 3]>,
    /// Same length as `positions`, or empty.
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl Mesh {
    #[must_use]
    pub fn new(name: impl Into<String>, positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            id: MeshId(Uuid::new_v4()),
            name: name.into(),
            positions,
            normals: Vec::new(),
            uvs: Vec::new(),
            indices,
        }
    }

    #[must_use]
    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = normals;
        self
    }

    #[must_use]
    pub fn with_uvs(mut self, uvs: Vec<[f32; 2]>) -> Self {
        self.uvs = uvs;
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> MeshId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// True if there is nothing to upload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.indices.is_empty()
    }

    /// Vertices in upload layout. Missing normals or uvs become zero.
    #[must_use]
    pub fn interleaved(&self) -> Vec<Vertex> {
        self.positions
            .iter()
            .enumerate()
            .map(|(i, &position)| Vertex {
                position,
                normal: self.normals.get(i).copied().unwrap_or_default(),
                uv: self.uvs.get(i).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// Triangles in model space. Indices past the vertex array are skipped.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            let corner = |i: u32| self.positions.get(i as usize).map(|&p| Vec3::from(p));
            Some([corner(tri[0])?, corner(tri[1])?, corner(tri[2])?])
        })
    }
}
