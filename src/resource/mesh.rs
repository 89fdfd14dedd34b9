use std::mem::size_of;
use bytemuck::bytes_of;
use glam::{Vec3, Vec2};
use bitflags::bitflags;
use crate::{BufferKind, Color, DeviceError, GraphicsDevice, OwnedBuffer, VertexAttribute, VertexFormat, VertexLayout};

/**
 * CPU side geometry of a mesh.
 * Vertex attributes are stored in separate buffers, and interleaved on upload.
*/
#[derive(Clone, Default, Debug)]
pub struct MeshData {
    pub indices:    Vec<u32>,
    pub positions:  Vec<Vec3>,
    pub colors:     Option<Vec<Color>>,
    pub normals:    Option<Vec<Vec3>>,
    pub uvs:        Option<Vec<Vec2>>,
}

impl MeshData {
    pub const POSITION_LOCATION: u32    = 0;
    pub const COLOR_LOCATION: u32       = 1;
    pub const NORMAL_LOCATION: u32      = 2;
    pub const UV_LOCATION: u32          = 3;

    const POSITION_SIZE: usize          = size_of::<Vec3>();
    const COLOR_SIZE: usize             = size_of::<Color>();
    const NORMAL_SIZE: usize            = size_of::<Vec3>();
    const UV_SIZE: usize                = size_of::<Vec2>();

    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Which optional vertex attributes are present.
     */
    pub fn key(&self) -> MeshKey {
        let mut key = MeshKey::NONE;
        if self.colors.is_some() {
            key |= MeshKey::COLOR;
        }
        if self.normals.is_some() {
            key |= MeshKey::NORMAL;
        }
        if self.uvs.is_some() {
            key |= MeshKey::UV;
        }
        key
    }

    /**
     * Interleaves vertex data into a single packed byte array.
     */
    pub fn vertex_bytes(&self) -> Result<Vec<u8>, MeshError> {
        self.check_vertices()?;
        let mut vertex_data = Vec::with_capacity(self.vertex_count() * self.vertex_size());
        for i in 0..self.positions.len() {
            vertex_data.extend_from_slice(bytes_of(&self.positions[i]));
            if let Some(colors) = &self.colors {
                vertex_data.extend_from_slice(bytes_of(&colors[i]));
            }
            if let Some(normals) = &self.normals {
                vertex_data.extend_from_slice(bytes_of(&normals[i]));
            }
            if let Some(uvs) = &self.uvs {
                vertex_data.extend_from_slice(bytes_of(&uvs[i]));
            }
        }
        Ok(vertex_data)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Number of vertices stored.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Size of each vertex in bytes.
    pub fn vertex_size(&self) -> usize {
        let mut size = MeshData::POSITION_SIZE;
        if self.colors.is_some() {
            size += MeshData::COLOR_SIZE;
        }
        if self.normals.is_some() {
            size += MeshData::NORMAL_SIZE;
        }
        if self.uvs.is_some() {
            size += MeshData::UV_SIZE;
        }
        size
    }

    // Checks that vertex buffers all have the same length, and that indices are in range.
    fn check_vertices(&self) -> Result<(), MeshError> {
        let num_vertices = self.positions.len();
        let lengths = [
            self.colors.as_ref().map(Vec::len),
            self.normals.as_ref().map(Vec::len),
            self.uvs.as_ref().map(Vec::len),
        ];
        if lengths.into_iter().flatten().any(|len| len != num_vertices) {
            return Err(MeshError::AttributeLengthMismatch);
        }
        if self.indices.iter().any(|index| *index as usize >= num_vertices) {
            return Err(MeshError::IndexOutOfRange);
        }
        Ok(())
    }
}

bitflags! {
    /// Determines the "permutation" of a mesh.
    /// These are flags that determine which vertex attributes are available in a given mesh.
    #[derive(Copy, Clone, Eq, PartialEq, Default, Debug, Hash)]
    pub struct MeshKey: u8 {
        const NONE      = 0b00000000;
        const COLOR     = 0b00000001;
        const NORMAL    = 0b00000010;
        const UV        = 0b00000100;
    }
}

impl MeshKey {
    /**
     * Vertex layout of an interleaved mesh with this key.
     * Defs describing the optional attributes are pushed so programs can be preprocessed to match.
     */
    pub fn layout(self, defs: &mut Vec<String>) -> VertexLayout {
        let mut layout = VertexLayout::default();
        let mut offset = 0;
        let mut push = |format: VertexFormat, location: u32| {
            layout.attributes.push(VertexAttribute { format, offset, location });
            offset += format.size();
        };
        push(VertexFormat::Float32x3, MeshData::POSITION_LOCATION);
        if self.contains(Self::COLOR) {
            push(VertexFormat::Float32x4, MeshData::COLOR_LOCATION);
            defs.push(String::from("COLOR"));
        }
        if self.contains(Self::NORMAL) {
            push(VertexFormat::Float32x3, MeshData::NORMAL_LOCATION);
            defs.push(String::from("NORMAL"));
        }
        if self.contains(Self::UV) {
            push(VertexFormat::Float32x2, MeshData::UV_LOCATION);
            defs.push(String::from("UV"));
        }
        layout.stride = offset;
        layout
    }
}

/// GPU representation of [`MeshData`]. Its buffers are released when dropped.
#[derive(Debug)]
pub struct Mesh {
    pub(crate) vertices: OwnedBuffer,
    pub(crate) indices: OwnedBuffer,
    pub(crate) num_indices: u32,
    pub(crate) stride: u32,
    pub(crate) key: MeshKey,
}

impl Mesh {

    pub fn from_data(data: &MeshData, device: &mut dyn GraphicsDevice) -> Result<Self, MeshError> {
        let vertex_bytes = data.vertex_bytes()?;
        Ok(Self {
            vertices: OwnedBuffer::create(BufferKind::Vertex, &vertex_bytes, device)?,
            indices: OwnedBuffer::create(BufferKind::Index, data.index_bytes(), device)?,
            num_indices: data.indices.len() as u32,
            stride: data.vertex_size() as u32,
            key: data.key(),
        })
    }

    pub fn num_indices(&self) -> u32 {
        self.num_indices
    }

    pub fn key(&self) -> MeshKey {
        self.key
    }
}

#[derive(derive_more::Error, derive_more::Display, derive_more::From, Debug, Clone, Eq, PartialEq)]
pub enum MeshError {
    #[display(fmt="Vertex attribute buffers have different lengths")]
    #[from(ignore)]
    AttributeLengthMismatch,
    #[display(fmt="Index refers to a vertex that does not exist")]
    #[from(ignore)]
    IndexOutOfRange,
    #[display(fmt="{_0}")]
    Device(DeviceError),
}
