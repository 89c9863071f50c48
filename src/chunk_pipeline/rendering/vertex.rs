//! Vertex format of chunk meshes.
//!
//! Positions are chunk-local in voxel units: logical voxel `i` sits at `i`, and
//! the renderer places the mesh at `coordinate * chunk_size`.

use crate::chunk_pipeline::voxels::voxel_cell::MaterialId;

/// A vertex of a chunk surface.
///
/// # Memory Layout
/// - Position: [f32; 3] (12 bytes)
/// - Normal: [f32; 3] (12 bytes)
/// - Color: [u8; 4] (4 bytes)
/// - Texture Coordinates: [f32; 2] (8 bytes)
///
/// Total size: 36 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ChunkVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [u8; 4],
    pub uv: [f32; 2],
}

impl ChunkVertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], material_id: MaterialId, uv: [f32; 2]) -> Self {
        ChunkVertex {
            position,
            normal,
            color: material_color(material_id),
            uv,
        }
    }

    /// Returns the vertex buffer layout description for the shader pipeline.
    ///
    /// # Shader Attributes
    /// - `location = 0`: position (vec3<f32>)
    /// - `location = 1`: normal (vec3<f32>)
    /// - `location = 2`: color (vec4<f32>, normalized from u8)
    /// - `location = 3`: uv (vec2<f32>)
    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ChunkVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Unorm8x4,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 7]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Debug color for a cell material. Isosurface and block materials share the table.
pub fn material_color(material_id: MaterialId) -> [u8; 4] {
    const PALETTE: [[u8; 4]; 6] = [
        [200, 200, 200, 255],
        [110, 160, 70, 255],
        [130, 125, 120, 255],
        [150, 110, 70, 255],
        [210, 190, 130, 255],
        [70, 110, 180, 255],
    ];
    PALETTE[material_id.unsigned_abs() as usize % PALETTE.len()]
}
