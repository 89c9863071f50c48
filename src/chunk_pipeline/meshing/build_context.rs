//! Scratch state of one mesh build slot.
//!
//! A context is reused across builds. `reset` clears every buffer but keeps
//! their allocations, so a warmed-up slot builds without reallocating.

use cgmath::Vector3;

use crate::chunk_pipeline::rendering::{ChunkVertex, MeshDescription, SubMesh};
use crate::chunk_pipeline::voxels::chunk::ChunkKey;
use crate::chunk_pipeline::voxels::volume::PaddedGrid;

use super::skirts::SkirtMask;
use super::MeshStats;

/// Marks a dual cell without a vertex.
pub const EMPTY_CELL: u32 = u32::MAX;

#[derive(Clone, Debug, Default)]
pub struct MeshBuffers {
    pub vertices: Vec<ChunkVertex>,
    pub indices: Vec<u32>,
}

impl MeshBuffers {
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

pub struct MeshBuildContext {
    pub chunk: Option<ChunkKey>,
    pub grid: PaddedGrid,
    pub threshold: f32,
    pub skirt_faces: SkirtMask,
    /// Most vertices the build may emit across core and skirts.
    pub vertex_capacity: usize,
    /// Outward surface normal per padded sample.
    pub normals: Vec<Vector3<f32>>,
    /// Core vertex index per dual cell, `EMPTY_CELL` if none.
    pub cell_vertices: Vec<u32>,
    pub core: MeshBuffers,
    /// Skirt buffers in `BlockSide` order.
    pub skirts: [MeshBuffers; 6],
    pub forced_skirt_triangles: [u32; 6],
    pub merged: MeshBuffers,
    pub submeshes: Vec<SubMesh>,
    pub overflowed: bool,
    pub description: Option<MeshDescription>,
}

impl MeshBuildContext {
    pub fn new(grid: PaddedGrid) -> Self {
        Self {
            chunk: None,
            grid,
            threshold: 0.0,
            skirt_faces: SkirtMask::NONE,
            vertex_capacity: 6 * grid.cell_count(),
            normals: Vec::new(),
            cell_vertices: Vec::new(),
            core: MeshBuffers::default(),
            skirts: Default::default(),
            forced_skirt_triangles: [0; 6],
            merged: MeshBuffers::default(),
            submeshes: Vec::new(),
            overflowed: false,
            description: None,
        }
    }

    /// Prepares the context for a new build of `chunk`.
    pub fn reset(&mut self, chunk: ChunkKey, grid: PaddedGrid, threshold: f32, skirt_faces: SkirtMask) {
        self.chunk = Some(chunk);
        self.grid = grid;
        self.threshold = threshold;
        self.skirt_faces = skirt_faces;
        self.vertex_capacity = 6 * grid.cell_count();
        self.normals.clear();
        self.cell_vertices.clear();
        self.core.clear();
        for skirt in &mut self.skirts {
            skirt.clear();
        }
        self.forced_skirt_triangles = [0; 6];
        self.merged.clear();
        self.submeshes.clear();
        self.overflowed = false;
        self.description = None;
    }

    /// Dual cells per axis. Cell `c` has its minimum corner at padded sample `c`.
    pub fn cell_grid(&self) -> [usize; 3] {
        let [x, y, z] = self.grid.logical();
        [x + 1, y + 1, z + 1]
    }

    #[inline]
    pub fn cell_index(&self, cell: [usize; 3]) -> usize {
        let [cx, cy, _] = self.cell_grid();
        cell[0] + cx * (cell[1] + cy * cell[2])
    }

    pub fn total_vertex_count(&self) -> usize {
        self.core.vertices.len()
            + self
                .skirts
                .iter()
                .map(|skirt| skirt.vertices.len())
                .sum::<usize>()
    }

    pub fn stats(&self) -> MeshStats {
        let description = self.description.as_ref();
        MeshStats {
            is_empty: description.map_or(true, MeshDescription::is_empty),
            bounds: description.filter(|mesh| !mesh.is_empty()).map(|mesh| mesh.bounds),
            vertex_count: description.map_or(0, |mesh| mesh.vertices.len()),
            index_count: description.map_or(0, |mesh| mesh.indices.len()),
            forced_skirt_triangles: self.forced_skirt_triangles,
            overflowed: self.overflowed,
        }
    }
}
