//! # Skirts
//!
//! A skirt hangs a strip of triangles from the surface's boundary vertices down
//! onto the chunk face plane. Neighbours meshed at a different resolution leave
//! cracks along the shared face; the skirt covers them.
//!
//! For a flagged face, every pair of adjacent boundary cells that both carry a
//! core vertex is stitched to flattened copies of those vertices. Faces not in the
//! mask produce nothing.

use cgmath::{InnerSpace, Vector3};
use serde::{Deserialize, Serialize};

use super::block_side::BlockSide;
use super::build_context::{MeshBuildContext, EMPTY_CELL};

/// Bit set of chunk faces that receive skirts, indexed by `BlockSide`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkirtMask(pub u8);

impl SkirtMask {
    pub const NONE: SkirtMask = SkirtMask(0);
    pub const ALL: SkirtMask = SkirtMask(0b11_1111);

    pub fn contains(&self, side: BlockSide) -> bool {
        self.0 & (1 << side.index()) != 0
    }

    pub fn with(self, side: BlockSide) -> SkirtMask {
        SkirtMask(self.0 | (1 << side.index()))
    }
}

/// Moves a position onto the face plane of `side`.
pub fn flatten_to_face(position: [f32; 3], side: BlockSide, plane: f32) -> [f32; 3] {
    let mut flattened = position;
    flattened[side.axis()] = plane;
    flattened
}

/// Builds all six skirt buffers from the core mesh in `context`.
pub fn build_skirts(context: &mut MeshBuildContext) {
    for side in BlockSide::all() {
        context.skirts[side.index()].clear();
        context.forced_skirt_triangles[side.index()] = 0;
        if context.skirt_faces.contains(side) {
            build_face(context, side);
        }
    }
}

fn build_face(context: &mut MeshBuildContext, side: BlockSide) {
    let cell_grid = context.cell_grid();
    let axis = side.axis();
    let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
    let layer = if side.is_positive() { cell_grid[axis] - 1 } else { 0 };
    // Cell `c` spans local `[c - 1, c]`; the boundary layer's outer plane.
    let plane = if side.is_positive() {
        layer as f32
    } else {
        layer as f32 - 1.0
    };

    let mut pairs = Vec::new();
    for cv in 0..cell_grid[v] {
        for cu in 0..cell_grid[u] {
            let mut cell = [0usize; 3];
            cell[axis] = layer;
            cell[u] = cu;
            cell[v] = cv;
            let here = context.cell_vertices[context.cell_index(cell)];
            if here == EMPTY_CELL {
                continue;
            }
            for step in [u, v] {
                let mut next = cell;
                next[step] += 1;
                if next[step] >= cell_grid[step] {
                    continue;
                }
                let there = context.cell_vertices[context.cell_index(next)];
                if there != EMPTY_CELL {
                    pairs.push((here, there));
                }
            }
        }
    }

    for (a, b) in pairs {
        if context.total_vertex_count() + 4 > context.vertex_capacity {
            context.overflowed = true;
            return;
        }
        let original_a = context.core.vertices[a as usize];
        let original_b = context.core.vertices[b as usize];
        let mut flat_a = original_a;
        let mut flat_b = original_b;
        flat_a.position = flatten_to_face(original_a.position, side, plane);
        flat_b.position = flatten_to_face(original_b.position, side, plane);

        let pa = Vector3::from(original_a.position);
        let pb = Vector3::from(original_b.position);
        let fb = Vector3::from(flat_b.position);
        let fa = Vector3::from(flat_a.position);
        let winding = (pb - pa).cross(fb - pa) + (fb - pa).cross(fa - pa);
        if winding.magnitude2() < 1e-12 {
            continue;
        }
        let surface_normal = Vector3::from(original_a.normal) + Vector3::from(original_b.normal);

        let skirt = &mut context.skirts[side.index()];
        let base = skirt.vertices.len() as u32;
        skirt
            .vertices
            .extend_from_slice(&[original_a, original_b, flat_b, flat_a]);
        if winding.dot(surface_normal) >= 0.0 {
            skirt
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        } else {
            skirt
                .indices
                .extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
        }
        context.forced_skirt_triangles[side.index()] += 2;
    }
}
