//! Axis-aligned faces for solid block cells.
//!
//! A block face is emitted wherever the neighbouring cell is not a block, which
//! includes cells of the padding ring. Block occupancy is packed into a `BitVec`
//! over the padded grid, the same way chunk solidity is tracked elsewhere.

use bitvec::vec::BitVec;

use crate::chunk_pipeline::rendering::ChunkVertex;
use crate::chunk_pipeline::voxels::volume::PaddedGrid;
use crate::chunk_pipeline::voxels::voxel_cell::VoxelCell;

use super::block_side::BlockSide;
use super::build_context::MeshBuildContext;

const FACE_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

pub fn block_occupancy(cells: &[VoxelCell]) -> BitVec {
    cells.iter().map(VoxelCell::is_block).collect()
}

fn neighbour(grid: &PaddedGrid, position: [usize; 3], side: BlockSide) -> usize {
    let normal = side.normal();
    let step = |value: usize, delta: i32| (value as i32 + delta) as usize;
    grid.index(
        step(position[0], normal.x),
        step(position[1], normal.y),
        step(position[2], normal.z),
    )
}

/// Appends the visible faces of every logical block cell to `context.core`.
///
/// Stops and sets `context.overflowed` when the vertex capacity is reached.
pub fn build_block_faces(cells: &[VoxelCell], context: &mut MeshBuildContext) {
    let occupancy = block_occupancy(cells);
    if occupancy.not_any() {
        return;
    }

    let grid = context.grid;
    let [nx, ny, nz] = grid.logical();
    for z in 1..=nz {
        for y in 1..=ny {
            for x in 1..=nx {
                let index = grid.index(x, y, z);
                if !occupancy[index] {
                    continue;
                }
                let cell = cells[index];
                let center = [x as f32 - 1.0, y as f32 - 1.0, z as f32 - 1.0];

                for side in BlockSide::all() {
                    if occupancy[neighbour(&grid, [x, y, z], side)] {
                        continue;
                    }
                    if context.total_vertex_count() + 4 > context.vertex_capacity {
                        context.overflowed = true;
                        return;
                    }

                    let normal = side.normal();
                    let normal = [normal.x as f32, normal.y as f32, normal.z as f32];
                    let base = context.core.vertices.len() as u32;
                    for (corner, uv) in side.face_corners().into_iter().zip(FACE_UVS) {
                        let position = [
                            center[0] + corner[0],
                            center[1] + corner[1],
                            center[2] + corner[2],
                        ];
                        context
                            .core
                            .vertices
                            .push(ChunkVertex::new(position, normal, cell.material_id, uv));
                    }
                    context
                        .core
                        .indices
                        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
                }
            }
        }
    }
}
