//! # Dual Contouring
//!
//! One vertex per dual cell that straddles the surface, one quad per sample edge
//! that crosses it.
//!
//! ## Cells
//! Dual cell `c` spans padded samples `c..=c + 1` on every axis, with `c` in
//! `0..=N`. Corner `i` of a cell sits at offset `(i & 1, (i >> 1) & 1, (i >> 2) & 1)`.
//! Bit `i` of a cell's sign code is set when corner `i` is empty.
//!
//! ## Ownership
//! A chunk emits quads only for edges whose base sample is one of its logical
//! samples (padded `1..=N` on every axis). Every edge in the world is owned by
//! exactly one chunk, and the four cells around an edge hold the same data in
//! both chunks thanks to the padding ring, so neighbouring meshes meet without
//! gaps or overlaps.

use cgmath::{InnerSpace, Vector3};

use crate::chunk_pipeline::rendering::ChunkVertex;
use crate::chunk_pipeline::voxels::volume::PaddedGrid;
use crate::chunk_pipeline::voxels::voxel_cell::{MaterialId, VoxelCell};

use super::build_context::{MeshBuildContext, EMPTY_CELL};

pub const CORNER_OFFSETS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// Corner pairs of the 12 cube edges: four along x, four along y, four along z.
pub const CUBE_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Crossing edges per sign code, one bit per entry of `CUBE_EDGES`.
pub const EDGE_TABLE: [u16; 256] = build_edge_table();

const fn build_edge_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut code = 0;
    while code < 256 {
        let mut mask = 0u16;
        let mut edge = 0;
        while edge < 12 {
            let (a, b) = CUBE_EDGES[edge];
            if (code >> a) & 1 != (code >> b) & 1 {
                mask |= 1 << edge;
            }
            edge += 1;
        }
        table[code] = mask;
        code += 1;
    }
    table
}

/// Sign code of eight corner densities.
pub fn corner_code(densities: &[f32; 8], threshold: f32) -> u8 {
    densities
        .iter()
        .enumerate()
        .filter(|(_, density)| **density <= threshold)
        .fold(0u8, |code, (corner, _)| code | (1 << corner))
}

/// The vertex of one dual cell.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CellVertex {
    /// Offset inside the cell, each component in `[0, 1]`.
    pub offset: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub material_id: MaterialId,
}

fn corner_sample(cell: [usize; 3], corner: usize) -> [usize; 3] {
    let offset = CORNER_OFFSETS[corner];
    [cell[0] + offset[0], cell[1] + offset[1], cell[2] + offset[2]]
}

fn corner_position(corner: usize) -> Vector3<f32> {
    let [x, y, z] = CORNER_OFFSETS[corner];
    Vector3::new(x as f32, y as f32, z as f32)
}

/// Places the vertex of `cell` at the centroid of its edge crossings.
///
/// # Returns
/// `None` if the cell lies entirely on one side of the surface
pub fn cell_vertex(
    cells: &[VoxelCell],
    grid: &PaddedGrid,
    normals: &[Vector3<f32>],
    cell: [usize; 3],
    threshold: f32,
) -> Option<CellVertex> {
    let corners: [VoxelCell; 8] = std::array::from_fn(|corner| {
        let [x, y, z] = corner_sample(cell, corner);
        cells[grid.index(x, y, z)]
    });
    let densities = corners.map(|corner| corner.density_value());
    let code = corner_code(&densities, threshold);
    let edges = EDGE_TABLE[code as usize];
    if edges == 0 {
        return None;
    }

    let mut sum = Vector3::new(0.0, 0.0, 0.0);
    let mut crossings = 0.0;
    for (edge, (a, b)) in CUBE_EDGES.iter().enumerate() {
        if edges & (1 << edge) == 0 {
            continue;
        }
        let (da, db) = (densities[*a], densities[*b]);
        let t = if (db - da).abs() > f32::EPSILON {
            ((threshold - da) / (db - da)).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let (pa, pb) = (corner_position(*a), corner_position(*b));
        sum += pa + (pb - pa) * t;
        crossings += 1.0;
    }
    let offset = sum / crossings;

    let mut normal = Vector3::new(0.0, 0.0, 0.0);
    for corner in 0..8 {
        let [x, y, z] = corner_sample(cell, corner);
        let weight = (0..3)
            .map(|axis| {
                if CORNER_OFFSETS[corner][axis] == 1 {
                    offset[axis]
                } else {
                    1.0 - offset[axis]
                }
            })
            .product::<f32>();
        if let Some(sample) = normals.get(grid.index(x, y, z)) {
            normal += *sample * weight;
        }
    }
    let normal = if normal.magnitude2() > f32::EPSILON {
        normal.normalize()
    } else {
        Vector3::new(0.0, 1.0, 0.0)
    };

    let material_id = corners
        .iter()
        .zip(densities)
        .find(|(_, density)| *density > threshold)
        .map_or(0, |(corner, _)| corner.material_id);

    Some(CellVertex {
        offset,
        normal,
        material_id,
    })
}

/// Core vertex index of `cell`, creating the vertex on first use.
///
/// # Returns
/// `None` without a surface in the cell or once the vertex capacity is reached
fn vertex_for_cell(
    cells: &[VoxelCell],
    context: &mut MeshBuildContext,
    cell: [usize; 3],
) -> Option<u32> {
    let index = context.cell_index(cell);
    let existing = context.cell_vertices[index];
    if existing != EMPTY_CELL {
        return Some(existing);
    }
    if context.total_vertex_count() >= context.vertex_capacity {
        context.overflowed = true;
        return None;
    }

    let vertex = cell_vertex(cells, &context.grid, &context.normals, cell, context.threshold)?;
    let position = [
        cell[0] as f32 - 1.0 + vertex.offset.x,
        cell[1] as f32 - 1.0 + vertex.offset.y,
        cell[2] as f32 - 1.0 + vertex.offset.z,
    ];
    let vertex_index = context.core.vertices.len() as u32;
    context.core.vertices.push(ChunkVertex::new(
        position,
        vertex.normal.into(),
        vertex.material_id,
        [position[0], position[2]],
    ));
    context.cell_vertices[index] = vertex_index;
    Some(vertex_index)
}

/// Emits the isosurface quads of the chunk into `context.core`.
///
/// Stops early and sets `context.overflowed` when the vertex capacity is reached.
pub fn build_isosurface(cells: &[VoxelCell], context: &mut MeshBuildContext) {
    let grid = context.grid;
    let threshold = context.threshold;
    let [cx, cy, cz] = context.cell_grid();
    context.cell_vertices.clear();
    context.cell_vertices.resize(cx * cy * cz, EMPTY_CELL);

    let [nx, ny, nz] = grid.logical();
    for axis in 0..3 {
        let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
        for z in 1..=nz {
            for y in 1..=ny {
                for x in 1..=nx {
                    let base = [x, y, z];
                    let mut forward = base;
                    forward[axis] += 1;

                    let first = cells[grid.index(base[0], base[1], base[2])];
                    let second = cells[grid.index(forward[0], forward[1], forward[2])];
                    if !first.is_isosurface() || !second.is_isosurface() {
                        continue;
                    }
                    let first_solid = first.density_value() > threshold;
                    let second_solid = second.density_value() > threshold;
                    if first_solid == second_solid {
                        continue;
                    }

                    let around = [
                        [(u, 1), (v, 1)],
                        [(u, 0), (v, 1)],
                        [(u, 0), (v, 0)],
                        [(u, 1), (v, 0)],
                    ]
                    .map(|steps| {
                        let mut cell = base;
                        for (step_axis, amount) in steps {
                            cell[step_axis] -= amount;
                        }
                        cell
                    });

                    let mut quad = [0u32; 4];
                    let mut complete = true;
                    for (slot, cell) in quad.iter_mut().zip(around) {
                        match vertex_for_cell(cells, context, cell) {
                            Some(index) => *slot = index,
                            None => {
                                complete = false;
                                break;
                            }
                        }
                    }
                    if context.overflowed {
                        return;
                    }
                    if !complete {
                        continue;
                    }

                    let [q0, q1, q2, q3] = quad;
                    if second_solid {
                        context
                            .core
                            .indices
                            .extend_from_slice(&[q0, q2, q1, q0, q3, q2]);
                    } else {
                        context
                            .core
                            .indices
                            .extend_from_slice(&[q0, q1, q2, q0, q2, q3]);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_table_extremes() {
        assert_eq!(EDGE_TABLE[0], 0);
        assert_eq!(EDGE_TABLE[255], 0);
        // Only corner 0 empty: the three edges leaving corner 0.
        assert_eq!(EDGE_TABLE[1], (1 << 0) | (1 << 4) | (1 << 8));
        // Bottom half empty: the four vertical (y) edges.
        let bottom = 0b0011_0011;
        assert_eq!(EDGE_TABLE[bottom], 0b1111 << 4);
    }

    #[test]
    fn test_edge_table_is_symmetric_under_inversion() {
        for code in 0..256usize {
            assert_eq!(EDGE_TABLE[code], EDGE_TABLE[255 - code]);
        }
    }

    #[test]
    fn test_corner_code_marks_empty_corners() {
        let densities = [1.0, -1.0, 0.0, 0.5, 1.0, 1.0, 1.0, -0.1];
        assert_eq!(corner_code(&densities, 0.0), 0b1000_0110);
    }

    #[test]
    fn test_vertex_sits_on_plane_crossing() {
        let grid = PaddedGrid::new(Vector3::new(2, 2, 2));
        let cells: Vec<VoxelCell> = (0..grid.cell_count())
            .map(|index| {
                let [_, y, _] = grid.position(index);
                VoxelCell::isosurface(-1, if y <= 1 { 0.5 } else { -0.5 })
            })
            .collect();
        let normals = vec![Vector3::new(0.0, 1.0, 0.0); grid.cell_count()];

        let vertex = cell_vertex(&cells, &grid, &normals, [1, 1, 1], 0.0).unwrap();
        assert!((vertex.offset.y - 0.5).abs() < 1e-3);
        assert!((vertex.offset.x - 0.5).abs() < 1e-3);
        assert_eq!(vertex.material_id, -1);
        assert!(cell_vertex(&cells, &grid, &normals, [1, 2, 1], 0.0).is_none());
    }
}
