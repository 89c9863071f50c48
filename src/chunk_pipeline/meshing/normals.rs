//! Surface normals from the density field.
//!
//! Central differences inside the padded volume, one-sided differences on its
//! outer layer. Density grows inward, so the outward normal is the negated
//! gradient.

use cgmath::{InnerSpace, Vector3};

use crate::chunk_pipeline::voxels::volume::PaddedGrid;
use crate::chunk_pipeline::voxels::voxel_cell::VoxelCell;

fn axis_difference(
    cells: &[VoxelCell],
    grid: &PaddedGrid,
    position: [usize; 3],
    axis: usize,
) -> f32 {
    let extent = grid.padded()[axis];
    let density = |p: [usize; 3]| cells[grid.index(p[0], p[1], p[2])].density_value();

    let mut lower = position;
    let mut upper = position;
    let mut span = 0.0;
    if position[axis] > 0 {
        lower[axis] -= 1;
        span += 1.0;
    }
    if position[axis] + 1 < extent {
        upper[axis] += 1;
        span += 1.0;
    }
    if span == 0.0 {
        return 0.0;
    }
    (density(upper) - density(lower)) / span
}

/// Outward normal at one padded sample. Zero where the field is flat.
pub fn sample_normal(cells: &[VoxelCell], grid: &PaddedGrid, position: [usize; 3]) -> Vector3<f32> {
    let gradient = Vector3::new(
        axis_difference(cells, grid, position, 0),
        axis_difference(cells, grid, position, 1),
        axis_difference(cells, grid, position, 2),
    );
    if gradient.magnitude2() > f32::EPSILON {
        -gradient.normalize()
    } else {
        Vector3::new(0.0, 0.0, 0.0)
    }
}

/// Fills `normals` with one normal per padded sample of `cells`.
pub fn compute_normals(cells: &[VoxelCell], grid: &PaddedGrid, normals: &mut Vec<Vector3<f32>>) {
    normals.clear();
    normals.reserve(grid.cell_count());
    let [px, py, pz] = grid.padded();
    for z in 0..pz {
        for y in 0..py {
            for x in 0..px {
                normals.push(sample_normal(cells, grid, [x, y, z]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Solid below `height`, empty above, with a linear ramp across it.
    fn ground(grid: &PaddedGrid, height: f32) -> Vec<VoxelCell> {
        (0..grid.cell_count())
            .map(|index| {
                let [_, y, _] = grid.position(index);
                VoxelCell::isosurface(0, (height - y as f32) / 4.0)
            })
            .collect()
    }

    #[test]
    fn test_flat_ground_points_up() {
        let grid = PaddedGrid::new(Vector3::new(4, 4, 4));
        let cells = ground(&grid, 2.5);
        let mut normals = Vec::new();
        compute_normals(&cells, &grid, &mut normals);

        assert_eq!(normals.len(), grid.cell_count());
        for normal in [normals[grid.index(2, 2, 2)], normals[grid.index(0, 0, 0)], normals[grid.index(5, 5, 5)]] {
            assert!((normal - Vector3::new(0.0, 1.0, 0.0)).magnitude() < 1e-4, "{normal:?}");
        }
    }

    #[test]
    fn test_uniform_field_has_no_normal() {
        let grid = PaddedGrid::new(Vector3::new(2, 2, 2));
        let cells = vec![VoxelCell::AIR; grid.cell_count()];
        assert_eq!(sample_normal(&cells, &grid, [1, 1, 1]), Vector3::new(0.0, 0.0, 0.0));
    }
}
