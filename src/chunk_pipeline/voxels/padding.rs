//! # Neighbour Padding
//!
//! Fills each chunk's one-cell padding ring from the interiors of its 26
//! neighbours, so the mesher sees a continuous field across chunk borders and two
//! adjacent chunks emit matching geometry along their shared face.
//!
//! ## Gate
//! A chunk is reconciled only when every neighbour holds voxel data and no
//! scheduled copy, read, or write touches any of the 27 volumes involved. A chunk
//! that fails the gate is left for a later tick; the reconciler never waits.

use std::collections::HashMap;

use cgmath::{Point3, Vector3};
use log::debug;

use crate::core::MtResource;
use crate::error::Result;

use super::chunk::chunk_stage::{ChunkStage, StageEvent};
use super::registry::ChunkRegistry;
use super::volume::PaddedGrid;
use super::voxel_cell::VoxelCell;

/// The 26 offsets from a chunk to its face, edge and corner neighbours.
pub fn neighbour_offsets() -> impl Iterator<Item = Vector3<i32>> {
    (-1..=1).flat_map(|z| {
        (-1..=1).flat_map(move |y| {
            (-1..=1)
                .map(move |x| Vector3::new(x, y, z))
                .filter(|offset| *offset != Vector3::new(0, 0, 0))
        })
    })
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PaddingReport {
    pub reconciled: usize,
    pub deferred: usize,
}

/// Source and destination padded index ranges along one axis.
fn axis_ranges(offset: i32, logical: usize) -> (std::ops::RangeInclusive<usize>, std::ops::RangeInclusive<usize>) {
    match offset {
        -1 => (logical..=logical, 0..=0),
        1 => (1..=1, logical + 1..=logical + 1),
        _ => (1..=logical, 1..=logical),
    }
}

/// Copies the slice of `source` adjacent to this chunk in direction `offset` into
/// the matching part of `destination`'s padding ring.
///
/// # Arguments
/// * `source` - Padded cells of the neighbour at `offset`
/// * `destination` - Padded cells of the chunk being reconciled
/// * `grid` - Shared padded dimensions of both volumes
/// * `offset` - Neighbour direction, each component in `-1..=1`
pub fn copy_neighbour_region(
    source: &[VoxelCell],
    destination: &mut [VoxelCell],
    grid: &PaddedGrid,
    offset: Vector3<i32>,
) {
    let [nx, ny, nz] = grid.logical();
    let (src_x, dst_x) = axis_ranges(offset.x, nx);
    let (src_y, dst_y) = axis_ranges(offset.y, ny);
    let (src_z, dst_z) = axis_ranges(offset.z, nz);

    for (sz, dz) in src_z.zip(dst_z) {
        for (sy, dy) in src_y.clone().zip(dst_y.clone()) {
            for (sx, dx) in src_x.clone().zip(dst_x.clone()) {
                destination[grid.index(dx, dy, dz)] = source[grid.index(sx, sy, sz)];
            }
        }
    }
}

struct PopulatedVolume {
    cells: MtResource<Vec<VoxelCell>>,
    grid: PaddedGrid,
    idle: bool,
}

#[derive(Default)]
pub struct PaddingReconciler;

impl PaddingReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Reconciles every `RequestPaddingUpdate` chunk that passes the gate.
    ///
    /// # Returns
    /// How many chunks were reconciled and how many were deferred
    pub fn run(&self, registry: &mut ChunkRegistry) -> Result<PaddingReport> {
        let candidates =
            registry.coordinates_in_stage(|stage| stage == ChunkStage::RequestPaddingUpdate);
        let mut report = PaddingReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }

        let populated: HashMap<Point3<i32>, PopulatedVolume> = registry
            .iter()
            .filter(|record| record.has_populated_volume())
            .filter_map(|record| {
                record.volume.as_ref().map(|volume| {
                    (
                        record.coordinate,
                        PopulatedVolume {
                            cells: volume.cells(),
                            grid: volume.grid(),
                            idle: volume.is_idle(),
                        },
                    )
                })
            })
            .collect();

        for coordinate in candidates {
            let Some(target) = populated.get(&coordinate) else {
                report.deferred += 1;
                continue;
            };

            let neighbours: Option<Vec<(Vector3<i32>, &PopulatedVolume)>> = neighbour_offsets()
                .map(|offset| {
                    populated
                        .get(&(coordinate + offset))
                        .filter(|neighbour| neighbour.grid == target.grid)
                        .map(|neighbour| (offset, neighbour))
                })
                .collect();

            let ready = target.idle
                && neighbours
                    .as_ref()
                    .is_some_and(|list| list.iter().all(|(_, neighbour)| neighbour.idle));
            let Some(neighbours) = neighbours.filter(|_| ready) else {
                report.deferred += 1;
                continue;
            };

            {
                let mut destination = target.cells.get_mut();
                for (offset, neighbour) in neighbours {
                    let source = neighbour.cells.get();
                    copy_neighbour_region(&source, &mut destination, &target.grid, offset);
                }
            }

            if let Some(record) = registry.get_mut(coordinate) {
                record.apply(StageEvent::PaddingComplete)?;
            }
            report.reconciled += 1;
        }

        if report.reconciled > 0 || report.deferred > 0 {
            debug!(
                "Padding: reconciled {}, deferred {}",
                report.reconciled, report.deferred
            );
        }
        Ok(report)
    }
}
