//! # Voxel Edits
//!
//! Runtime modification of loaded chunks: placing blocks and sculpting the
//! isosurface with spherical brushes. An edit is applied to the volumes directly
//! on the coordinating thread, so it only proceeds when no scheduled task touches
//! any of the volumes it writes. Otherwise it is reported as deferred and the
//! pipeline retries it on a later tick.

use std::collections::{BTreeMap, BTreeSet};

use cgmath::{MetricSpace, Point3, Vector3};
use log::debug;

use crate::error::{PipelineError, Result};

use super::chunk::chunk_stage::StageEvent;
use super::padding::neighbour_offsets;
use super::registry::ChunkRegistry;
use super::voxel_cell::{MaterialId, VoxelCell};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EditKind {
    SetBlock,
    SphereAdd,
    SphereSubtract,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EditRequest {
    pub world_position: Point3<f32>,
    pub kind: EditKind,
    /// Block material for `SetBlock`; isosurface material (`<= 0`) painted by `SphereAdd`.
    pub material_id: MaterialId,
    pub radius: f32,
    pub intensity: f32,
}

impl EditRequest {
    pub fn set_block(world_position: Point3<f32>, material_id: MaterialId) -> Self {
        Self {
            world_position,
            kind: EditKind::SetBlock,
            material_id,
            radius: 0.0,
            intensity: 0.0,
        }
    }

    pub fn sphere_add(
        world_position: Point3<f32>,
        radius: f32,
        intensity: f32,
        material_id: MaterialId,
    ) -> Self {
        Self {
            world_position,
            kind: EditKind::SphereAdd,
            material_id,
            radius,
            intensity,
        }
    }

    pub fn sphere_subtract(world_position: Point3<f32>, radius: f32, intensity: f32) -> Self {
        Self {
            world_position,
            kind: EditKind::SphereSubtract,
            material_id: 0,
            radius,
            intensity,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    Applied {
        chunks_edited: usize,
        voxels_written: usize,
    },
    /// A touched volume was busy or still waiting for voxel data.
    Deferred,
}

/// Chunk coordinate to the logical voxels written there.
type EditFootprint = BTreeMap<(i32, i32, i32), Vec<(Point3<i32>, f32)>>;

fn key(coordinate: Point3<i32>) -> (i32, i32, i32) {
    (coordinate.x, coordinate.y, coordinate.z)
}

/// World voxels touched by the request, with the brush weight at each.
fn footprint(registry: &ChunkRegistry, request: &EditRequest) -> EditFootprint {
    let mut footprint = EditFootprint::new();

    match request.kind {
        EditKind::SetBlock => {
            let voxel = ChunkRegistry::world_to_voxel(request.world_position);
            let (chunk, local) = registry.voxel_to_chunk(voxel);
            footprint.entry(key(chunk)).or_default().push((local, 1.0));
        }
        EditKind::SphereAdd | EditKind::SphereSubtract => {
            let radius = request.radius.max(0.0);
            let center = request.world_position;
            let min = ChunkRegistry::world_to_voxel(center - Vector3::new(radius, radius, radius));
            let max = ChunkRegistry::world_to_voxel(center + Vector3::new(radius, radius, radius));

            for z in min.z..=max.z {
                for y in min.y..=max.y {
                    for x in min.x..=max.x {
                        let voxel = Point3::new(x, y, z);
                        let distance = center.distance(voxel.cast::<f32>().unwrap_or(center));
                        if distance > radius {
                            continue;
                        }
                        let falloff = if radius > 0.0 { 1.0 - distance / radius } else { 1.0 };
                        let weight = request.intensity * falloff;
                        if weight <= 0.0 {
                            continue;
                        }
                        let (chunk, local) = registry.voxel_to_chunk(voxel);
                        footprint.entry(key(chunk)).or_default().push((local, weight));
                    }
                }
            }
        }
    }

    footprint
}

/// New cell value for one voxel, or `None` when the brush leaves it unchanged.
fn edited_cell(cell: VoxelCell, request: &EditRequest, weight: f32) -> Option<VoxelCell> {
    match request.kind {
        EditKind::SetBlock => Some(if request.material_id > 0 {
            VoxelCell::block(request.material_id)
        } else if request.material_id == 0 {
            VoxelCell::AIR
        } else {
            VoxelCell::isosurface(request.material_id, 1.0)
        }),
        EditKind::SphereAdd => {
            if cell.is_block() {
                return None;
            }
            let density = (cell.density_value() + weight).min(1.0);
            let material_id = if density > 0.0 && request.material_id <= 0 {
                request.material_id
            } else {
                cell.material_id
            };
            Some(VoxelCell::isosurface(material_id, density))
        }
        EditKind::SphereSubtract => {
            if cell.is_block() {
                return Some(VoxelCell::AIR);
            }
            let density = (cell.density_value() - weight).max(-1.0);
            let material_id = if density > 0.0 { cell.material_id } else { 0 };
            Some(VoxelCell::isosurface(material_id, density))
        }
    }
}

/// Whether a logical voxel lies in the slice a neighbour at `offset` copies into its padding.
fn on_border(local: Point3<i32>, size: Vector3<i32>, offset: Vector3<i32>) -> bool {
    let check = |l: i32, n: i32, d: i32| match d {
        -1 => l == 0,
        1 => l == n - 1,
        _ => true,
    };
    check(local.x, size.x, offset.x) && check(local.y, size.y, offset.y) && check(local.z, size.z, offset.z)
}

/// Applies an edit to the loaded chunks it touches.
///
/// # Returns
/// - `Ok(EditOutcome::Applied { .. })` after writing every touched voxel
/// - `Ok(EditOutcome::Deferred)` if any touched volume is busy or not yet populated
/// - `Err(ChunkNotLoaded)` / `Err(VolumeNotPopulated)` for the chunk containing
///   `world_position`
pub fn apply_edit(registry: &mut ChunkRegistry, request: &EditRequest) -> Result<EditOutcome> {
    let voxel = ChunkRegistry::world_to_voxel(request.world_position);
    let (origin_chunk, _) = registry.voxel_to_chunk(voxel);
    let origin = registry
        .get(origin_chunk)
        .ok_or(PipelineError::ChunkNotLoaded(origin_chunk))?;
    if !origin.has_populated_volume() {
        return Err(PipelineError::VolumeNotPopulated(origin_chunk));
    }

    let footprint = footprint(registry, request);

    for &(x, y, z) in footprint.keys() {
        let Some(record) = registry.get(Point3::new(x, y, z)) else {
            continue;
        };
        let ready = record.has_populated_volume()
            && record.volume.as_ref().is_some_and(|volume| volume.is_idle());
        if !ready {
            return Ok(EditOutcome::Deferred);
        }
    }

    let size = registry.chunk_size();
    let mut edited_chunks = Vec::new();
    let mut affected_neighbours = BTreeSet::new();
    let mut voxels_written = 0;

    for (&(x, y, z), voxels) in &footprint {
        let coordinate = Point3::new(x, y, z);
        let Some(volume) = registry.get(coordinate).and_then(|record| record.volume.as_ref()) else {
            continue;
        };

        let grid = volume.grid();
        let shared = volume.cells();
        let mut cells = shared.get_mut();
        let mut wrote_any = false;

        for &(local, weight) in voxels {
            let Some([px, py, pz]) = grid.padded_of_local(local) else {
                continue;
            };
            let index = grid.index(px, py, pz);
            let Some(updated) = edited_cell(cells[index], request, weight) else {
                continue;
            };
            if updated == cells[index] {
                continue;
            }
            cells[index] = updated;
            voxels_written += 1;
            wrote_any = true;

            for offset in neighbour_offsets() {
                if on_border(local, size, offset) {
                    affected_neighbours.insert(key(coordinate + offset));
                }
            }
        }

        if wrote_any {
            edited_chunks.push(coordinate);
        }
    }

    for coordinate in &edited_chunks {
        if let Some(record) = registry.get_mut(*coordinate) {
            record.apply(StageEvent::Edited)?;
        }
    }

    for (x, y, z) in affected_neighbours {
        if let Some(record) = registry.get_mut(Point3::new(x, y, z)) {
            if record.has_populated_volume() {
                record.apply(StageEvent::NeighbourEdited)?;
            }
        }
    }

    debug!(
        "Applied {:?} at {:?}: {} voxels in {} chunks",
        request.kind,
        request.world_position,
        voxels_written,
        edited_chunks.len()
    );

    Ok(EditOutcome::Applied {
        chunks_edited: edited_chunks.len(),
        voxels_written,
    })
}

/// Reads the voxel containing `world_position`, if its chunk holds voxel data.
pub fn read_voxel(registry: &ChunkRegistry, world_position: Point3<f32>) -> Option<VoxelCell> {
    let voxel = ChunkRegistry::world_to_voxel(world_position);
    let (chunk, local) = registry.voxel_to_chunk(voxel);
    let record = registry.get(chunk).filter(|record| record.has_populated_volume())?;
    let volume = record.volume.as_ref()?;
    volume.get(volume.padded_index_of_local(local)?)
}
