//! # Mesh Job Pool
//!
//! Builds chunk meshes on the task manager. The pool owns a fixed arena of build
//! slots; a build binds a free slot, runs a chain of worker tasks against it and
//! leaves the result there until the coordinator finalizes it.
//!
//! ## Stage Graph
//! ```text
//! volume access ─▶ normals ─▶ core mesh ─▶ skirts ─▶ merge ─▶ finalize
//! ```
//! Each stage depends on the previous one's handle. The first waits for every
//! scheduled access to the voxel buffer; the core mesh handle is recorded as a
//! pending read on the volume, so edits and padding wait for the mesher to finish
//! reading.
//!
//! ## Slots
//! Busy slots never exceed the pool size; a chunk without a free slot simply
//! stays in `RequestMesh`. Slots keep their scratch allocations between builds.

pub mod block_faces;
pub mod block_side;
pub mod build_context;
pub mod dual_contouring;
pub mod merge;
pub mod normals;
pub mod skirts;
pub mod tasks;

use log::{debug, warn};

use crate::chunk_pipeline::collider::ColliderGeometry;
use crate::chunk_pipeline::rendering::{Aabb, MeshDescription};
use crate::chunk_pipeline::task_management::TaskManager;
use crate::chunk_pipeline::voxels::chunk::ChunkKey;
use crate::chunk_pipeline::voxels::volume::{PaddedGrid, VoxelVolume};
use crate::config::PipelineConfig;
use crate::core::{JobHandle, MtResource};
use crate::error::{PipelineError, Result};

use build_context::MeshBuildContext;
use skirts::SkirtMask;
use tasks::{MeshStage, MeshStageTask};

/// Index of a build slot in the pool's arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotIndex(pub usize);

/// Summary of one finished build.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MeshStats {
    pub is_empty: bool,
    pub bounds: Option<Aabb>,
    pub vertex_count: usize,
    pub index_count: usize,
    /// Skirt triangles per chunk face, in `BlockSide` order.
    pub forced_skirt_triangles: [u32; 6],
    /// The vertex capacity was reached and emission stopped early.
    pub overflowed: bool,
}

/// A finished mesh taken out of its slot.
#[derive(Clone, Debug)]
pub struct FinalizedMesh {
    pub description: MeshDescription,
}

impl FinalizedMesh {
    pub fn is_empty(&self) -> bool {
        self.description.is_empty()
    }

    /// Positions and indices for the collider backend.
    pub fn collider_geometry(&self) -> ColliderGeometry {
        ColliderGeometry {
            positions: self
                .description
                .vertices
                .iter()
                .map(|vertex| vertex.position)
                .collect(),
            indices: self.description.indices.clone(),
        }
    }
}

struct MeshBuildSlot {
    context: MtResource<MeshBuildContext>,
    chunk: Option<ChunkKey>,
    handle: JobHandle,
}

pub struct MeshJobPool {
    slots: Vec<MeshBuildSlot>,
    free: Vec<SlotIndex>,
    threshold: f32,
    skirt_faces: SkirtMask,
}

impl MeshJobPool {
    pub fn new(config: &PipelineConfig) -> Self {
        let grid = PaddedGrid::new(config.chunk_size());
        let slots: Vec<MeshBuildSlot> = (0..config.mesh_job_pool_size)
            .map(|_| MeshBuildSlot {
                context: MtResource::new(MeshBuildContext::new(grid)),
                chunk: None,
                handle: JobHandle::completed(),
            })
            .collect();
        // Reversed so that slot 0 is handed out first.
        let free = (0..slots.len()).rev().map(SlotIndex).collect();

        Self {
            slots,
            free,
            threshold: config.isosurface_threshold,
            skirt_faces: config.skirt_faces,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn busy_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Chunk bound to `slot`, if the slot is busy.
    pub fn slot_chunk(&self, slot: SlotIndex) -> Option<ChunkKey> {
        self.slots.get(slot.0).and_then(|entry| entry.chunk)
    }

    /// Starts a build of `chunk` from `volume`.
    ///
    /// # Arguments
    /// * `chunk` - The chunk the result belongs to
    /// * `volume` - Its padded voxel volume; receives the core mesh stage as a pending read
    /// * `task_manager` - Pool the stages run on
    ///
    /// # Returns
    /// The bound slot, or `None` if every slot is busy
    pub fn begin_build(
        &mut self,
        chunk: ChunkKey,
        volume: &mut VoxelVolume,
        task_manager: &mut TaskManager,
    ) -> Option<SlotIndex> {
        let slot = self.free.pop()?;
        let entry = &mut self.slots[slot.0];
        entry
            .context
            .get_mut()
            .reset(chunk, volume.grid(), self.threshold, self.skirt_faces);

        let cells = volume.cells();
        let mut dependency = volume.access_handle();
        for stage in MeshStage::ALL {
            let task = MeshStageTask::new(stage, cells.clone(), entry.context.clone());
            dependency = task_manager.publish_task(Box::new(task), dependency);
            if stage == MeshStage::CoreMesh {
                volume.set_pending_read(dependency.clone());
            }
        }

        entry.chunk = Some(chunk);
        entry.handle = dependency;
        debug!(
            "Mesh build for chunk {} at {:?} bound to slot {}",
            chunk.id, chunk.coordinate, slot.0
        );
        Some(slot)
    }

    /// Busy slots whose build has finished.
    pub fn poll_complete(&self) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.chunk.is_some() && entry.handle.is_complete())
            .map(|(index, _)| SlotIndex(index))
            .collect()
    }

    /// Takes the result out of a finished slot and frees it.
    ///
    /// # Returns
    /// The chunk the build was for, its mesh and its stats, or
    /// `PipelineError::SlotNotReady` if the slot is idle or still building
    pub fn finalize(&mut self, slot: SlotIndex) -> Result<(ChunkKey, FinalizedMesh, MeshStats)> {
        let entry = self
            .slots
            .get_mut(slot.0)
            .ok_or(PipelineError::SlotNotReady(slot.0))?;
        let chunk = match entry.chunk {
            Some(chunk) if entry.handle.is_complete() => chunk,
            _ => return Err(PipelineError::SlotNotReady(slot.0)),
        };

        let (description, stats) = {
            let mut context = entry.context.get_mut();
            let stats = context.stats();
            context.chunk = None;
            (context.description.take(), stats)
        };
        entry.chunk = None;
        entry.handle = JobHandle::completed();
        self.free.push(slot);

        let Some(description) = description else {
            warn!("Mesh build in slot {} finished without a result", slot.0);
            return Err(PipelineError::Backend(format!(
                "mesh build for chunk {:?} produced no result",
                chunk.coordinate
            )));
        };
        if stats.overflowed {
            warn!(
                "Mesh for chunk {:?} hit the vertex capacity and was truncated",
                chunk.coordinate
            );
        }
        Ok((chunk, FinalizedMesh { description }, stats))
    }
}
