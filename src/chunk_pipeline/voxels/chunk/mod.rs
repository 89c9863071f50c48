//! # Chunk Records
//!
//! A `ChunkRecord` is the registry's entry for one chunk coordinate: its stage,
//! its voxel volume and the handles of the renderer and collider resources built
//! from it.
//!
//! ## Stage Transitions
//! Every stage change goes through `ChunkRecord::apply`, which holds the whole
//! transition table. `modified` marks voxel data that changed since the last mesh
//! build started; `padding_stale` marks a neighbour change that arrived while a
//! job was in flight. Both redirect the next finish transition back into the
//! pipeline instead of letting the chunk settle.
//!
//! ## Identity
//! `ChunkId` is a generation number. Anything that completes asynchronously is
//! addressed by `ChunkKey` (id plus coordinate), so a result for a destroyed chunk
//! can never land on a newer record at the same coordinate.

pub mod chunk_stage;

use std::fmt;

use cgmath::Point3;
use log::debug;

use crate::chunk_pipeline::collider::{ColliderGeometry, ColliderHandle};
use crate::chunk_pipeline::gpu::SignCounters;
use crate::chunk_pipeline::rendering::MeshHandle;
use crate::error::{PipelineError, Result};

use super::volume::VoxelVolume;
use chunk_stage::{ChunkFlags, ChunkStage, StageEvent};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Address of one specific record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub id: ChunkId,
    pub coordinate: Point3<i32>,
}

/// Whether a chunk is meshed or only provides voxel data to its neighbours.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChunkRole {
    Meshed,
    Halo,
}

pub struct ChunkRecord {
    pub id: ChunkId,
    pub coordinate: Point3<i32>,
    pub role: ChunkRole,
    stage: ChunkStage,
    modified: bool,
    padding_stale: bool,
    pub volume: Option<VoxelVolume>,
    pub sign_counters: Option<SignCounters>,
    pub mesh_handle: Option<MeshHandle>,
    pub collider_handle: Option<ColliderHandle>,
    /// Geometry waiting for the collider queue.
    pub collider_geometry: Option<ColliderGeometry>,
}

impl ChunkRecord {
    pub fn new(id: ChunkId, coordinate: Point3<i32>, role: ChunkRole) -> Self {
        Self {
            id,
            coordinate,
            role,
            stage: ChunkStage::RequestGpuData,
            modified: false,
            padding_stale: false,
            volume: None,
            sign_counters: None,
            mesh_handle: None,
            collider_handle: None,
            collider_geometry: None,
        }
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            id: self.id,
            coordinate: self.coordinate,
        }
    }

    pub fn stage(&self) -> ChunkStage {
        self.stage
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_padding_stale(&self) -> bool {
        self.padding_stale
    }

    /// Stage flags plus `MODIFIED`.
    pub fn flags(&self) -> ChunkFlags {
        if self.modified {
            self.stage.flags() | ChunkFlags::MODIFIED
        } else {
            self.stage.flags()
        }
    }

    /// Whether neighbours may copy this chunk's interior.
    pub fn has_populated_volume(&self) -> bool {
        self.stage.is_populated() && self.volume.is_some()
    }

    /// Applies one event from the transition table.
    ///
    /// # Returns
    /// The new stage, or `PipelineError::InvalidTransition` if the event is not
    /// accepted in the current stage. The record is unchanged on error.
    pub fn apply(&mut self, event: StageEvent) -> Result<ChunkStage> {
        use ChunkStage::*;
        use StageEvent::*;

        let from = self.stage;
        let next = match (from, event) {
            (RequestGpuData, GpuRequestIssued) => PendingGpuData,
            (PendingGpuData, GpuDataReady) => self.request_padding(),
            (PendingGpuData, GpuDataFailed) => RequestGpuData,
            (RequestPaddingUpdate, PaddingComplete) => {
                self.padding_stale = false;
                self.meshed_or_idle(RequestMesh)
            }
            (RequestMesh, MeshJobStarted(slot)) => {
                self.modified = false;
                Meshing { slot }
            }
            (Meshing { .. }, MeshJobFinished { has_geometry }) => {
                self.settle(if has_geometry { RequestColliderBake } else { Idle })
            }
            (RequestColliderBake, ColliderBakeQueued) => BakingCollider,
            (BakingCollider, ColliderAttached) => self.settle(Idle),
            (Idle, Edited) => {
                self.modified = true;
                self.meshed_or_idle(RequestMesh)
            }
            (stage, Edited) if stage.is_populated() => {
                self.modified = true;
                stage
            }
            (Idle | RequestMesh, NeighbourEdited) => {
                self.modified = true;
                self.request_padding()
            }
            (RequestPaddingUpdate, NeighbourEdited) => {
                self.modified = true;
                RequestPaddingUpdate
            }
            (stage, NeighbourEdited) if stage.is_populated() => {
                self.modified = true;
                self.padding_stale = true;
                stage
            }
            (Idle, Promoted) if self.volume.is_some() => self.request_padding(),
            (stage, Promoted) => stage,
            (RequestPaddingUpdate | RequestMesh, Demoted) => Idle,
            (stage, Demoted) => stage,
            (from, event) => {
                return Err(PipelineError::InvalidTransition {
                    from: format!("{from:?}"),
                    event: format!("{event:?}"),
                })
            }
        };

        if next != from {
            debug!(
                "Chunk {} at {:?}: {:?} -> {:?} on {:?}",
                self.id, self.coordinate, from, next, event
            );
        }
        self.stage = next;
        Ok(next)
    }

    fn request_padding(&mut self) -> ChunkStage {
        self.meshed_or_idle(ChunkStage::RequestPaddingUpdate)
    }

    /// Halo chunks never pad or mesh; they rest in `Idle` instead.
    fn meshed_or_idle(&self, stage: ChunkStage) -> ChunkStage {
        match self.role {
            ChunkRole::Meshed => stage,
            ChunkRole::Halo => ChunkStage::Idle,
        }
    }

    /// End of a job: go back for padding or a rebuild if anything changed meanwhile.
    fn settle(&mut self, target: ChunkStage) -> ChunkStage {
        if self.padding_stale {
            self.request_padding()
        } else if self.modified {
            self.meshed_or_idle(ChunkStage::RequestMesh)
        } else {
            target
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_pipeline::meshing::SlotIndex;
    use cgmath::Vector3;

    fn populated_record(role: ChunkRole) -> ChunkRecord {
        let mut record = ChunkRecord::new(ChunkId(1), Point3::new(0, 0, 0), role);
        record.volume = Some(VoxelVolume::new(Vector3::new(4, 4, 4)));
        record.apply(StageEvent::GpuRequestIssued).unwrap();
        record.apply(StageEvent::GpuDataReady).unwrap();
        record
    }

    fn idle_record() -> ChunkRecord {
        let mut record = populated_record(ChunkRole::Meshed);
        record.apply(StageEvent::PaddingComplete).unwrap();
        record.apply(StageEvent::MeshJobStarted(SlotIndex(0))).unwrap();
        record
            .apply(StageEvent::MeshJobFinished { has_geometry: true })
            .unwrap();
        record.apply(StageEvent::ColliderBakeQueued).unwrap();
        record.apply(StageEvent::ColliderAttached).unwrap();
        record
    }

    #[test]
    fn test_full_forward_path() {
        let record = idle_record();
        assert_eq!(record.stage(), ChunkStage::Idle);
        assert_eq!(record.flags(), ChunkFlags::IDLE);
        assert!(!record.is_modified());
    }

    #[test]
    fn test_empty_mesh_settles_without_collider() {
        let mut record = populated_record(ChunkRole::Meshed);
        record.apply(StageEvent::PaddingComplete).unwrap();
        record.apply(StageEvent::MeshJobStarted(SlotIndex(1))).unwrap();
        let stage = record
            .apply(StageEvent::MeshJobFinished { has_geometry: false })
            .unwrap();
        assert_eq!(stage, ChunkStage::Idle);
    }

    #[test]
    fn test_failed_readback_returns_to_request() {
        let mut record = ChunkRecord::new(ChunkId(1), Point3::new(0, 0, 0), ChunkRole::Meshed);
        record.apply(StageEvent::GpuRequestIssued).unwrap();
        let stage = record.apply(StageEvent::GpuDataFailed).unwrap();
        assert_eq!(stage, ChunkStage::RequestGpuData);
    }

    #[test]
    fn test_edit_on_idle_requests_mesh_and_marks_modified() {
        let mut record = idle_record();
        record.apply(StageEvent::Edited).unwrap();
        assert_eq!(record.stage(), ChunkStage::RequestMesh);
        assert!(record.is_modified());
        assert!(record.flags().contains(ChunkFlags::MODIFIED | ChunkFlags::REQUEST_MESH));
    }

    #[test]
    fn test_edit_during_meshing_rebuilds_after_finish() {
        let mut record = populated_record(ChunkRole::Meshed);
        record.apply(StageEvent::PaddingComplete).unwrap();
        record.apply(StageEvent::MeshJobStarted(SlotIndex(0))).unwrap();
        record.apply(StageEvent::Edited).unwrap();
        assert!(matches!(record.stage(), ChunkStage::Meshing { .. }));

        let stage = record
            .apply(StageEvent::MeshJobFinished { has_geometry: true })
            .unwrap();
        assert_eq!(stage, ChunkStage::RequestMesh);
    }

    #[test]
    fn test_neighbour_edit_during_bake_repads_after_attach() {
        let mut record = populated_record(ChunkRole::Meshed);
        record.apply(StageEvent::PaddingComplete).unwrap();
        record.apply(StageEvent::MeshJobStarted(SlotIndex(0))).unwrap();
        record
            .apply(StageEvent::MeshJobFinished { has_geometry: true })
            .unwrap();
        record.apply(StageEvent::ColliderBakeQueued).unwrap();
        record.apply(StageEvent::NeighbourEdited).unwrap();
        assert!(record.is_padding_stale());

        let stage = record.apply(StageEvent::ColliderAttached).unwrap();
        assert_eq!(stage, ChunkStage::RequestPaddingUpdate);
        record.apply(StageEvent::PaddingComplete).unwrap();
        assert!(!record.is_padding_stale());
        assert_eq!(record.stage(), ChunkStage::RequestMesh);
    }

    #[test]
    fn test_neighbour_edit_on_idle_repads() {
        let mut record = idle_record();
        let stage = record.apply(StageEvent::NeighbourEdited).unwrap();
        assert_eq!(stage, ChunkStage::RequestPaddingUpdate);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut record = ChunkRecord::new(ChunkId(1), Point3::new(0, 0, 0), ChunkRole::Meshed);
        let result = record.apply(StageEvent::PaddingComplete);
        assert!(matches!(result, Err(PipelineError::InvalidTransition { .. })));
        assert_eq!(record.stage(), ChunkStage::RequestGpuData);

        assert!(record.apply(StageEvent::Edited).is_err());
    }

    #[test]
    fn test_halo_settles_after_data() {
        let record = populated_record(ChunkRole::Halo);
        assert_eq!(record.stage(), ChunkStage::Idle);
    }

    #[test]
    fn test_halo_promotion_and_demotion() {
        let mut record = populated_record(ChunkRole::Halo);
        record.role = ChunkRole::Meshed;
        assert_eq!(
            record.apply(StageEvent::Promoted).unwrap(),
            ChunkStage::RequestPaddingUpdate
        );

        record.role = ChunkRole::Halo;
        assert_eq!(record.apply(StageEvent::Demoted).unwrap(), ChunkStage::Idle);
    }

    #[test]
    fn test_at_most_one_request_flag() {
        let stages = [
            ChunkStage::RequestGpuData,
            ChunkStage::PendingGpuData,
            ChunkStage::RequestPaddingUpdate,
            ChunkStage::RequestMesh,
            ChunkStage::Meshing { slot: SlotIndex(0) },
            ChunkStage::RequestColliderBake,
            ChunkStage::BakingCollider,
            ChunkStage::Idle,
        ];
        for stage in stages {
            let flags = stage.flags();
            assert!(flags.request_count() <= 1, "{stage:?}");
            if flags.contains(ChunkFlags::IDLE) {
                assert_eq!(flags.request_count(), 0);
                assert!(!stage.has_job_in_flight());
            }
        }
    }
}
