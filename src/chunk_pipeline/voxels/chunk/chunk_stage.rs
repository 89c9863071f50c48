//! # Chunk Stage
//!
//! Where a chunk is in the pipeline. A chunk is in exactly one stage at a time,
//! so at most one pipeline request can ever be outstanding for it. The flag view
//! (`ChunkFlags`) exists for diagnostics and for callers that still reason in
//! terms of request bits.

use crate::chunk_pipeline::meshing::SlotIndex;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChunkStage {
    /// Waiting for a generator dispatch.
    RequestGpuData,
    /// A dispatch was issued; waiting for the readback.
    PendingGpuData,
    /// Voxel data landed; waiting for all 26 neighbours to fill the padding ring.
    RequestPaddingUpdate,
    /// Padding is current; waiting for a free mesh build slot.
    RequestMesh,
    /// A mesh build is running in `slot`.
    Meshing { slot: SlotIndex },
    /// A mesh was uploaded; waiting for the collider queue.
    RequestColliderBake,
    /// A collider bake is running.
    BakingCollider,
    /// Nothing requested and nothing in flight.
    Idle,
}

impl ChunkStage {
    /// Whether the chunk owns complete voxel data (neighbours may copy from it).
    pub fn is_populated(&self) -> bool {
        !matches!(self, ChunkStage::RequestGpuData | ChunkStage::PendingGpuData)
    }

    /// Whether a job started for this chunk has not reported back yet.
    pub fn has_job_in_flight(&self) -> bool {
        matches!(
            self,
            ChunkStage::PendingGpuData | ChunkStage::Meshing { .. } | ChunkStage::BakingCollider
        )
    }

    /// Projects the stage onto the request flag set.
    pub fn flags(&self) -> ChunkFlags {
        match self {
            ChunkStage::RequestGpuData => ChunkFlags::REQUEST_GPU_DATA,
            ChunkStage::PendingGpuData => ChunkFlags::PENDING_GPU_DATA,
            ChunkStage::RequestPaddingUpdate => ChunkFlags::REQUEST_PADDING_UPDATE,
            ChunkStage::RequestMesh => ChunkFlags::REQUEST_MESH,
            ChunkStage::RequestColliderBake => ChunkFlags::REQUEST_COLLIDER_BAKE,
            ChunkStage::Meshing { .. } | ChunkStage::BakingCollider => ChunkFlags::EMPTY,
            ChunkStage::Idle => ChunkFlags::IDLE,
        }
    }
}

/// Inputs to the stage transition table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StageEvent {
    GpuRequestIssued,
    GpuDataReady,
    GpuDataFailed,
    PaddingComplete,
    MeshJobStarted(SlotIndex),
    MeshJobFinished { has_geometry: bool },
    ColliderBakeQueued,
    ColliderAttached,
    Edited,
    NeighbourEdited,
    Promoted,
    Demoted,
}

/// Bit view of a chunk's state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChunkFlags(u8);

impl ChunkFlags {
    pub const EMPTY: ChunkFlags = ChunkFlags(0);
    pub const REQUEST_GPU_DATA: ChunkFlags = ChunkFlags(1 << 0);
    pub const PENDING_GPU_DATA: ChunkFlags = ChunkFlags(1 << 1);
    pub const REQUEST_PADDING_UPDATE: ChunkFlags = ChunkFlags(1 << 2);
    pub const REQUEST_MESH: ChunkFlags = ChunkFlags(1 << 3);
    pub const REQUEST_COLLIDER_BAKE: ChunkFlags = ChunkFlags(1 << 4);
    pub const IDLE: ChunkFlags = ChunkFlags(1 << 5);
    pub const MODIFIED: ChunkFlags = ChunkFlags(1 << 6);

    const REQUESTS: u8 = Self::REQUEST_GPU_DATA.0
        | Self::REQUEST_PADDING_UPDATE.0
        | Self::REQUEST_MESH.0
        | Self::REQUEST_COLLIDER_BAKE.0;

    pub fn contains(&self, other: ChunkFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: ChunkFlags) -> ChunkFlags {
        ChunkFlags(self.0 | other.0)
    }

    /// Number of `REQUEST_*` bits set.
    pub fn request_count(&self) -> u32 {
        (self.0 & Self::REQUESTS).count_ones()
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for ChunkFlags {
    type Output = ChunkFlags;

    fn bitor(self, rhs: ChunkFlags) -> ChunkFlags {
        self.union(rhs)
    }
}
