//! # GPU Voxel Generation
//!
//! Voxel data for new chunks comes from compute kernels. This module defines the
//! backend seam and the two generators that drive it.
//!
//! ## Architecture
//!
//! - `ComputeBackend`: dispatches a named kernel and later reports readbacks.
//!   `WgpuComputeBackend` runs the WGSL kernels on a real device;
//!   `ReferenceComputeBackend` runs the same terrain function on the CPU.
//! - `CompletionQueue`: backends never touch chunk state. Every finished (or
//!   failed) readback is posted here as a `ReadbackEvent`, and the coordinator
//!   drains the queue at the start of each tick.
//! - `GpuVoxelGenerator`: one dispatch per chunk.
//! - `BatchedReadback`: several chunks per dispatch, resolved once both the voxel
//!   and the sign-counter readback arrived.
//!
//! ## Buffer Layout
//! Kernel output is one `VoxelCell` (4 bytes) per padded cell, chunk after chunk.
//! Every struct shared with WGSL is `#[repr(C)]` and padded to 16-byte rows.

pub mod batched_readback;
pub mod generator;
pub mod reference_backend;
pub mod wgpu_backend;

use std::sync::mpsc::{channel, Receiver, Sender};

use cgmath::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::chunk_pipeline::voxels::voxel_cell::VoxelCell;
use crate::error::Result;

pub use batched_readback::BatchedReadback;
pub use generator::GpuVoxelGenerator;
pub use reference_backend::ReferenceComputeBackend;
pub use wgpu_backend::WgpuComputeBackend;

/// Kernel generating one chunk per dispatch.
pub const GENERATE_VOXELS_KERNEL: &str = "generate_voxels";
/// Kernel generating every chunk listed in the transform buffer.
pub const GENERATE_VOXELS_BATCHED_KERNEL: &str = "generate_voxels_batched";

/// World seed. Expanded into the kernel's permutation and modulo seeds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerrainSeed(pub u64);

/// Seed material derived from a `TerrainSeed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeedUniforms {
    /// Offset added to world coordinates before sampling.
    pub permutation_seed: [i32; 3],
    /// Period coordinates are wrapped to, keeping sample positions small.
    pub modulo_seed: [i32; 3],
}

impl TerrainSeed {
    pub fn expand(self) -> SeedUniforms {
        let mut rng = fastrand::Rng::with_seed(self.0);
        SeedUniforms {
            permutation_seed: [
                rng.i32(-100_000..100_000),
                rng.i32(-100_000..100_000),
                rng.i32(-100_000..100_000),
            ],
            modulo_seed: [
                rng.i32(4096..65536),
                rng.i32(4096..65536),
                rng.i32(4096..65536),
            ],
        }
    }

    /// Seed for the CPU noise generator.
    pub fn noise_seed(self) -> u32 {
        (self.0 ^ (self.0 >> 32)) as u32
    }
}

/// Uniform block of the generation kernels. Matches `Uniforms` in `terrain.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KernelUniforms {
    pub chunk_position: [i32; 3],
    pub chunk_count: u32,
    pub chunk_size: [i32; 3],
    pub padded_cell_count: u32,
    pub permutation_seed: [i32; 3],
    pub _pad0: u32,
    pub modulo_seed: [i32; 3],
    pub _pad1: u32,
}

impl KernelUniforms {
    /// # Arguments
    /// * `chunk_position` - Chunk coordinate of the first chunk in the dispatch
    /// * `chunk_size` - Logical chunk size
    /// * `seeds` - Expanded terrain seed
    /// * `chunk_count` - Number of transforms in the dispatch
    pub fn new(
        chunk_position: Point3<i32>,
        chunk_size: Vector3<i32>,
        seeds: SeedUniforms,
        chunk_count: usize,
    ) -> Self {
        let padded = (chunk_size.x + 2) * (chunk_size.y + 2) * (chunk_size.z + 2);
        Self {
            chunk_position: [chunk_position.x, chunk_position.y, chunk_position.z],
            chunk_count: chunk_count as u32,
            chunk_size: [chunk_size.x, chunk_size.y, chunk_size.z],
            padded_cell_count: padded as u32,
            permutation_seed: seeds.permutation_seed,
            _pad0: 0,
            modulo_seed: seeds.modulo_seed,
            _pad1: 0,
        }
    }
}

/// Per-chunk placement inside a dispatch. Matches `ChunkTransform` in `terrain.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ChunkTransform {
    /// World voxel of the chunk's logical origin.
    pub world_offset: [i32; 3],
    /// World voxels per cell.
    pub scale: i32,
}

impl ChunkTransform {
    pub fn for_chunk(coordinate: Point3<i32>, chunk_size: Vector3<i32>) -> Self {
        Self {
            world_offset: [
                coordinate.x * chunk_size.x,
                coordinate.y * chunk_size.y,
                coordinate.z * chunk_size.z,
            ],
            scale: 1,
        }
    }
}

/// Count of inside and outside samples in one generated chunk.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SignCounters {
    pub positive: u32,
    pub negative: u32,
}

impl SignCounters {
    /// True when the chunk is entirely inside or entirely outside.
    pub fn is_uniform(&self) -> bool {
        self.positive == 0 || self.negative == 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadbackId(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReadbackKind {
    Voxels,
    SignCounters,
}

/// A kernel launch.
#[derive(Clone, Debug)]
pub struct DispatchRequest {
    pub kernel: String,
    pub uniforms: KernelUniforms,
    pub transforms: Vec<ChunkTransform>,
    /// Also read back per-chunk `SignCounters`.
    pub read_counters: bool,
}

impl DispatchRequest {
    pub fn padded_cell_count(&self) -> usize {
        self.uniforms.padded_cell_count as usize
    }
}

#[derive(Debug)]
pub enum ReadbackPayload {
    Voxels(Vec<VoxelCell>),
    SignCounters(Vec<SignCounters>),
    Failed { kind: ReadbackKind, reason: String },
}

impl ReadbackPayload {
    pub fn kind(&self) -> ReadbackKind {
        match self {
            ReadbackPayload::Voxels(_) => ReadbackKind::Voxels,
            ReadbackPayload::SignCounters(_) => ReadbackKind::SignCounters,
            ReadbackPayload::Failed { kind, .. } => *kind,
        }
    }
}

/// One finished readback, posted by a backend.
#[derive(Debug)]
pub struct ReadbackEvent {
    pub id: ReadbackId,
    pub payload: ReadbackPayload,
}

/// Thread-safe sending side of the completion queue.
#[derive(Clone)]
pub struct CompletionSender(Sender<ReadbackEvent>);

impl CompletionSender {
    /// Posts an event. A closed queue means the pipeline is gone; the event is dropped.
    pub fn post(&self, event: ReadbackEvent) {
        if self.0.send(event).is_err() {
            log::debug!("Completion queue closed, dropping readback event");
        }
    }
}

pub struct CompletionQueue {
    sender: CompletionSender,
    receiver: Receiver<ReadbackEvent>,
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionQueue {
    pub fn new() -> Self {
        let (sender, receiver) = channel();
        Self {
            sender: CompletionSender(sender),
            receiver,
        }
    }

    pub fn sender(&self) -> CompletionSender {
        self.sender.clone()
    }

    /// Everything posted since the last drain.
    pub fn drain(&self) -> Vec<ReadbackEvent> {
        self.receiver.try_iter().collect()
    }
}

/// A device that runs generation kernels.
pub trait ComputeBackend {
    /// Launches a kernel and schedules its readbacks.
    ///
    /// # Returns
    /// The id every `ReadbackEvent` of this dispatch will carry, or
    /// `PipelineError::KernelNotFound` if the kernel is not registered
    fn dispatch(&mut self, request: DispatchRequest) -> Result<ReadbackId>;

    /// Progresses outstanding work and posts finished readbacks to `completions`.
    fn poll(&mut self, completions: &CompletionSender);

    /// Readbacks not yet posted.
    fn in_flight(&self) -> usize;
}
