//! # Voxel Data
//!
//! Chunk records, their padded voxel volumes, and the CPU-side operations on
//! voxel data: spawning, neighbour padding, edits and readback copies.
//!
//! ## Key Components
//! - `VoxelCell`: the 4-byte cell shared with the generation kernels
//! - `VoxelVolume`: one chunk's padded cell buffer plus its access handles
//! - `ChunkRecord` / `ChunkStage`: per-chunk pipeline state
//! - `ChunkRegistry`: the loaded set around the observer
//! - `PaddingReconciler`: fills padding rings from the 26 neighbours
//! - `edits`: block placement and isosurface sculpting

pub mod chunk;
pub mod edits;
pub mod padding;
pub mod registry;
pub mod tasks;
pub mod volume;
pub mod voxel_cell;

pub use chunk::chunk_stage::{ChunkFlags, ChunkStage, StageEvent};
pub use chunk::{ChunkId, ChunkKey, ChunkRecord, ChunkRole};
pub use registry::ChunkRegistry;
pub use volume::{PaddedGrid, VoxelVolume};
pub use voxel_cell::{MaterialId, VoxelCell};
