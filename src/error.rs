//! Error type shared by every pipeline component.

use cgmath::Point3;
use thiserror::Error;

/// Errors surfaced by the chunk pipeline.
///
/// A chunk waiting for neighbours and a chunk that meshes to nothing are normal
/// pipeline states and are not represented here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error("compute kernel `{0}` is not registered")]
    KernelNotFound(String),

    #[error("readback {id} failed: {reason}")]
    Readback { id: u64, reason: String },

    #[error("chunk {0:?} is not loaded")]
    ChunkNotLoaded(Point3<i32>),

    #[error("chunk {0:?} has no voxel data yet")]
    VolumeNotPopulated(Point3<i32>),

    #[error("invalid stage transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("mesh build slot {0} has not finished")]
    SlotNotReady(usize),

    #[error("compute backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
