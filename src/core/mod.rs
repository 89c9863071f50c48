//! # Core Module
//!
//! Concurrency primitives shared by every stage of the chunk pipeline.
//!
//! ## Key Components
//! - `MtResource`: Thread-safe reference-counted buffer with read-write locking,
//!   used for voxel volumes, mesh build slots and collider result cells
//! - `JobHandle`: Completion handle for work running on the task pool, with
//!   `combine` as the join operation between pipeline stages
//!
//! ## Usage
//! ```rust
//! use voxel_chunk_pipeline::core::{JobHandle, MtResource};
//!
//! let cells = MtResource::new(vec![0u32; 8]);
//! cells.get_mut()[0] = 7;
//! assert_eq!(cells.get()[0], 7);
//!
//! let (handle, signal) = JobHandle::pending();
//! let joined = JobHandle::combine([handle, JobHandle::completed()]);
//! assert!(!joined.is_complete());
//! signal.complete();
//! assert!(joined.is_complete());
//! ```

pub mod job_handle;
pub mod mt_resource;

pub use job_handle::{JobHandle, JobSignal};
pub use mt_resource::MtResource;
