//! # Pipeline Configuration
//!
//! `PipelineConfig` is built once, validated, and then passed by reference into
//! the generator, the mesh pool and the collider queue. Nothing reads it through a
//! global. It can be deserialized from JSON with any subset of fields present;
//! missing fields fall back to `PipelineConfig::default()`.
//!
//! ```rust
//! use voxel_chunk_pipeline::config::{GenerationMode, PipelineConfig};
//!
//! let config = PipelineConfig::from_json_str(
//!     r#"{ "chunk_logical_size": [16, 16, 16], "generation_mode": { "kind": "single" } }"#,
//! )
//! .unwrap();
//! assert_eq!(config.chunk_logical_size, [16, 16, 16]);
//! assert_eq!(config.generation_mode, GenerationMode::Single);
//! ```

use cgmath::Vector3;
use serde::{Deserialize, Serialize};

use crate::chunk_pipeline::gpu::TerrainSeed;
use crate::chunk_pipeline::meshing::skirts::SkirtMask;
use crate::chunk_pipeline::rendering::MaterialRef;
use crate::error::{PipelineError, Result};

/// How the generator groups chunks into compute dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationMode {
    /// One `generate_voxels` dispatch per chunk.
    Single,
    /// Up to `batch_size` chunks per `generate_voxels_batched` dispatch.
    Batched { batch_size: usize },
}

/// Tunables for the whole pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Interior voxel count per axis, excluding the one-voxel padding ring.
    pub chunk_logical_size: [i32; 3],
    /// `[horizontal, vertical]` radius of the meshed cube around the observer.
    pub spawn_radius: [i32; 2],
    /// Number of reusable mesh build slots.
    pub mesh_job_pool_size: usize,
    /// Upper bound on chunks waiting for a GPU readback.
    pub max_concurrent_gpu_requests: usize,
    pub terrain_seed: TerrainSeed,
    pub generation_mode: GenerationMode,
    /// Worker threads for CPU tasks. Zero runs tasks inline on the ticking thread.
    pub worker_threads: usize,
    /// Density at or below which a sample counts as empty.
    pub isosurface_threshold: f32,
    /// Chunk faces that receive skirts.
    pub skirt_faces: SkirtMask,
    /// Material handed to the renderer with every uploaded mesh.
    pub terrain_material: MaterialRef,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_logical_size: [32, 32, 32],
            spawn_radius: [2, 2],
            mesh_job_pool_size: 4,
            max_concurrent_gpu_requests: 16,
            terrain_seed: TerrainSeed::default(),
            generation_mode: GenerationMode::Batched { batch_size: 8 },
            worker_threads: 4,
            isosurface_threshold: 0.0,
            skirt_faces: SkirtMask::NONE,
            terrain_material: MaterialRef::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Arguments
    /// * `json` - A JSON object; absent fields take their default value
    ///
    /// # Returns
    /// The validated configuration, or `PipelineError::Config` describing the
    /// first problem found
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|err| {
            log::error!("Failed to parse pipeline configuration: {err}");
            PipelineError::Config(err.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let problem = if self.chunk_logical_size.iter().any(|&axis| axis <= 0) {
            Some(format!(
                "chunk_logical_size must be positive on every axis, got {:?}",
                self.chunk_logical_size
            ))
        } else if self.spawn_radius.iter().any(|&radius| radius < 0) {
            Some(format!(
                "spawn_radius must not be negative, got {:?}",
                self.spawn_radius
            ))
        } else if self.mesh_job_pool_size == 0 {
            Some("mesh_job_pool_size must be at least 1".to_string())
        } else if self.max_concurrent_gpu_requests == 0 {
            Some("max_concurrent_gpu_requests must be at least 1".to_string())
        } else if matches!(self.generation_mode, GenerationMode::Batched { batch_size: 0 }) {
            Some("batch_size must be at least 1".to_string())
        } else if !self.isosurface_threshold.is_finite() || self.isosurface_threshold.abs() >= 1.0 {
            Some(format!(
                "isosurface_threshold must lie inside (-1, 1), got {}",
                self.isosurface_threshold
            ))
        } else {
            None
        };

        match problem {
            Some(message) => {
                log::error!("Rejected pipeline configuration: {message}");
                Err(PipelineError::Config(message))
            }
            None => Ok(()),
        }
    }

    pub fn chunk_size(&self) -> Vector3<i32> {
        Vector3::from(self.chunk_logical_size)
    }
}
