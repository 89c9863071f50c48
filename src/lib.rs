#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Voxel Chunk Pipeline
//!
//! A multi-stage pipeline that turns chunk coordinates around an observer into
//! renderable, collidable voxel meshes.
//!
//! ## Key Modules
//!
//! * `core` - Job handles and shared resources used by every stage
//! * `config` - `PipelineConfig`, loadable from JSON
//! * `error` - `PipelineError`, the error type of every fallible operation
//! * `chunk_pipeline` - The coordinator and its components: voxel generation,
//!   neighbour padding, dual contouring meshing and collider baking
//!
//! ## Architecture
//!
//! The pipeline talks to the outside world through three seams:
//! * `ComputeBackend` generates voxel data (wgpu, or a CPU reference)
//! * `Renderer` receives finished meshes
//! * `ColliderBackend` bakes physics colliders from them
//!
//! ## Usage
//!
//! ```rust,no_run
//! fn main() {
//!     voxel_chunk_pipeline::run();
//! }
//! ```

use std::sync::Arc;

use cgmath::Point3;
use log::{error, info};

pub mod chunk_pipeline;
pub mod config;
pub mod core;
pub mod error;

use chunk_pipeline::collider::HeadlessColliderBackend;
use chunk_pipeline::gpu::ReferenceComputeBackend;
use chunk_pipeline::rendering::HeadlessRenderer;
use chunk_pipeline::ChunkPipeline;
use config::PipelineConfig;
use error::Result;

/// Chunks the demo observer walks along the x axis.
const DEMO_WALK_CHUNKS: i32 = 4;
const DEMO_MAX_TICKS_PER_STEP: usize = 2_000;

/// Runs the headless demo.
///
/// Reads an optional JSON configuration path from the first command line
/// argument, walks an observer along the x axis and logs the pipeline state
/// after every step.
pub fn run() {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized");

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path),
        None => Ok(PipelineConfig::default()),
    };

    if let Err(e) = config.and_then(run_demo) {
        error!("Demo failed: {e}");
    }
}

fn load_config(path: &str) -> Result<PipelineConfig> {
    info!("Loading pipeline configuration from {path}");
    let json = std::fs::read_to_string(path)?;
    PipelineConfig::from_json_str(&json)
}

fn run_demo(config: PipelineConfig) -> Result<()> {
    let backend = ReferenceComputeBackend::new(config.terrain_seed);
    let chunk_width = config.chunk_logical_size[0] as f32;
    let mut pipeline = ChunkPipeline::new(
        config,
        backend,
        HeadlessRenderer::new(),
        Arc::new(HeadlessColliderBackend::new()),
    )?;

    let start = web_time::Instant::now();
    for step in 0..DEMO_WALK_CHUNKS {
        let observer = Point3::new(step as f32 * chunk_width, 0.0, 0.0);
        let step_start = web_time::Instant::now();
        match pipeline.run_until_settled(observer, DEMO_MAX_TICKS_PER_STEP)? {
            Some(ticks) => info!(
                "Observer at {:?} settled after {ticks} ticks in {:?}",
                observer,
                step_start.elapsed()
            ),
            None => error!(
                "Observer at {:?} did not settle within {DEMO_MAX_TICKS_PER_STEP} ticks",
                observer
            ),
        }
        info!("{:?}", pipeline.stats());
    }

    pipeline.flush();
    info!(
        "Demo finished after {} ticks in {:?}",
        pipeline.ticks(),
        start.elapsed()
    );
    Ok(())
}
