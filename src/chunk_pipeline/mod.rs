//! # Chunk Pipeline
//!
//! Turns chunk coordinates around an observer into renderable, collidable meshes.
//!
//! ## Architecture
//!
//! `ChunkPipeline` is the coordinator. It owns every component and drives them
//! from a single `tick`; all chunk state lives in the `ChunkRegistry` and changes
//! only on the ticking thread. Long-running work leaves that thread in two ways:
//! compute dispatches, which report back through the `CompletionQueue`, and CPU
//! tasks on the `TaskManager`, which report back through `JobHandle`s.
//!
//! ## Tick Order
//! 1. Drain finished tasks and compute readbacks, schedule volume copies
//! 2. Retry edits that were deferred on busy volumes
//! 3. Reshape the loaded set around the observer, dispose of departed chunks
//! 4. Dispatch voxel generation, poll the compute backend
//! 5. Reconcile neighbour padding
//! 6. Finalize finished mesh builds and upload them
//! 7. Start mesh builds while slots are free
//! 8. Queue collider bakes, attach finished ones
//! 9. Drop retired volumes whose jobs finished
//! 10. Dispatch queued CPU tasks
//!
//! ## Example Usage
//! ```rust
//! use std::sync::Arc;
//! use cgmath::Point3;
//! use voxel_chunk_pipeline::chunk_pipeline::ChunkPipeline;
//! use voxel_chunk_pipeline::chunk_pipeline::collider::HeadlessColliderBackend;
//! use voxel_chunk_pipeline::chunk_pipeline::gpu::ReferenceComputeBackend;
//! use voxel_chunk_pipeline::chunk_pipeline::rendering::HeadlessRenderer;
//! use voxel_chunk_pipeline::config::PipelineConfig;
//!
//! let config = PipelineConfig {
//!     chunk_logical_size: [8, 8, 8],
//!     spawn_radius: [0, 0],
//!     worker_threads: 0,
//!     ..Default::default()
//! };
//! let backend = ReferenceComputeBackend::new(config.terrain_seed);
//! let mut pipeline = ChunkPipeline::new(
//!     config,
//!     backend,
//!     HeadlessRenderer::new(),
//!     Arc::new(HeadlessColliderBackend::new()),
//! )
//! .unwrap();
//!
//! while !pipeline.is_settled() {
//!     pipeline.tick(Point3::new(0.0, 0.0, 0.0)).unwrap();
//! }
//! ```

pub mod collider;
pub mod gpu;
pub mod meshing;
pub mod rendering;
pub mod task_management;
pub mod voxels;

use std::collections::VecDeque;
use std::sync::Arc;

use cgmath::Point3;
use log::{debug, error, info, warn};
use web_time::{Duration, Instant};

use crate::config::{GenerationMode, PipelineConfig};
use crate::error::Result;

use collider::{ColliderBackend, ColliderBakeQueue};
use gpu::{BatchedReadback, CompletionQueue, ComputeBackend, GpuVoxelGenerator, ReadbackEvent};
use meshing::{MeshJobPool, SlotIndex};
use rendering::Renderer;
use task_management::TaskManager;
use voxels::edits::{self, EditOutcome, EditRequest};
use voxels::padding::PaddingReconciler;
use voxels::{ChunkKey, ChunkRecord, ChunkRegistry, ChunkRole, ChunkStage, StageEvent, VoxelCell, VoxelVolume};

/// The generator selected by `GenerationMode`.
enum VoxelGenerator {
    Single(GpuVoxelGenerator),
    Batched(BatchedReadback),
}

impl VoxelGenerator {
    fn new(config: &PipelineConfig) -> Self {
        match config.generation_mode {
            GenerationMode::Single => VoxelGenerator::Single(GpuVoxelGenerator::new(config)),
            GenerationMode::Batched { batch_size } => {
                VoxelGenerator::Batched(BatchedReadback::new(config, batch_size))
            }
        }
    }

    fn dispatch(
        &mut self,
        registry: &mut ChunkRegistry,
        backend: &mut dyn ComputeBackend,
    ) -> Result<usize> {
        match self {
            VoxelGenerator::Single(generator) => generator.dispatch(registry, backend),
            VoxelGenerator::Batched(batched) => batched.dispatch(registry, backend),
        }
    }

    fn resolve(
        &mut self,
        event: ReadbackEvent,
        registry: &mut ChunkRegistry,
        task_manager: &mut TaskManager,
    ) -> Result<()> {
        match self {
            VoxelGenerator::Single(generator) => generator.resolve(event, registry, task_manager),
            VoxelGenerator::Batched(batched) => batched.resolve(event, registry, task_manager),
        }
    }

    fn pending_count(&self) -> usize {
        match self {
            VoxelGenerator::Single(generator) => generator.pending_count(),
            VoxelGenerator::Batched(batched) => batched.pending_count(),
        }
    }
}

/// What one tick did.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub readbacks: usize,
    pub edits_applied: usize,
    pub spawned: usize,
    pub despawned: usize,
    pub dispatched: usize,
    pub padded: usize,
    pub padding_deferred: usize,
    pub meshes_finalized: usize,
    pub builds_started: usize,
    pub colliders_queued: usize,
    pub colliders_attached: usize,
    pub volumes_released: usize,
    pub elapsed: Duration,
}

/// Snapshot of the pipeline's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub chunks: usize,
    pub meshed_chunks: usize,
    pub request_gpu_data: usize,
    pub pending_gpu_data: usize,
    pub request_padding_update: usize,
    pub request_mesh: usize,
    pub meshing: usize,
    pub request_collider_bake: usize,
    pub baking_collider: usize,
    pub idle: usize,
    pub modified: usize,
    pub live_volumes: usize,
    pub retired_volumes: usize,
    pub busy_slots: usize,
    pub pending_gpu: usize,
    pub pending_colliders: usize,
    pub deferred_edits: usize,
    pub live_meshes: usize,
    pub live_colliders: usize,
}

pub struct ChunkPipeline<B: ComputeBackend, R: Renderer> {
    config: PipelineConfig,
    registry: ChunkRegistry,
    task_manager: TaskManager,
    backend: B,
    completions: CompletionQueue,
    generator: VoxelGenerator,
    padding: PaddingReconciler,
    mesh_pool: MeshJobPool,
    renderer: R,
    colliders: ColliderBakeQueue,
    retired_volumes: Vec<VoxelVolume>,
    deferred_edits: VecDeque<EditRequest>,
    ticks: u64,
}

impl<B: ComputeBackend, R: Renderer> ChunkPipeline<B, R> {
    /// Builds a pipeline around the given collaborators.
    ///
    /// # Arguments
    /// * `config` - Validated here; the pipeline never changes it afterwards
    /// * `backend` - Runs the voxel generation kernels
    /// * `renderer` - Receives finished meshes
    /// * `collider_backend` - Bakes colliders on worker threads
    ///
    /// # Returns
    /// The pipeline, or `PipelineError::Config` / `PipelineError::Io` if the
    /// configuration is invalid or the worker pool could not start
    pub fn new(
        config: PipelineConfig,
        backend: B,
        renderer: R,
        collider_backend: Arc<dyn ColliderBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let task_manager = TaskManager::new(config.worker_threads)?;
        info!(
            "Chunk pipeline: chunk size {:?}, spawn radius {:?}, {} mesh slots, {:?}",
            config.chunk_logical_size,
            config.spawn_radius,
            config.mesh_job_pool_size,
            config.generation_mode
        );

        Ok(Self {
            registry: ChunkRegistry::new(&config),
            generator: VoxelGenerator::new(&config),
            mesh_pool: MeshJobPool::new(&config),
            padding: PaddingReconciler::new(),
            colliders: ColliderBakeQueue::new(collider_backend),
            completions: CompletionQueue::new(),
            retired_volumes: Vec::new(),
            deferred_edits: VecDeque::new(),
            ticks: 0,
            task_manager,
            backend,
            renderer,
            config,
        })
    }

    /// Advances every stage of the pipeline once.
    ///
    /// # Arguments
    /// * `observer` - World-space position the loaded set is centred on
    pub fn tick(&mut self, observer: Point3<f32>) -> Result<TickReport> {
        let start = Instant::now();
        let mut report = TickReport::default();

        self.task_manager.process_completed_tasks();
        for event in self.completions.drain() {
            report.readbacks += 1;
            let id = event.id;
            if let Err(e) = self
                .generator
                .resolve(event, &mut self.registry, &mut self.task_manager)
            {
                warn!("Readback {} could not be applied: {e}", id.0);
            }
        }

        report.edits_applied = self.retry_deferred_edits();

        let spawn = self.registry.tick(observer)?;
        report.spawned = spawn.spawned;
        report.despawned = spawn.despawned.len();
        for key in spawn.demoted {
            self.release_outputs(key);
        }
        for record in spawn.despawned {
            self.dispose(record);
        }

        report.dispatched = self
            .generator
            .dispatch(&mut self.registry, &mut self.backend)?;
        self.backend.poll(&self.completions.sender());

        let padding = self.padding.run(&mut self.registry)?;
        report.padded = padding.reconciled;
        report.padding_deferred = padding.deferred;

        report.meshes_finalized = self.finalize_meshes()?;
        report.builds_started = self.start_mesh_builds()?;

        report.colliders_queued = self.queue_collider_bakes()?;
        report.colliders_attached = self.colliders.poll(&mut self.registry)?.attached;

        let retired = self.retired_volumes.len();
        self.retired_volumes.retain(|volume| !volume.is_idle());
        report.volumes_released = retired - self.retired_volumes.len();

        self.task_manager.process_queued_tasks();

        self.ticks += 1;
        report.elapsed = start.elapsed();
        Ok(report)
    }

    fn retry_deferred_edits(&mut self) -> usize {
        let mut applied = 0;
        for _ in 0..self.deferred_edits.len() {
            let Some(request) = self.deferred_edits.pop_front() else {
                break;
            };
            match edits::apply_edit(&mut self.registry, &request) {
                Ok(EditOutcome::Applied { .. }) => applied += 1,
                Ok(EditOutcome::Deferred) => self.deferred_edits.push_back(request),
                Err(e) => warn!("Dropping deferred {:?} edit at {:?}: {e}", request.kind, request.world_position),
            }
        }
        applied
    }

    /// Releases the renderer and collider resources of a live record.
    fn release_outputs(&mut self, key: ChunkKey) {
        let Some(record) = self.registry.get_live_mut(key) else {
            return;
        };
        if let Some(mesh) = record.mesh_handle.take() {
            self.renderer.release(mesh);
        }
        if let Some(collider) = record.collider_handle.take() {
            self.colliders.release(collider);
        }
        record.collider_geometry = None;
    }

    fn dispose(&mut self, mut record: ChunkRecord) {
        if let Some(mesh) = record.mesh_handle.take() {
            self.renderer.release(mesh);
        }
        if let Some(collider) = record.collider_handle.take() {
            self.colliders.release(collider);
        }
        if let Some(volume) = record.volume.take() {
            self.retired_volumes.push(volume);
        }
    }

    fn finalize_meshes(&mut self) -> Result<usize> {
        let mut finalized = 0;
        for slot in self.mesh_pool.poll_complete() {
            let bound = self.mesh_pool.slot_chunk(slot);
            let (key, mesh, stats) = match self.mesh_pool.finalize(slot) {
                Ok(result) => result,
                Err(e) => {
                    error!("Mesh slot {} failed to finalize: {e}", slot.0);
                    if let Some(record) = bound.and_then(|key| self.registry.get_live_mut(key)) {
                        if record.stage() == (ChunkStage::Meshing { slot }) {
                            record.apply(StageEvent::MeshJobFinished { has_geometry: false })?;
                        }
                    }
                    continue;
                }
            };
            finalized += 1;

            let Some(record) = self
                .registry
                .get_live_mut(key)
                .filter(|record| record.stage() == ChunkStage::Meshing { slot })
            else {
                debug!("Discarding mesh for departed chunk {} at {:?}", key.id, key.coordinate);
                continue;
            };

            if let Some(previous) = record.mesh_handle.take() {
                self.renderer.release(previous);
            }
            let has_geometry = !stats.is_empty && record.role == ChunkRole::Meshed;
            if has_geometry {
                let handle = self.renderer.upload(
                    record.coordinate,
                    &mesh.description,
                    self.config.terrain_material,
                );
                record.mesh_handle = Some(handle);
                record.collider_geometry = Some(mesh.collider_geometry());
            } else {
                if let Some(collider) = record.collider_handle.take() {
                    self.colliders.release(collider);
                }
                record.collider_geometry = None;
            }
            record.apply(StageEvent::MeshJobFinished { has_geometry })?;
        }
        Ok(finalized)
    }

    fn start_mesh_builds(&mut self) -> Result<usize> {
        let mut started = 0;
        for coordinate in self
            .registry
            .coordinates_in_stage(|stage| stage == ChunkStage::RequestMesh)
        {
            if self.mesh_pool.busy_count() >= self.mesh_pool.capacity() {
                break;
            }
            let Some(record) = self.registry.get_mut(coordinate) else {
                continue;
            };
            let key = record.key();
            let Some(volume) = record.volume.as_mut() else {
                continue;
            };
            let Some(slot) = self
                .mesh_pool
                .begin_build(key, volume, &mut self.task_manager)
            else {
                break;
            };
            record.apply(StageEvent::MeshJobStarted(slot))?;
            started += 1;
        }
        Ok(started)
    }

    fn queue_collider_bakes(&mut self) -> Result<usize> {
        let mut queued = 0;
        for coordinate in self
            .registry
            .coordinates_in_stage(|stage| stage == ChunkStage::RequestColliderBake)
        {
            let Some(record) = self.registry.get_mut(coordinate) else {
                continue;
            };
            let geometry = record.collider_geometry.take().unwrap_or_default();
            self.colliders
                .enqueue(record.key(), geometry, &mut self.task_manager);
            record.apply(StageEvent::ColliderBakeQueued)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Applies an edit now, or queues it until every touched volume is free.
    ///
    /// # Returns
    /// - `Ok(EditOutcome::Applied { .. })` if the voxels were written
    /// - `Ok(EditOutcome::Deferred)` if the edit was queued for a later tick
    /// - `Err(ChunkNotLoaded)` / `Err(VolumeNotPopulated)` if the target chunk
    ///   cannot be edited at all
    pub fn apply_edit(&mut self, request: EditRequest) -> Result<EditOutcome> {
        let outcome = edits::apply_edit(&mut self.registry, &request)?;
        if outcome == EditOutcome::Deferred {
            debug!("Deferring {:?} edit at {:?}", request.kind, request.world_position);
            self.deferred_edits.push_back(request);
        }
        Ok(outcome)
    }

    pub fn read_voxel(&self, world_position: Point3<f32>) -> Option<VoxelCell> {
        edits::read_voxel(&self.registry, world_position)
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stats = PipelineStats {
            chunks: self.registry.len(),
            retired_volumes: self.retired_volumes.len(),
            busy_slots: self.mesh_pool.busy_count(),
            pending_gpu: self.generator.pending_count(),
            pending_colliders: self.colliders.pending_len(),
            deferred_edits: self.deferred_edits.len(),
            live_meshes: self.renderer.live_meshes(),
            live_colliders: self.colliders.backend().live_colliders(),
            ..Default::default()
        };
        for record in self.registry.iter() {
            let counter = match record.stage() {
                ChunkStage::RequestGpuData => &mut stats.request_gpu_data,
                ChunkStage::PendingGpuData => &mut stats.pending_gpu_data,
                ChunkStage::RequestPaddingUpdate => &mut stats.request_padding_update,
                ChunkStage::RequestMesh => &mut stats.request_mesh,
                ChunkStage::Meshing { .. } => &mut stats.meshing,
                ChunkStage::RequestColliderBake => &mut stats.request_collider_bake,
                ChunkStage::BakingCollider => &mut stats.baking_collider,
                ChunkStage::Idle => &mut stats.idle,
            };
            *counter += 1;
            if record.role == ChunkRole::Meshed {
                stats.meshed_chunks += 1;
            }
            if record.is_modified() {
                stats.modified += 1;
            }
            if record.volume.is_some() {
                stats.live_volumes += 1;
            }
        }
        stats
    }

    /// Every chunk is `Idle`, nothing is queued or in flight and every retired volume is gone.
    pub fn is_settled(&self) -> bool {
        !self.registry.is_empty()
            && self
                .registry
                .iter()
                .all(|record| record.stage() == ChunkStage::Idle)
            && self.generator.pending_count() == 0
            && self.backend.in_flight() == 0
            && self.mesh_pool.busy_count() == 0
            && self.colliders.pending_len() == 0
            && self.deferred_edits.is_empty()
            && self.retired_volumes.is_empty()
            && self.task_manager.is_idle()
    }

    /// Ticks at a fixed observer until the pipeline settles.
    ///
    /// # Returns
    /// The number of ticks run, or `None` if `max_ticks` passed first
    pub fn run_until_settled(&mut self, observer: Point3<f32>, max_ticks: usize) -> Result<Option<usize>> {
        for tick in 0..max_ticks {
            self.tick(observer)?;
            if self.is_settled() {
                return Ok(Some(tick + 1));
            }
        }
        Ok(None)
    }

    /// Runs every queued CPU task to completion.
    pub fn flush(&mut self) {
        self.task_manager.drain();
    }

    pub fn chunk(&self, coordinate: Point3<i32>) -> Option<&ChunkRecord> {
        self.registry.get(coordinate)
    }

    pub fn registry(&self) -> &ChunkRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Slot currently building `coordinate`'s mesh.
    pub fn meshing_slot(&self, coordinate: Point3<i32>) -> Option<SlotIndex> {
        match self.registry.get(coordinate)?.stage() {
            ChunkStage::Meshing { slot } => Some(slot),
            _ => None,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
