//! # Batched Readback
//!
//! Generates several chunks with one `generate_voxels_batched` dispatch. The
//! voxel buffer holds one padded volume per chunk in transform order and the
//! counter buffer one `SignCounters` per chunk. A batch resolves once both
//! readbacks have arrived; a failure of either sends every chunk of the batch
//! back to `RequestGpuData`.

use std::collections::HashMap;
use std::sync::Arc;

use cgmath::Vector3;
use log::{debug, error, warn};

use crate::chunk_pipeline::task_management::TaskManager;
use crate::chunk_pipeline::voxels::chunk::chunk_stage::{ChunkStage, StageEvent};
use crate::chunk_pipeline::voxels::chunk::ChunkKey;
use crate::chunk_pipeline::voxels::registry::ChunkRegistry;
use crate::chunk_pipeline::voxels::tasks::schedule_volume_copy;
use crate::chunk_pipeline::voxels::volume::PaddedGrid;
use crate::chunk_pipeline::voxels::voxel_cell::VoxelCell;
use crate::config::PipelineConfig;
use crate::error::Result;

use super::{
    ChunkTransform, ComputeBackend, DispatchRequest, KernelUniforms, ReadbackEvent, ReadbackId,
    ReadbackKind, ReadbackPayload, SeedUniforms, SignCounters, GENERATE_VOXELS_BATCHED_KERNEL,
};

enum Arrival<T> {
    Waiting,
    Ready(T),
    Failed(String),
}

impl<T> Arrival<T> {
    fn has_arrived(&self) -> bool {
        !matches!(self, Arrival::Waiting)
    }
}

struct PendingBatch {
    chunks: Vec<ChunkKey>,
    voxels: Arrival<Arc<Vec<VoxelCell>>>,
    counters: Arrival<Vec<SignCounters>>,
}

pub struct BatchedReadback {
    batches: HashMap<ReadbackId, PendingBatch>,
    batch_size: usize,
    max_pending: usize,
    chunk_size: Vector3<i32>,
    cells_per_chunk: usize,
    seeds: SeedUniforms,
}

impl BatchedReadback {
    /// # Arguments
    /// * `config` - Pipeline configuration, for chunk size, seed and the concurrency cap
    /// * `batch_size` - Most chunks per dispatch
    pub fn new(config: &PipelineConfig, batch_size: usize) -> Self {
        Self {
            batches: HashMap::new(),
            batch_size: batch_size.max(1),
            max_pending: config.max_concurrent_gpu_requests,
            chunk_size: config.chunk_size(),
            cells_per_chunk: PaddedGrid::new(config.chunk_size()).cell_count(),
            seeds: config.terrain_seed.expand(),
        }
    }

    /// Chunks waiting in unresolved batches.
    pub fn pending_count(&self) -> usize {
        self.batches.values().map(|batch| batch.chunks.len()).sum()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Groups `RequestGpuData` chunks, nearest first, into batches until the
    /// concurrency cap is reached.
    ///
    /// # Returns
    /// Number of chunks dispatched
    pub fn dispatch(
        &mut self,
        registry: &mut ChunkRegistry,
        backend: &mut dyn ComputeBackend,
    ) -> Result<usize> {
        let capacity = self.max_pending.saturating_sub(self.pending_count());
        let candidates: Vec<_> = registry
            .coordinates_in_stage(|stage| stage == ChunkStage::RequestGpuData)
            .into_iter()
            .take(capacity)
            .collect();

        let mut dispatched = 0;
        for group in candidates.chunks(self.batch_size) {
            let transforms: Vec<ChunkTransform> = group
                .iter()
                .map(|coordinate| ChunkTransform::for_chunk(*coordinate, self.chunk_size))
                .collect();
            let request = DispatchRequest {
                kernel: GENERATE_VOXELS_BATCHED_KERNEL.to_string(),
                uniforms: KernelUniforms::new(group[0], self.chunk_size, self.seeds, group.len()),
                transforms,
                read_counters: true,
            };

            let id = match backend.dispatch(request) {
                Ok(id) => id,
                Err(e) => {
                    error!("Batched dispatch of {} chunks failed: {e}", group.len());
                    break;
                }
            };

            let mut chunks = Vec::with_capacity(group.len());
            for coordinate in group {
                if let Some(record) = registry.get_mut(*coordinate) {
                    record.apply(StageEvent::GpuRequestIssued)?;
                    chunks.push(record.key());
                }
            }
            dispatched += chunks.len();
            self.batches.insert(
                id,
                PendingBatch {
                    chunks,
                    voxels: Arrival::Waiting,
                    counters: Arrival::Waiting,
                },
            );
        }

        if dispatched > 0 {
            debug!(
                "Dispatched {dispatched} chunks in batches, {} batches pending",
                self.batches.len()
            );
        }
        Ok(dispatched)
    }

    /// Records one readback and resolves its batch once both halves are in.
    ///
    /// Every chunk of a resolved batch is handled even if some of them fail. The
    /// first failure is returned after the whole batch has been processed.
    pub fn resolve(
        &mut self,
        event: ReadbackEvent,
        registry: &mut ChunkRegistry,
        task_manager: &mut TaskManager,
    ) -> Result<()> {
        let Some(batch) = self.batches.get_mut(&event.id) else {
            return Ok(());
        };

        match event.payload {
            ReadbackPayload::Voxels(cells) => batch.voxels = Arrival::Ready(Arc::new(cells)),
            ReadbackPayload::SignCounters(counters) => batch.counters = Arrival::Ready(counters),
            ReadbackPayload::Failed { kind, reason } => match kind {
                ReadbackKind::Voxels => batch.voxels = Arrival::Failed(reason),
                ReadbackKind::SignCounters => batch.counters = Arrival::Failed(reason),
            },
        }

        if !(batch.voxels.has_arrived() && batch.counters.has_arrived()) {
            return Ok(());
        }
        let Some(batch) = self.batches.remove(&event.id) else {
            return Ok(());
        };

        let mut first_error = None;
        match (batch.voxels, batch.counters) {
            (Arrival::Ready(voxels), Arrival::Ready(counters)) => {
                for (index, key) in batch.chunks.iter().enumerate() {
                    let Some(record) = registry
                        .get_live_mut(*key)
                        .filter(|record| record.stage() == ChunkStage::PendingGpuData)
                    else {
                        debug!("Discarding batched voxels for departed chunk {}", key.id);
                        continue;
                    };
                    record.sign_counters = counters.get(index).copied();
                    let range = index * self.cells_per_chunk..(index + 1) * self.cells_per_chunk;
                    if let Err(e) = schedule_volume_copy(
                        record,
                        event.id,
                        voxels.clone(),
                        range,
                        self.chunk_size,
                        task_manager,
                    ) {
                        warn!("Batched chunk {} rejected: {e}", key.id);
                        first_error.get_or_insert(e);
                    }
                }
            }
            (voxels, counters) => {
                let reason = match (voxels, counters) {
                    (Arrival::Failed(reason), _) | (_, Arrival::Failed(reason)) => Some(reason),
                    _ => None,
                };
                warn!(
                    "Batch {} of {} chunks failed: {}",
                    event.id.0,
                    batch.chunks.len(),
                    reason.unwrap_or_default()
                );
                for key in &batch.chunks {
                    if let Some(record) = registry
                        .get_live_mut(*key)
                        .filter(|record| record.stage() == ChunkStage::PendingGpuData)
                    {
                        if let Err(e) = record.apply(StageEvent::GpuDataFailed) {
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_pipeline::gpu::reference_backend::ReferenceComputeBackend;
    use crate::chunk_pipeline::gpu::{CompletionQueue, GENERATE_VOXELS_KERNEL};
    use crate::chunk_pipeline::voxels::registry::RegistryCommand;
    use crate::error::PipelineError;
    use cgmath::Point3;

    fn setup(cap: usize) -> (PipelineConfig, ChunkRegistry) {
        let config = PipelineConfig {
            chunk_logical_size: [4, 4, 4],
            spawn_radius: [0, 0],
            max_concurrent_gpu_requests: cap,
            ..Default::default()
        };
        let mut registry = ChunkRegistry::new(&config);
        registry.tick(Point3::new(0.0, 0.0, 0.0)).unwrap();
        (config, registry)
    }

    fn count(registry: &ChunkRegistry, stage: ChunkStage) -> usize {
        registry.iter().filter(|record| record.stage() == stage).count()
    }

    #[test]
    fn test_batches_split_at_batch_size_and_cap() {
        let (config, mut registry) = setup(10);
        let mut backend = ReferenceComputeBackend::new(config.terrain_seed);
        let mut batched = BatchedReadback::new(&config, 4);

        let dispatched = batched.dispatch(&mut registry, &mut backend).unwrap();
        assert_eq!(dispatched, 10);
        assert_eq!(batched.batch_count(), 3);
        assert_eq!(batched.pending_count(), 10);
        assert_eq!(backend.dispatch_count(), 3);
        assert_eq!(batched.dispatch(&mut registry, &mut backend).unwrap(), 0);
    }

    #[test]
    fn test_batch_waits_for_both_readbacks() {
        let (config, mut registry) = setup(8);
        let mut backend = ReferenceComputeBackend::new(config.terrain_seed);
        let mut batched = BatchedReadback::new(&config, 8);
        let mut tasks = TaskManager::new(0).unwrap();
        let queue = CompletionQueue::new();

        batched.dispatch(&mut registry, &mut backend).unwrap();
        backend.poll(&queue.sender());
        let mut events = queue.drain().into_iter();

        let voxels = events.next().unwrap();
        assert_eq!(voxels.payload.kind(), ReadbackKind::Voxels);
        batched.resolve(voxels, &mut registry, &mut tasks).unwrap();
        assert_eq!(count(&registry, ChunkStage::PendingGpuData), 8);

        let counters = events.next().unwrap();
        batched.resolve(counters, &mut registry, &mut tasks).unwrap();
        tasks.process_queued_tasks();
        assert_eq!(count(&registry, ChunkStage::PendingGpuData), 0);
        assert_eq!(batched.pending_count(), 0);

        let with_counters = registry
            .iter()
            .filter(|record| record.sign_counters.is_some())
            .count();
        assert_eq!(with_counters, 8);
        for record in registry.iter().filter(|record| record.sign_counters.is_some()) {
            let counters = record.sign_counters.unwrap();
            assert_eq!((counters.positive + counters.negative) as usize, 216);
        }
    }

    #[test]
    fn test_batched_volume_matches_single_dispatch() {
        let (config, mut registry) = setup(27);
        let mut backend = ReferenceComputeBackend::new(config.terrain_seed);
        let mut batched = BatchedReadback::new(&config, 27);
        let mut tasks = TaskManager::new(0).unwrap();
        let queue = CompletionQueue::new();

        batched.dispatch(&mut registry, &mut backend).unwrap();
        backend.poll(&queue.sender());
        for event in queue.drain() {
            batched.resolve(event, &mut registry, &mut tasks).unwrap();
        }
        tasks.process_queued_tasks();

        let coordinate = Point3::new(1, -1, 0);
        let size = config.chunk_size();
        backend
            .dispatch(DispatchRequest {
                kernel: GENERATE_VOXELS_KERNEL.to_string(),
                uniforms: KernelUniforms::new(coordinate, size, config.terrain_seed.expand(), 1),
                transforms: vec![ChunkTransform::for_chunk(coordinate, size)],
                read_counters: false,
            })
            .unwrap();
        backend.poll(&queue.sender());
        let single = match queue.drain().pop().unwrap().payload {
            ReadbackPayload::Voxels(cells) => cells,
            other => panic!("unexpected payload {other:?}"),
        };

        let record = registry.get(coordinate).unwrap();
        let cells = record.volume.as_ref().unwrap().cells();
        assert_eq!(*cells.get(), single);
    }

    #[test]
    fn test_failed_batch_returns_every_chunk() {
        let (config, mut registry) = setup(6);
        let mut backend = ReferenceComputeBackend::new(config.terrain_seed);
        let mut batched = BatchedReadback::new(&config, 6);
        let mut tasks = TaskManager::new(0).unwrap();
        let queue = CompletionQueue::new();
        backend.fault_injector().fail_next_readbacks(1);

        batched.dispatch(&mut registry, &mut backend).unwrap();
        backend.poll(&queue.sender());
        for event in queue.drain() {
            batched.resolve(event, &mut registry, &mut tasks).unwrap();
        }

        assert_eq!(batched.pending_count(), 0);
        assert_eq!(count(&registry, ChunkStage::RequestGpuData), registry.len());
        assert!(registry.iter().all(|record| record.volume.is_none()));
    }

    #[test]
    fn test_short_batch_rejects_only_the_uncovered_chunk() {
        let (config, mut registry) = setup(3);
        let mut backend = ReferenceComputeBackend::new(config.terrain_seed);
        let mut batched = BatchedReadback::new(&config, 3);
        let mut tasks = TaskManager::new(0).unwrap();
        let queue = CompletionQueue::new();

        batched.dispatch(&mut registry, &mut backend).unwrap();
        let waiting = count(&registry, ChunkStage::RequestGpuData);
        backend.poll(&queue.sender());
        let mut results = Vec::new();
        for mut event in queue.drain() {
            if let ReadbackPayload::Voxels(cells) = &mut event.payload {
                cells.truncate(2 * batched.cells_per_chunk);
            }
            results.push(batched.resolve(event, &mut registry, &mut tasks));
        }
        tasks.process_queued_tasks();

        assert!(results
            .iter()
            .any(|result| matches!(result, Err(PipelineError::Readback { .. }))));
        assert_eq!(batched.pending_count(), 0);
        assert_eq!(count(&registry, ChunkStage::PendingGpuData), 0);
        assert_eq!(count(&registry, ChunkStage::RequestGpuData), waiting + 1);
        assert_eq!(registry.iter().filter(|record| record.volume.is_some()).count(), 2);
    }

    #[test]
    fn test_departed_chunks_are_skipped() {
        let (config, mut registry) = setup(3);
        let mut backend = ReferenceComputeBackend::new(config.terrain_seed);
        let mut batched = BatchedReadback::new(&config, 3);
        let mut tasks = TaskManager::new(0).unwrap();
        let queue = CompletionQueue::new();

        batched.dispatch(&mut registry, &mut backend).unwrap();
        let gone = registry.coordinates_in_stage(|stage| stage == ChunkStage::PendingGpuData)[0];
        registry.apply_commands(vec![RegistryCommand::Despawn(gone)]).unwrap();

        backend.poll(&queue.sender());
        for event in queue.drain() {
            batched.resolve(event, &mut registry, &mut tasks).unwrap();
        }
        tasks.process_queued_tasks();

        assert!(!registry.contains(gone));
        let populated = registry
            .iter()
            .filter(|record| record.has_populated_volume())
            .count();
        assert_eq!(populated, 2);
    }
}
