//! One compute dispatch per chunk.

use std::collections::HashMap;
use std::sync::Arc;

use cgmath::Vector3;
use log::{debug, error, warn};

use crate::chunk_pipeline::task_management::TaskManager;
use crate::chunk_pipeline::voxels::chunk::chunk_stage::{ChunkStage, StageEvent};
use crate::chunk_pipeline::voxels::chunk::ChunkKey;
use crate::chunk_pipeline::voxels::registry::ChunkRegistry;
use crate::chunk_pipeline::voxels::tasks::schedule_volume_copy;
use crate::config::PipelineConfig;
use crate::error::Result;

use super::{
    ChunkTransform, ComputeBackend, DispatchRequest, KernelUniforms, ReadbackEvent, ReadbackId,
    ReadbackPayload, SeedUniforms, GENERATE_VOXELS_KERNEL,
};

pub struct GpuVoxelGenerator {
    pending: HashMap<ReadbackId, ChunkKey>,
    max_pending: usize,
    chunk_size: Vector3<i32>,
    seeds: SeedUniforms,
}

impl GpuVoxelGenerator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            pending: HashMap::new(),
            max_pending: config.max_concurrent_gpu_requests,
            chunk_size: config.chunk_size(),
            seeds: config.terrain_seed.expand(),
        }
    }

    /// Issues a dispatch for every `RequestGpuData` chunk, nearest first, until the
    /// concurrency cap is reached.
    ///
    /// A backend error stops dispatching for this tick. The chunk that failed keeps
    /// its stage and is picked up again on the next call.
    ///
    /// # Returns
    /// Number of dispatches issued
    pub fn dispatch(
        &mut self,
        registry: &mut ChunkRegistry,
        backend: &mut dyn ComputeBackend,
    ) -> Result<usize> {
        let capacity = self.max_pending.saturating_sub(self.pending.len());
        if capacity == 0 {
            return Ok(0);
        }

        let mut issued = 0;
        for coordinate in registry
            .coordinates_in_stage(|stage| stage == ChunkStage::RequestGpuData)
            .into_iter()
            .take(capacity)
        {
            let request = DispatchRequest {
                kernel: GENERATE_VOXELS_KERNEL.to_string(),
                uniforms: KernelUniforms::new(coordinate, self.chunk_size, self.seeds, 1),
                transforms: vec![ChunkTransform::for_chunk(coordinate, self.chunk_size)],
                read_counters: false,
            };

            let id = match backend.dispatch(request) {
                Ok(id) => id,
                Err(e) => {
                    error!("Voxel dispatch for chunk {coordinate:?} failed: {e}");
                    break;
                }
            };

            if let Some(record) = registry.get_mut(coordinate) {
                record.apply(StageEvent::GpuRequestIssued)?;
                self.pending.insert(id, record.key());
                issued += 1;
            }
        }

        if issued > 0 {
            debug!("Issued {issued} voxel dispatches, {} pending", self.pending.len());
        }
        Ok(issued)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Applies one readback event to the chunk that requested it.
    ///
    /// Results for destroyed chunks are discarded. A failed readback sends the
    /// chunk back to `RequestGpuData`.
    pub fn resolve(
        &mut self,
        event: ReadbackEvent,
        registry: &mut ChunkRegistry,
        task_manager: &mut TaskManager,
    ) -> Result<()> {
        if matches!(event.payload, ReadbackPayload::SignCounters(_)) {
            return Ok(());
        }
        let Some(key) = self.pending.remove(&event.id) else {
            return Ok(());
        };
        let Some(record) = registry
            .get_live_mut(key)
            .filter(|record| record.stage() == ChunkStage::PendingGpuData)
        else {
            debug!("Discarding readback {} for departed chunk {}", event.id.0, key.id);
            return Ok(());
        };

        match event.payload {
            ReadbackPayload::Voxels(cells) => {
                let range = 0..cells.len();
                schedule_volume_copy(
                    record,
                    event.id,
                    Arc::new(cells),
                    range,
                    self.chunk_size,
                    task_manager,
                )
            }
            ReadbackPayload::Failed { kind, reason } => {
                warn!(
                    "{kind:?} readback {} for chunk {:?} failed: {reason}",
                    event.id.0, key.coordinate
                );
                record.apply(StageEvent::GpuDataFailed)?;
                Ok(())
            }
            ReadbackPayload::SignCounters(_) => Ok(()),
        }
    }
}
