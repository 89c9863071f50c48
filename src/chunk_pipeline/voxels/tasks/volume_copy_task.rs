//! # Volume Copy Task
//!
//! Moves one chunk's slice of a readback buffer into the chunk's volume. A single
//! readback buffer may hold many chunks (batched generation); each chunk gets its
//! own copy task over its own range, all sharing the buffer through an `Arc`.

use std::ops::Range;
use std::sync::Arc;

use cgmath::Vector3;
use log::warn;

use crate::chunk_pipeline::gpu::ReadbackId;
use crate::chunk_pipeline::task_management::{task::Task, TaskManager};
use crate::chunk_pipeline::voxels::chunk::chunk_stage::StageEvent;
use crate::chunk_pipeline::voxels::chunk::ChunkRecord;
use crate::chunk_pipeline::voxels::volume::{PaddedGrid, VoxelVolume};
use crate::chunk_pipeline::voxels::voxel_cell::VoxelCell;
use crate::core::MtResource;
use crate::error::{PipelineError, Result};

pub struct VolumeCopyTask {
    source: Arc<Vec<VoxelCell>>,
    range: Range<usize>,
    destination: MtResource<Vec<VoxelCell>>,
}

impl VolumeCopyTask {
    /// # Arguments
    /// * `source` - Readback buffer shared by every chunk of the dispatch
    /// * `range` - This chunk's cells within `source`
    /// * `destination` - The chunk's padded cell buffer
    pub fn new(
        source: Arc<Vec<VoxelCell>>,
        range: Range<usize>,
        destination: MtResource<Vec<VoxelCell>>,
    ) -> Self {
        Self {
            source,
            range,
            destination,
        }
    }
}

impl Task for VolumeCopyTask {
    fn name(&self) -> &'static str {
        "volume copy"
    }

    fn process(self: Box<Self>) {
        let mut destination = self.destination.get_mut();
        let Some(source) = self.source.get(self.range.clone()) else {
            warn!(
                "Readback range {:?} exceeds buffer of {} cells",
                self.range,
                self.source.len()
            );
            return;
        };

        if source.len() != destination.len() {
            warn!(
                "Readback slice has {} cells, volume expects {}",
                source.len(),
                destination.len()
            );
        }
        let count = source.len().min(destination.len());
        destination[..count].copy_from_slice(&source[..count]);
    }
}

/// Lands readback data on a chunk: allocates or resizes its volume, schedules the
/// copy behind the volume's access handle, and moves the chunk to padding.
///
/// A slice that is out of bounds or does not hold exactly one padded volume is
/// rejected before anything is scheduled. The chunk goes back to `RequestGpuData`
/// and `PipelineError::Readback` is returned.
///
/// # Arguments
/// * `record` - A chunk in `PendingGpuData`
/// * `readback` - Readback the data came from
/// * `source` - Shared readback buffer
/// * `range` - The chunk's slice of `source`
/// * `chunk_size` - Logical chunk size from the configuration
/// * `task_manager` - Pool the copy runs on
pub fn schedule_volume_copy(
    record: &mut ChunkRecord,
    readback: ReadbackId,
    source: Arc<Vec<VoxelCell>>,
    range: Range<usize>,
    chunk_size: Vector3<i32>,
    task_manager: &mut TaskManager,
) -> Result<()> {
    let expected = PaddedGrid::new(chunk_size).cell_count();
    if range.end > source.len() || range.len() != expected {
        record.apply(StageEvent::GpuDataFailed)?;
        return Err(PipelineError::Readback {
            id: readback.0,
            reason: format!(
                "cells {:?} of a {}-cell buffer, chunk {:?} needs {expected}",
                range,
                source.len(),
                record.coordinate
            ),
        });
    }

    let volume = record
        .volume
        .get_or_insert_with(|| VoxelVolume::new(chunk_size));
    volume.resize(chunk_size);

    let dependency = volume.access_handle();
    let handle = task_manager.publish_task(
        Box::new(VolumeCopyTask::new(source, range, volume.cells())),
        dependency,
    );
    volume.set_pending_write(handle);

    record.apply(StageEvent::GpuDataReady)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_pipeline::voxels::chunk::{ChunkId, ChunkRole};
    use crate::chunk_pipeline::voxels::chunk::chunk_stage::ChunkStage;
    use cgmath::Point3;

    #[test]
    fn test_copies_slice_into_fresh_volume() {
        let size = Vector3::new(2, 2, 2);
        let cells = 64;
        let mut task_manager = TaskManager::new(0).unwrap();
        let mut record = ChunkRecord::new(ChunkId(3), Point3::new(0, 0, 0), ChunkRole::Meshed);
        record.apply(StageEvent::GpuRequestIssued).unwrap();

        let mut buffer = vec![VoxelCell::AIR; cells * 2];
        buffer[cells..].fill(VoxelCell::block(4));

        schedule_volume_copy(
            &mut record,
            ReadbackId(1),
            Arc::new(buffer),
            cells..cells * 2,
            size,
            &mut task_manager,
        )
        .unwrap();
        assert_eq!(record.stage(), ChunkStage::RequestPaddingUpdate);

        let volume = record.volume.as_ref().unwrap();
        assert!(!volume.is_idle());
        task_manager.process_queued_tasks();
        assert!(volume.is_idle());
        assert!(volume.cells().get().iter().all(|cell| *cell == VoxelCell::block(4)));
    }

    fn pending_record() -> ChunkRecord {
        let mut record = ChunkRecord::new(ChunkId(8), Point3::new(0, 0, 0), ChunkRole::Meshed);
        record.apply(StageEvent::GpuRequestIssued).unwrap();
        record
    }

    #[test]
    fn test_short_readback_is_rejected_and_retried() {
        let mut task_manager = TaskManager::new(0).unwrap();
        let mut record = pending_record();

        let result = schedule_volume_copy(
            &mut record,
            ReadbackId(2),
            Arc::new(vec![VoxelCell::block(1); 10]),
            0..10,
            Vector3::new(2, 2, 2),
            &mut task_manager,
        );
        assert!(matches!(result, Err(PipelineError::Readback { id: 2, .. })));
        assert_eq!(record.stage(), ChunkStage::RequestGpuData);
        assert!(record.volume.is_none());
        assert!(task_manager.is_idle());
    }

    #[test]
    fn test_out_of_bounds_batch_slice_is_rejected() {
        let mut task_manager = TaskManager::new(0).unwrap();
        let mut record = pending_record();

        let result = schedule_volume_copy(
            &mut record,
            ReadbackId(3),
            Arc::new(vec![VoxelCell::AIR; 64]),
            64..128,
            Vector3::new(2, 2, 2),
            &mut task_manager,
        );
        assert!(matches!(result, Err(PipelineError::Readback { id: 3, .. })));
        assert_eq!(record.stage(), ChunkStage::RequestGpuData);
        assert_eq!(task_manager.queued_len(), 0);
    }
}
