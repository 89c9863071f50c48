//! # Collider Bake Queue
//!
//! Turns finished chunk meshes into physics colliders off the coordinating thread.
//!
//! `enqueue` publishes a `ColliderBakeTask` that hands the mesh to the
//! `ColliderBackend` and parks the resulting handle in a shared result cell. Each
//! tick `poll` collects the entries whose task completed and attaches the handle to
//! the chunk that asked for it. A chunk destroyed while its bake was running never
//! sees the result; the orphaned collider is released instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::chunk_pipeline::task_management::task::Task;
use crate::chunk_pipeline::task_management::TaskManager;
use crate::chunk_pipeline::voxels::chunk::chunk_stage::{ChunkStage, StageEvent};
use crate::chunk_pipeline::voxels::chunk::{ChunkKey, ChunkRole};
use crate::chunk_pipeline::voxels::registry::ChunkRegistry;
use crate::core::{JobHandle, MtResource};
use crate::error::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColliderHandle(pub u64);

/// Triangle soup handed to the collider backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColliderGeometry {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl ColliderGeometry {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// No complete triangle, or an index past the end of `positions`.
    pub fn is_degenerate(&self) -> bool {
        self.triangle_count() == 0
            || self
                .indices
                .iter()
                .any(|index| *index as usize >= self.positions.len())
    }
}

/// A physics engine that can build static triangle-mesh colliders.
///
/// Bakes run on worker threads, so implementations must be shareable.
pub trait ColliderBackend: Send + Sync {
    /// Builds a collider from an indexed triangle list.
    ///
    /// # Returns
    /// The new collider, or `None` if the geometry cannot form one
    fn bake(&self, positions: &[[f32; 3]], indices: &[u32]) -> Option<ColliderHandle>;

    fn release(&self, handle: ColliderHandle);

    fn live_colliders(&self) -> usize;
}

/// Backend that records colliders without simulating anything.
#[derive(Default)]
pub struct HeadlessColliderBackend {
    colliders: MtResource<HashMap<ColliderHandle, usize>>,
    next_handle: AtomicU64,
}

impl HeadlessColliderBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triangle count of a live collider.
    pub fn triangles(&self, handle: ColliderHandle) -> Option<usize> {
        self.colliders.get().get(&handle).copied()
    }
}

impl ColliderBackend for HeadlessColliderBackend {
    fn bake(&self, positions: &[[f32; 3]], indices: &[u32]) -> Option<ColliderHandle> {
        let geometry = ColliderGeometry {
            positions: positions.to_vec(),
            indices: indices.to_vec(),
        };
        if geometry.is_degenerate() {
            return None;
        }
        let handle = ColliderHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.colliders
            .get_mut()
            .insert(handle, geometry.triangle_count());
        Some(handle)
    }

    fn release(&self, handle: ColliderHandle) {
        if self.colliders.get_mut().remove(&handle).is_none() {
            warn!("Released unknown collider {}", handle.0);
        }
    }

    fn live_colliders(&self) -> usize {
        self.colliders.get().len()
    }
}

/// Bakes one chunk's collider on a worker.
pub struct ColliderBakeTask {
    backend: Arc<dyn ColliderBackend>,
    geometry: ColliderGeometry,
    result: MtResource<Option<ColliderHandle>>,
}

impl Task for ColliderBakeTask {
    fn name(&self) -> &'static str {
        "collider bake"
    }

    fn process(self: Box<Self>) {
        let handle = self
            .backend
            .bake(&self.geometry.positions, &self.geometry.indices);
        *self.result.get_mut() = handle;
    }
}

struct PendingBake {
    chunk: ChunkKey,
    handle: JobHandle,
    result: MtResource<Option<ColliderHandle>>,
}

/// What one `poll` did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColliderReport {
    pub attached: usize,
    /// Bakes that finished after their chunk was destroyed or rebuilt.
    pub orphaned: usize,
}

pub struct ColliderBakeQueue {
    backend: Arc<dyn ColliderBackend>,
    pending: Vec<PendingBake>,
}

impl ColliderBakeQueue {
    pub fn new(backend: Arc<dyn ColliderBackend>) -> Self {
        Self {
            backend,
            pending: Vec::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ColliderBackend> {
        &self.backend
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Schedules a bake of `geometry` for `chunk`.
    pub fn enqueue(
        &mut self,
        chunk: ChunkKey,
        geometry: ColliderGeometry,
        task_manager: &mut TaskManager,
    ) {
        let result = MtResource::new(None);
        let task = ColliderBakeTask {
            backend: self.backend.clone(),
            geometry,
            result: result.clone(),
        };
        let handle = task_manager.publish_task(Box::new(task), JobHandle::completed());
        self.pending.push(PendingBake {
            chunk,
            handle,
            result,
        });
    }

    /// Attaches every finished bake to its chunk.
    ///
    /// A chunk receiving a collider releases the one it held before. Results for
    /// chunks that are gone, no longer waiting for this bake, or demoted to halo
    /// are released.
    pub fn poll(&mut self, registry: &mut ChunkRegistry) -> Result<ColliderReport> {
        let mut report = ColliderReport::default();
        let mut index = 0;
        while index < self.pending.len() {
            if !self.pending[index].handle.is_complete() {
                index += 1;
                continue;
            }

            let finished = self.pending.swap_remove(index);
            let collider = finished.result.get_mut().take();
            let record = registry
                .get_live_mut(finished.chunk)
                .filter(|record| record.stage() == ChunkStage::BakingCollider);

            match record {
                Some(record) => {
                    let collider = match (record.role, collider) {
                        (ChunkRole::Halo, Some(unwanted)) => {
                            self.backend.release(unwanted);
                            None
                        }
                        (_, collider) => collider,
                    };
                    if let Some(previous) = std::mem::replace(&mut record.collider_handle, collider) {
                        self.backend.release(previous);
                    }
                    record.apply(StageEvent::ColliderAttached)?;
                    report.attached += 1;
                }
                None => {
                    debug!(
                        "Discarding collider for departed chunk {} at {:?}",
                        finished.chunk.id, finished.chunk.coordinate
                    );
                    if let Some(orphan) = collider {
                        self.backend.release(orphan);
                    }
                    report.orphaned += 1;
                }
            }
        }
        Ok(report)
    }

    pub fn release(&self, handle: ColliderHandle) {
        self.backend.release(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_pipeline::meshing::SlotIndex;
    use crate::chunk_pipeline::voxels::registry::RegistryCommand;
    use crate::chunk_pipeline::voxels::volume::VoxelVolume;
    use crate::config::PipelineConfig;
    use cgmath::{Point3, Vector3};

    fn triangle() -> ColliderGeometry {
        ColliderGeometry {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            indices: vec![0, 1, 2],
        }
    }

    /// A single-chunk registry whose chunk is waiting in `BakingCollider`.
    fn baking_registry() -> (ChunkRegistry, ChunkKey) {
        let mut registry = ChunkRegistry::new(&PipelineConfig {
            chunk_logical_size: [4, 4, 4],
            spawn_radius: [0, 0],
            ..Default::default()
        });
        registry.tick(Point3::new(0.0, 0.0, 0.0)).unwrap();
        let record = registry.get_mut(Point3::new(0, 0, 0)).unwrap();
        record.volume = Some(VoxelVolume::new(Vector3::new(4, 4, 4)));
        for event in [
            StageEvent::GpuRequestIssued,
            StageEvent::GpuDataReady,
            StageEvent::PaddingComplete,
            StageEvent::MeshJobStarted(SlotIndex(0)),
            StageEvent::MeshJobFinished { has_geometry: true },
            StageEvent::ColliderBakeQueued,
        ] {
            record.apply(event).unwrap();
        }
        let key = record.key();
        (registry, key)
    }

    #[test]
    fn test_headless_backend_rejects_degenerate_geometry() {
        let backend = HeadlessColliderBackend::new();
        assert!(backend.bake(&[], &[]).is_none());
        assert!(backend.bake(&[[0.0; 3]], &[0, 1, 2]).is_none());

        let geometry = triangle();
        let handle = backend.bake(&geometry.positions, &geometry.indices).unwrap();
        assert_eq!(backend.triangles(handle), Some(1));
        assert_eq!(backend.live_colliders(), 1);
        backend.release(handle);
        assert_eq!(backend.live_colliders(), 0);
    }

    #[test]
    fn test_finished_bake_attaches_and_settles() {
        let backend = Arc::new(HeadlessColliderBackend::new());
        let mut queue = ColliderBakeQueue::new(backend.clone());
        let mut tasks = TaskManager::new(0).unwrap();
        let (mut registry, key) = baking_registry();

        queue.enqueue(key, triangle(), &mut tasks);
        assert_eq!(queue.poll(&mut registry).unwrap(), ColliderReport::default());
        assert_eq!(queue.pending_len(), 1);

        tasks.process_queued_tasks();
        let report = queue.poll(&mut registry).unwrap();
        assert_eq!(report.attached, 1);
        assert_eq!(queue.pending_len(), 0);

        let record = registry.get_live(key).unwrap();
        assert_eq!(record.stage(), ChunkStage::Idle);
        assert!(record.collider_handle.is_some());
        assert_eq!(backend.live_colliders(), 1);
    }

    #[test]
    fn test_rebake_releases_previous_collider() {
        let backend = Arc::new(HeadlessColliderBackend::new());
        let mut queue = ColliderBakeQueue::new(backend.clone());
        let mut tasks = TaskManager::new(0).unwrap();
        let (mut registry, key) = baking_registry();
        let stale = backend.bake(&triangle().positions, &triangle().indices).unwrap();
        registry.get_live_mut(key).unwrap().collider_handle = Some(stale);

        queue.enqueue(key, triangle(), &mut tasks);
        tasks.process_queued_tasks();
        queue.poll(&mut registry).unwrap();

        assert_eq!(backend.live_colliders(), 1);
        assert_eq!(backend.triangles(stale), None);
        assert_ne!(registry.get_live(key).unwrap().collider_handle, Some(stale));
    }

    #[test]
    fn test_orphaned_bake_is_released() {
        let backend = Arc::new(HeadlessColliderBackend::new());
        let mut queue = ColliderBakeQueue::new(backend.clone());
        let mut tasks = TaskManager::new(0).unwrap();
        let (mut registry, key) = baking_registry();

        queue.enqueue(key, triangle(), &mut tasks);
        registry.apply_commands(vec![RegistryCommand::Despawn(key.coordinate)]).unwrap();
        tasks.process_queued_tasks();

        let report = queue.poll(&mut registry).unwrap();
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.attached, 0);
        assert_eq!(backend.live_colliders(), 0);
    }

    #[test]
    fn test_degenerate_mesh_still_settles() {
        let backend = Arc::new(HeadlessColliderBackend::new());
        let mut queue = ColliderBakeQueue::new(backend.clone());
        let mut tasks = TaskManager::new(0).unwrap();
        let (mut registry, key) = baking_registry();

        queue.enqueue(key, ColliderGeometry::default(), &mut tasks);
        tasks.process_queued_tasks();
        queue.poll(&mut registry).unwrap();

        let record = registry.get_live(key).unwrap();
        assert_eq!(record.stage(), ChunkStage::Idle);
        assert!(record.collider_handle.is_none());
    }
}
