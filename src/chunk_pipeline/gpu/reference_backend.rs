//! # Reference Compute Backend
//!
//! Runs the generation kernels on the CPU. Dispatches are queued and executed
//! during `poll()`, the way a GPU queue fires its map callbacks while the device
//! is polled, so the coordinator sees the same one-tick latency as with a device.
//!
//! The terrain function is a height field from two octaves of Perlin noise with
//! 3D Perlin detail near the surface. Coordinates are shifted by the permutation
//! seed and wrapped by the modulo seed before sampling.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cgmath::Vector3;
use log::{debug, warn};
use noise::{NoiseFn, Perlin};

use crate::chunk_pipeline::voxels::volume::PaddedGrid;
use crate::chunk_pipeline::voxels::voxel_cell::VoxelCell;
use crate::error::{PipelineError, Result};

use super::{
    ChunkTransform, CompletionSender, ComputeBackend, DispatchRequest, ReadbackEvent, ReadbackId,
    ReadbackKind, ReadbackPayload, SeedUniforms, SignCounters, TerrainSeed,
    GENERATE_VOXELS_BATCHED_KERNEL, GENERATE_VOXELS_KERNEL,
};

const SURFACE_AMPLITUDE: f64 = 12.0;
const SURFACE_FREQUENCY: f64 = 0.013;
const DETAIL_AMPLITUDE: f64 = 4.0;
const DETAIL_FREQUENCY: f64 = 0.05;
const CAVE_AMPLITUDE: f64 = 0.25;
const CAVE_FREQUENCY: f64 = 0.07;
/// Vertical distance over which density ramps from 0 to 1.
const DENSITY_FALLOFF: f64 = 8.0;
/// Depth below the surface where soil turns into rock.
const SOIL_DEPTH: f64 = 6.0;

pub const SOIL_MATERIAL: i16 = -1;
pub const ROCK_MATERIAL: i16 = -2;

/// CPU implementation of the terrain density function.
pub struct TerrainSampler {
    perlin: Perlin,
    seeds: SeedUniforms,
}

impl TerrainSampler {
    pub fn new(seed: TerrainSeed) -> Self {
        Self {
            perlin: Perlin::new(seed.noise_seed()),
            seeds: seed.expand(),
        }
    }

    fn wrap(&self, axis: usize, value: i32) -> f64 {
        let modulo = self.seeds.modulo_seed[axis].max(1) as i64;
        ((value as i64 + self.seeds.permutation_seed[axis] as i64).rem_euclid(modulo)) as f64
    }

    /// Height of the terrain surface above world column `(x, z)`.
    pub fn surface_height(&self, x: i32, z: i32) -> f64 {
        let (wx, wz) = (self.wrap(0, x), self.wrap(2, z));
        SURFACE_AMPLITUDE * self.perlin.get([wx * SURFACE_FREQUENCY, wz * SURFACE_FREQUENCY])
            + DETAIL_AMPLITUDE * self.perlin.get([wx * DETAIL_FREQUENCY, wz * DETAIL_FREQUENCY])
    }

    /// Density and material of one world voxel below a column of height `height`.
    pub fn sample(&self, world: [i32; 3], height: f64) -> VoxelCell {
        let depth = height - world[1] as f64;
        let mut density = depth / DENSITY_FALLOFF;

        if depth.abs() < DENSITY_FALLOFF {
            let p = [
                self.wrap(0, world[0]) * CAVE_FREQUENCY,
                self.wrap(1, world[1]) * CAVE_FREQUENCY,
                self.wrap(2, world[2]) * CAVE_FREQUENCY,
            ];
            density += CAVE_AMPLITUDE * self.perlin.get(p);
        }

        let density = density.clamp(-1.0, 1.0) as f32;
        let material_id = if density <= 0.0 {
            0
        } else if depth > SOIL_DEPTH {
            ROCK_MATERIAL
        } else {
            SOIL_MATERIAL
        };
        VoxelCell::isosurface(material_id, density)
    }

    /// Fills one chunk's padded cells, padding ring included.
    ///
    /// # Arguments
    /// * `transform` - World placement of the chunk
    /// * `chunk_size` - Logical chunk size
    /// * `out` - Destination slice of exactly one padded volume
    ///
    /// # Returns
    /// The chunk's inside and outside sample counts
    pub fn fill_chunk(
        &self,
        transform: &ChunkTransform,
        chunk_size: Vector3<i32>,
        out: &mut [VoxelCell],
    ) -> SignCounters {
        let grid = PaddedGrid::new(chunk_size);
        let [px, py, pz] = grid.padded();
        let scale = transform.scale.max(1);
        let world_of = |axis: usize, padded: usize| {
            transform.world_offset[axis] + (padded as i32 - 1) * scale
        };

        let mut counters = SignCounters::default();
        for z in 0..pz {
            for x in 0..px {
                let (wx, wz) = (world_of(0, x), world_of(2, z));
                let height = self.surface_height(wx, wz);
                for y in 0..py {
                    let cell = self.sample([wx, world_of(1, y), wz], height);
                    if cell.density > 0 {
                        counters.positive += 1;
                    } else {
                        counters.negative += 1;
                    }
                    if let Some(slot) = out.get_mut(grid.index(x, y, z)) {
                        *slot = cell;
                    }
                }
            }
        }
        counters
    }
}

/// Shared switch that makes the next dispatches fail their readbacks.
#[derive(Clone, Default)]
pub struct FaultInjector(Arc<AtomicUsize>);

impl FaultInjector {
    /// Fails the readbacks of the next `count` dispatches executed by the backend.
    pub fn fail_next_readbacks(&self, count: usize) {
        self.0.store(count, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

pub struct ReferenceComputeBackend {
    sampler: TerrainSampler,
    kernels: HashSet<String>,
    queued: VecDeque<(ReadbackId, DispatchRequest)>,
    next_id: u64,
    faults: FaultInjector,
    dispatched: usize,
}

impl ReferenceComputeBackend {
    /// Creates a backend with both generation kernels registered.
    pub fn new(seed: TerrainSeed) -> Self {
        Self {
            sampler: TerrainSampler::new(seed),
            kernels: [GENERATE_VOXELS_KERNEL, GENERATE_VOXELS_BATCHED_KERNEL]
                .into_iter()
                .map(String::from)
                .collect(),
            queued: VecDeque::new(),
            next_id: 0,
            faults: FaultInjector::default(),
            dispatched: 0,
        }
    }

    pub fn without_kernel(mut self, name: &str) -> Self {
        self.unregister_kernel(name);
        self
    }

    pub fn register_kernel(&mut self, name: &str) {
        self.kernels.insert(name.to_string());
    }

    pub fn unregister_kernel(&mut self, name: &str) {
        self.kernels.remove(name);
    }

    pub fn fault_injector(&self) -> FaultInjector {
        self.faults.clone()
    }

    /// Dispatches accepted so far.
    pub fn dispatch_count(&self) -> usize {
        self.dispatched
    }

    /// Placement of every chunk the request generates.
    fn chunk_transforms(request: &DispatchRequest) -> Vec<ChunkTransform> {
        if request.kernel == GENERATE_VOXELS_KERNEL {
            let u = &request.uniforms;
            vec![ChunkTransform {
                world_offset: [
                    u.chunk_position[0] * u.chunk_size[0],
                    u.chunk_position[1] * u.chunk_size[1],
                    u.chunk_position[2] * u.chunk_size[2],
                ],
                scale: request.transforms.first().map_or(1, |transform| transform.scale),
            }]
        } else {
            request.transforms.clone()
        }
    }

    fn execute(&self, request: &DispatchRequest) -> (Vec<VoxelCell>, Vec<SignCounters>) {
        let transforms = Self::chunk_transforms(request);
        let cells_per_chunk = request.padded_cell_count();
        let chunk_size = Vector3::from(request.uniforms.chunk_size);

        let mut voxels = vec![VoxelCell::AIR; cells_per_chunk * transforms.len()];
        let counters = transforms
            .iter()
            .zip(voxels.chunks_mut(cells_per_chunk.max(1)))
            .map(|(transform, out)| self.sampler.fill_chunk(transform, chunk_size, out))
            .collect();
        (voxels, counters)
    }
}

impl ComputeBackend for ReferenceComputeBackend {
    fn dispatch(&mut self, request: DispatchRequest) -> Result<ReadbackId> {
        if !self.kernels.contains(&request.kernel) {
            return Err(PipelineError::KernelNotFound(request.kernel));
        }

        let id = ReadbackId(self.next_id);
        self.next_id += 1;
        self.dispatched += 1;
        self.queued.push_back((id, request));
        Ok(id)
    }

    fn poll(&mut self, completions: &CompletionSender) {
        while let Some((id, request)) = self.queued.pop_front() {
            if self.faults.take() {
                warn!("Injected readback failure for dispatch {}", id.0);
                let mut kinds = vec![ReadbackKind::Voxels];
                if request.read_counters {
                    kinds.push(ReadbackKind::SignCounters);
                }
                for kind in kinds {
                    completions.post(ReadbackEvent {
                        id,
                        payload: ReadbackPayload::Failed {
                            kind,
                            reason: "injected fault".to_string(),
                        },
                    });
                }
                continue;
            }

            let (voxels, counters) = self.execute(&request);
            debug!(
                "Reference backend ran {} for {} chunks",
                request.kernel,
                counters.len()
            );
            completions.post(ReadbackEvent {
                id,
                payload: ReadbackPayload::Voxels(voxels),
            });
            if request.read_counters {
                completions.post(ReadbackEvent {
                    id,
                    payload: ReadbackPayload::SignCounters(counters),
                });
            }
        }
    }

    fn in_flight(&self) -> usize {
        self.queued.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_pipeline::gpu::{CompletionQueue, KernelUniforms};
    use cgmath::Point3;

    fn request(kernel: &str, coordinates: &[Point3<i32>], size: Vector3<i32>) -> DispatchRequest {
        let seeds = TerrainSeed(7).expand();
        DispatchRequest {
            kernel: kernel.to_string(),
            uniforms: KernelUniforms::new(coordinates[0], size, seeds, coordinates.len()),
            transforms: coordinates
                .iter()
                .map(|coordinate| ChunkTransform::for_chunk(*coordinate, size))
                .collect(),
            read_counters: true,
        }
    }

    #[test]
    fn test_results_arrive_on_poll() {
        let size = Vector3::new(4, 4, 4);
        let mut backend = ReferenceComputeBackend::new(TerrainSeed(7));
        let queue = CompletionQueue::new();

        backend
            .dispatch(request(GENERATE_VOXELS_KERNEL, &[Point3::new(0, 0, 0)], size))
            .unwrap();
        assert!(queue.drain().is_empty());
        assert_eq!(backend.in_flight(), 1);

        backend.poll(&queue.sender());
        let events = queue.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(backend.in_flight(), 0);
        match &events[0].payload {
            ReadbackPayload::Voxels(voxels) => assert_eq!(voxels.len(), 216),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_batched_matches_single() {
        let size = Vector3::new(4, 4, 4);
        let coordinates = [Point3::new(0, -1, 0), Point3::new(3, 0, -2)];
        let mut backend = ReferenceComputeBackend::new(TerrainSeed(7));
        let queue = CompletionQueue::new();

        backend
            .dispatch(request(GENERATE_VOXELS_BATCHED_KERNEL, &coordinates, size))
            .unwrap();
        backend
            .dispatch(request(GENERATE_VOXELS_KERNEL, &coordinates[1..], size))
            .unwrap();
        backend.poll(&queue.sender());

        let voxel_buffers: Vec<Vec<VoxelCell>> = queue
            .drain()
            .into_iter()
            .filter_map(|event| match event.payload {
                ReadbackPayload::Voxels(voxels) => Some(voxels),
                _ => None,
            })
            .collect();
        assert_eq!(voxel_buffers.len(), 2);
        assert_eq!(&voxel_buffers[0][216..], &voxel_buffers[1][..]);
    }

    #[test]
    fn test_unknown_kernel() {
        let mut backend =
            ReferenceComputeBackend::new(TerrainSeed(7)).without_kernel(GENERATE_VOXELS_KERNEL);
        let result = backend.dispatch(request(
            GENERATE_VOXELS_KERNEL,
            &[Point3::new(0, 0, 0)],
            Vector3::new(4, 4, 4),
        ));
        assert!(matches!(result, Err(PipelineError::KernelNotFound(_))));
    }

    #[test]
    fn test_fault_injection_fails_both_readbacks() {
        let mut backend = ReferenceComputeBackend::new(TerrainSeed(7));
        let queue = CompletionQueue::new();
        backend.fault_injector().fail_next_readbacks(1);

        backend
            .dispatch(request(GENERATE_VOXELS_KERNEL, &[Point3::new(0, 0, 0)], Vector3::new(4, 4, 4)))
            .unwrap();
        backend.poll(&queue.sender());
        let events = queue.drain();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|event| matches!(event.payload, ReadbackPayload::Failed { .. })));
    }

    #[test]
    fn test_terrain_has_ground_and_sky() {
        let sampler = TerrainSampler::new(TerrainSeed(1));
        let deep = sampler.sample([0, -200, 0], sampler.surface_height(0, 0));
        let high = sampler.sample([0, 200, 0], sampler.surface_height(0, 0));
        assert!(deep.is_solid());
        assert_eq!(deep.material_id, ROCK_MATERIAL);
        assert!(high.is_air());
    }
}
