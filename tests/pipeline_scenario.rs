use std::sync::Arc;
use std::time::Duration;

use cgmath::Point3;
use voxel_chunk_pipeline::chunk_pipeline::collider::{ColliderBackend, HeadlessColliderBackend};
use voxel_chunk_pipeline::chunk_pipeline::gpu::{
    ReferenceComputeBackend, GENERATE_VOXELS_BATCHED_KERNEL, GENERATE_VOXELS_KERNEL,
};
use voxel_chunk_pipeline::chunk_pipeline::rendering::{HeadlessRenderer, Renderer};
use voxel_chunk_pipeline::chunk_pipeline::voxels::edits::{EditOutcome, EditRequest};
use voxel_chunk_pipeline::chunk_pipeline::voxels::{ChunkRole, ChunkStage};
use voxel_chunk_pipeline::chunk_pipeline::ChunkPipeline;
use voxel_chunk_pipeline::config::{GenerationMode, PipelineConfig};

const SIZE: i32 = 8;
const MAX_TICKS: usize = 500;

type TestPipeline = ChunkPipeline<ReferenceComputeBackend, HeadlessRenderer>;

fn config(radius: [i32; 2], mode: GenerationMode) -> PipelineConfig {
    PipelineConfig {
        chunk_logical_size: [SIZE, SIZE, SIZE],
        spawn_radius: radius,
        mesh_job_pool_size: 4,
        max_concurrent_gpu_requests: 16,
        generation_mode: mode,
        worker_threads: 0,
        ..Default::default()
    }
}

fn build(config: PipelineConfig, backend: ReferenceComputeBackend) -> (TestPipeline, Arc<HeadlessColliderBackend>) {
    let colliders = Arc::new(HeadlessColliderBackend::new());
    let pipeline = ChunkPipeline::new(config, backend, HeadlessRenderer::new(), colliders.clone()).unwrap();
    (pipeline, colliders)
}

fn pipeline(config: PipelineConfig) -> (TestPipeline, Arc<HeadlessColliderBackend>) {
    let backend = ReferenceComputeBackend::new(config.terrain_seed);
    build(config, backend)
}

/// Ticks at `observer` until settled, checking the concurrency bounds after every tick.
fn settle(pipeline: &mut TestPipeline, observer: Point3<f32>) -> usize {
    let config = pipeline.config().clone();
    for tick in 1..=MAX_TICKS {
        pipeline.tick(observer).unwrap();
        let stats = pipeline.stats();
        assert!(stats.busy_slots <= config.mesh_job_pool_size, "{stats:?}");
        assert!(stats.pending_gpu <= config.max_concurrent_gpu_requests, "{stats:?}");
        if pipeline.is_settled() {
            return tick;
        }
    }
    panic!("pipeline did not settle: {:?}", pipeline.stats());
}

/// Meshes and colliders are held only by meshed chunks, and the backends agree.
fn assert_resources_consistent(pipeline: &TestPipeline, colliders: &HeadlessColliderBackend) {
    let records: Vec<_> = pipeline.registry().iter().collect();
    let with_mesh = records.iter().filter(|record| record.mesh_handle.is_some()).count();
    let with_collider = records
        .iter()
        .filter(|record| record.collider_handle.is_some())
        .count();

    assert_eq!(pipeline.renderer().live_meshes(), with_mesh);
    assert_eq!(colliders.live_colliders(), with_collider);
    assert!(with_collider <= with_mesh);
    for record in records {
        if record.role == ChunkRole::Halo {
            assert!(record.mesh_handle.is_none(), "halo {:?} holds a mesh", record.coordinate);
            assert!(record.collider_handle.is_none());
        }
    }
}

#[test]
fn test_spawn_cube_settles_with_every_meshed_chunk_built() {
    let (mut pipeline, colliders) = pipeline(config([2, 2], GenerationMode::Batched { batch_size: 8 }));
    settle(&mut pipeline, Point3::new(0.0, 0.0, 0.0));

    let stats = pipeline.stats();
    assert_eq!(stats.chunks, 7 * 7 * 7);
    assert_eq!(stats.meshed_chunks, 5 * 5 * 5);
    assert_eq!(stats.idle, stats.chunks);
    assert_eq!(stats.modified, 0);
    assert_eq!(stats.live_volumes, stats.chunks);
    assert_eq!(stats.retired_volumes, 0);
    assert!(stats.live_meshes > 0);
    assert_resources_consistent(&pipeline, &colliders);

    for record in pipeline.registry().iter() {
        let Some(handle) = record.mesh_handle else {
            continue;
        };
        let mesh = pipeline.renderer().mesh(handle).unwrap();
        assert_eq!(mesh.coordinate, record.coordinate);
        assert_eq!(mesh.submesh_count, 7);
        for axis in 0..3 {
            assert!(mesh.bounds.min[axis] >= -1.0, "{:?}", mesh.bounds);
            assert!(mesh.bounds.max[axis] <= SIZE as f32 + 1.0, "{:?}", mesh.bounds);
        }
    }
}

#[test]
fn test_single_and_batched_generation_agree() {
    let (mut single, _) = pipeline(config([1, 1], GenerationMode::Single));
    let (mut batched, _) = pipeline(config([1, 1], GenerationMode::Batched { batch_size: 6 }));
    settle(&mut single, Point3::new(0.0, 0.0, 0.0));
    settle(&mut batched, Point3::new(0.0, 0.0, 0.0));

    for z in -SIZE..2 * SIZE {
        for y in -SIZE..2 * SIZE {
            for x in (-SIZE..2 * SIZE).step_by(3) {
                let position = Point3::new(x as f32, y as f32, z as f32);
                assert_eq!(single.read_voxel(position), batched.read_voxel(position));
            }
        }
    }
    assert_eq!(single.stats().live_meshes, batched.stats().live_meshes);
}

#[test]
fn test_resources_return_to_baseline_after_leaving_and_returning() {
    let (mut pipeline, colliders) = pipeline(config([1, 1], GenerationMode::Batched { batch_size: 8 }));
    let origin = Point3::new(0.0, 0.0, 0.0);
    settle(&mut pipeline, origin);
    let baseline = pipeline.stats();

    settle(&mut pipeline, Point3::new(10.0 * SIZE as f32, 0.0, 0.0));
    assert_resources_consistent(&pipeline, &colliders);

    settle(&mut pipeline, origin);
    let returned = pipeline.stats();
    assert_eq!(returned.chunks, baseline.chunks);
    assert_eq!(returned.live_volumes, baseline.live_volumes);
    assert_eq!(returned.live_meshes, baseline.live_meshes);
    assert_eq!(returned.live_colliders, baseline.live_colliders);
    assert_eq!(returned.retired_volumes, 0);
    assert_resources_consistent(&pipeline, &colliders);
}

#[test]
fn test_one_chunk_step_retags_the_ring() {
    let (mut pipeline, colliders) = pipeline(config([1, 1], GenerationMode::Single));
    settle(&mut pipeline, Point3::new(0.0, 0.0, 0.0));
    settle(&mut pipeline, Point3::new(SIZE as f32, 0.0, 0.0));

    let stats = pipeline.stats();
    assert_eq!(stats.chunks, 5 * 5 * 5);
    assert_eq!(stats.meshed_chunks, 3 * 3 * 3);
    assert_eq!(
        pipeline.chunk(Point3::new(-1, 0, 0)).map(|record| record.role),
        Some(ChunkRole::Halo)
    );
    assert_eq!(
        pipeline.chunk(Point3::new(2, 0, 0)).map(|record| record.role),
        Some(ChunkRole::Meshed)
    );
    assert_resources_consistent(&pipeline, &colliders);
}

#[test]
fn test_failed_readbacks_are_retried_until_settled() {
    for mode in [GenerationMode::Single, GenerationMode::Batched { batch_size: 4 }] {
        let config = config([0, 0], mode);
        let backend = ReferenceComputeBackend::new(config.terrain_seed);
        backend.fault_injector().fail_next_readbacks(3);
        let (mut pipeline, _) = build(config, backend);

        settle(&mut pipeline, Point3::new(0.0, 0.0, 0.0));
        let stats = pipeline.stats();
        assert_eq!(stats.idle, 27, "{mode:?}");
        assert_eq!(stats.live_volumes, 27, "{mode:?}");
    }
}

#[test]
fn test_missing_kernel_keeps_chunks_waiting_until_registered() {
    let config = config([0, 0], GenerationMode::Single);
    let backend = ReferenceComputeBackend::new(config.terrain_seed).without_kernel(GENERATE_VOXELS_KERNEL);
    let (mut pipeline, _) = build(config, backend);

    let origin = Point3::new(0.0, 0.0, 0.0);
    for _ in 0..5 {
        let report = pipeline.tick(origin).unwrap();
        assert_eq!(report.dispatched, 0);
    }
    let stats = pipeline.stats();
    assert_eq!(stats.request_gpu_data, 27);
    assert_eq!(stats.pending_gpu, 0);
    assert!(!pipeline.is_settled());

    pipeline.backend_mut().register_kernel(GENERATE_VOXELS_KERNEL);
    settle(&mut pipeline, origin);
    assert_eq!(pipeline.stats().idle, 27);
}

#[test]
fn test_batched_kernel_missing_does_not_affect_single_path() {
    let config = config([0, 0], GenerationMode::Single);
    let backend =
        ReferenceComputeBackend::new(config.terrain_seed).without_kernel(GENERATE_VOXELS_BATCHED_KERNEL);
    let (mut pipeline, _) = build(config, backend);
    settle(&mut pipeline, Point3::new(0.0, 0.0, 0.0));
}

#[test]
fn test_edit_round_trip_rebuilds_the_mesh() {
    let (mut pipeline, colliders) = pipeline(config([0, 0], GenerationMode::Single));
    let origin = Point3::new(0.0, 0.0, 0.0);
    settle(&mut pipeline, origin);
    let uploads = pipeline.renderer().total_uploads();

    let position = Point3::new(3.0, 3.0, 3.0);
    let outcome = pipeline.apply_edit(EditRequest::set_block(position, 7)).unwrap();
    assert!(matches!(outcome, EditOutcome::Applied { voxels_written: 1, .. }));

    let cell = pipeline.read_voxel(position).unwrap();
    assert!(cell.is_block());
    assert_eq!(cell.material_id, 7);

    let record = pipeline.chunk(Point3::new(0, 0, 0)).unwrap();
    assert_eq!(record.stage(), ChunkStage::RequestMesh);
    assert!(record.is_modified());

    settle(&mut pipeline, origin);
    let record = pipeline.chunk(Point3::new(0, 0, 0)).unwrap();
    assert!(!record.is_modified());
    assert!(record.mesh_handle.is_some());
    assert!(record.collider_handle.is_some());
    assert!(pipeline.renderer().total_uploads() > uploads);
    assert_resources_consistent(&pipeline, &colliders);
}

#[test]
fn test_edit_at_chunk_border_repads_the_neighbour() {
    let (mut pipeline, _) = pipeline(config([1, 1], GenerationMode::Single));
    let origin = Point3::new(0.0, 0.0, 0.0);
    settle(&mut pipeline, origin);

    let border = Point3::new(SIZE as f32 - 1.0, 2.0, 2.0);
    pipeline.apply_edit(EditRequest::set_block(border, 3)).unwrap();
    assert_eq!(
        pipeline.chunk(Point3::new(1, 0, 0)).map(|record| record.stage()),
        Some(ChunkStage::RequestPaddingUpdate)
    );

    settle(&mut pipeline, origin);
    assert_eq!(pipeline.read_voxel(border).map(|cell| cell.material_id), Some(3));
}

#[test]
fn test_sculpting_changes_density() {
    let (mut pipeline, _) = pipeline(config([0, 0], GenerationMode::Single));
    let origin = Point3::new(0.0, 0.0, 0.0);
    settle(&mut pipeline, origin);

    let centre = Point3::new(4.0, 4.0, 4.0);
    let before = pipeline.read_voxel(centre).unwrap().density_value();
    pipeline
        .apply_edit(EditRequest::sphere_add(centre, 2.5, 0.5, -1))
        .unwrap();
    let added = pipeline.read_voxel(centre).unwrap().density_value();
    assert!(added > before || added >= 1.0);

    settle(&mut pipeline, origin);
    pipeline
        .apply_edit(EditRequest::sphere_subtract(centre, 2.5, 0.5))
        .unwrap();
    let subtracted = pipeline.read_voxel(centre).unwrap().density_value();
    assert!(subtracted < added || subtracted <= -1.0);
    settle(&mut pipeline, origin);
}

#[test]
fn test_threaded_workers_reach_the_same_state() {
    let mut threaded_config = config([0, 0], GenerationMode::Batched { batch_size: 8 });
    threaded_config.worker_threads = 2;
    let (mut threaded, _) = pipeline(threaded_config);
    let (mut inline, _) = pipeline(config([0, 0], GenerationMode::Batched { batch_size: 8 }));

    let origin = Point3::new(0.0, 0.0, 0.0);
    settle(&mut inline, origin);

    let mut settled = false;
    for _ in 0..20_000 {
        threaded.tick(origin).unwrap();
        let stats = threaded.stats();
        assert!(stats.busy_slots <= 4);
        if threaded.is_settled() {
            settled = true;
            break;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    assert!(settled, "threaded pipeline did not settle: {:?}", threaded.stats());
    assert_eq!(threaded.stats().live_meshes, inline.stats().live_meshes);
    assert_eq!(
        threaded.read_voxel(Point3::new(1.0, -2.0, 5.0)),
        inline.read_voxel(Point3::new(1.0, -2.0, 5.0))
    );
}
