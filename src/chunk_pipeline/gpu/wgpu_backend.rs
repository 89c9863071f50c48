//! # wgpu Compute Backend
//!
//! Runs `terrain.wgsl` on a wgpu device. Every dispatch owns its buffers: a
//! uniform block, the transform list, the voxel output and the sign counters,
//! plus one staging buffer per readback. Staging buffers are mapped
//! asynchronously; the map callbacks only send a status message, and `poll()`
//! turns finished maps into `ReadbackEvent`s.
//!
//! Devices can only be created when an adapter is present. Everything that does
//! not need a device (the workgroup grid) is kept in free functions.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};

use log::{debug, error, info};
use wgpu::util::DeviceExt;

use crate::chunk_pipeline::voxels::voxel_cell::VoxelCell;
use crate::error::{PipelineError, Result};

use super::{
    ChunkTransform, CompletionSender, ComputeBackend, DispatchRequest, ReadbackEvent, ReadbackId,
    ReadbackKind, ReadbackPayload, SignCounters, GENERATE_VOXELS_BATCHED_KERNEL,
    GENERATE_VOXELS_KERNEL,
};

const WORKGROUP_SIZE: u32 = 64;
const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65535;

/// Workgroup counts covering `cell_count` invocations per chunk.
///
/// Large chunks are spread over y once x exceeds the per-dimension limit; the
/// kernels rebuild the flat index from `num_workgroups`.
pub fn workgroup_grid(cell_count: usize, chunk_count: u32) -> (u32, u32, u32) {
    let groups = (cell_count as u32).div_ceil(WORKGROUP_SIZE).max(1);
    let x = groups.min(MAX_WORKGROUPS_PER_DIMENSION);
    let y = groups.div_ceil(x);
    (x, y, chunk_count.max(1))
}

struct MapStatus {
    id: ReadbackId,
    kind: ReadbackKind,
    result: std::result::Result<(), wgpu::BufferAsyncError>,
}

struct InFlightReadback {
    id: ReadbackId,
    kind: ReadbackKind,
    staging: wgpu::Buffer,
}

pub struct WgpuComputeBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: HashMap<String, wgpu::ComputePipeline>,
    in_flight: Vec<InFlightReadback>,
    status_sender: Sender<MapStatus>,
    status_receiver: Receiver<MapStatus>,
    next_id: u64,
}

impl WgpuComputeBackend {
    /// Creates a headless device on the default adapter.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::empty(),
            backend_options: wgpu::BackendOptions::from_env_or_default(),
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| PipelineError::Backend(format!("no compute adapter: {e}")))?;
        info!("Compute adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("voxel generation device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| PipelineError::Backend(format!("device request failed: {e}")))?;

        Ok(Self::from_device(device, queue))
    }

    /// Compiles the generation kernels on an existing device.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("terrain kernels"),
            source: wgpu::ShaderSource::Wgsl(include_str!("terrain.wgsl").into()),
        });

        let pipelines = [GENERATE_VOXELS_KERNEL, GENERATE_VOXELS_BATCHED_KERNEL]
            .into_iter()
            .map(|entry_point| {
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry_point),
                    layout: None,
                    module: &shader,
                    entry_point: Some(entry_point),
                    compilation_options: Default::default(),
                    cache: None,
                });
                (entry_point.to_string(), pipeline)
            })
            .collect();

        let (status_sender, status_receiver) = channel();
        Self {
            device,
            queue,
            pipelines,
            in_flight: Vec::new(),
            status_sender,
            status_receiver,
            next_id: 0,
        }
    }

    fn staging_buffer(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    }

    fn map_staging(&mut self, id: ReadbackId, kind: ReadbackKind, staging: wgpu::Buffer) {
        let sender = self.status_sender.clone();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                // The backend may already be gone.
                let _ = sender.send(MapStatus { id, kind, result });
            });
        self.in_flight.push(InFlightReadback { id, kind, staging });
    }

    fn read_mapped(readback: &InFlightReadback) -> ReadbackPayload {
        let payload = {
            let data = readback.staging.slice(..).get_mapped_range();
            match readback.kind {
                ReadbackKind::Voxels => {
                    ReadbackPayload::Voxels(bytemuck::pod_collect_to_vec::<u8, VoxelCell>(&data))
                }
                ReadbackKind::SignCounters => ReadbackPayload::SignCounters(
                    bytemuck::pod_collect_to_vec::<u8, SignCounters>(&data),
                ),
            }
        };
        readback.staging.unmap();
        payload
    }
}

impl ComputeBackend for WgpuComputeBackend {
    fn dispatch(&mut self, request: DispatchRequest) -> Result<ReadbackId> {
        let Some(pipeline) = self.pipelines.get(&request.kernel) else {
            return Err(PipelineError::KernelNotFound(request.kernel));
        };

        let mut transforms = request.transforms.clone();
        if transforms.is_empty() {
            transforms.push(ChunkTransform {
                world_offset: [0; 3],
                scale: 1,
            });
        }
        let chunk_count = if request.kernel == GENERATE_VOXELS_KERNEL {
            1
        } else {
            transforms.len() as u32
        };
        let cells = request.padded_cell_count();
        let voxel_bytes = (cells * chunk_count as usize * size_of::<VoxelCell>()) as u64;
        let counter_bytes = (chunk_count as usize * size_of::<SignCounters>()) as u64;

        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("generation uniforms"),
                contents: bytemuck::bytes_of(&request.uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let transform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("chunk transforms"),
                contents: bytemuck::cast_slice(&transforms),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let voxel_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("voxel output"),
            size: voxel_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let zeroed_counters = vec![SignCounters::default(); chunk_count as usize];
        let counter_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("sign counters"),
                contents: bytemuck::cast_slice(&zeroed_counters),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("generation bind group"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: transform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: voxel_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: counter_buffer.as_entire_binding(),
                },
            ],
        });

        let voxel_staging = self.staging_buffer("voxel readback", voxel_bytes);
        let counter_staging = request
            .read_counters
            .then(|| self.staging_buffer("sign counter readback", counter_bytes));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("voxel generation"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&request.kernel),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (x, y, z) = workgroup_grid(cells, chunk_count);
            pass.dispatch_workgroups(x, y, z);
        }
        encoder.copy_buffer_to_buffer(&voxel_buffer, 0, &voxel_staging, 0, voxel_bytes);
        if let Some(staging) = &counter_staging {
            encoder.copy_buffer_to_buffer(&counter_buffer, 0, staging, 0, counter_bytes);
        }
        self.queue.submit(Some(encoder.finish()));

        let id = ReadbackId(self.next_id);
        self.next_id += 1;
        self.map_staging(id, ReadbackKind::Voxels, voxel_staging);
        if let Some(staging) = counter_staging {
            self.map_staging(id, ReadbackKind::SignCounters, staging);
        }
        debug!(
            "Dispatched {} for {} chunks as readback {}",
            request.kernel, chunk_count, id.0
        );
        Ok(id)
    }

    fn poll(&mut self, completions: &CompletionSender) {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            error!("Device poll failed: {e}");
        }

        for status in self.status_receiver.try_iter() {
            let Some(position) = self
                .in_flight
                .iter()
                .position(|readback| readback.id == status.id && readback.kind == status.kind)
            else {
                continue;
            };
            let readback = self.in_flight.swap_remove(position);

            let payload = match status.result {
                Ok(()) => Self::read_mapped(&readback),
                Err(e) => ReadbackPayload::Failed {
                    kind: readback.kind,
                    reason: e.to_string(),
                },
            };
            completions.post(ReadbackEvent {
                id: readback.id,
                payload,
            });
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
