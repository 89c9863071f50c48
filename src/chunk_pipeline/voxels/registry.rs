//! # Chunk Registry
//!
//! Owns every `ChunkRecord`, keyed by chunk coordinate, and keeps the loaded set
//! shaped around the observer.
//!
//! ## Spawn Policy
//! - The meshed cube spans `[-Rx, Rx]` on x and z and `[-Ry, Ry]` on y around the
//!   observer's chunk, with `spawn_radius = [Rx, Ry]`.
//! - A one-chunk halo shell around that cube is loaded as well. Halo chunks only
//!   receive voxel data, which lets the edge of the meshed cube reconcile its
//!   padding against real neighbours.
//! - Changes are collected as `RegistryCommand`s and applied in one batch, so no
//!   lookup observes a half-updated registry.
//!
//! ## Performance Considerations
//! - The spawn scan only runs when the observer crosses a chunk boundary
//! - Stage scans (`coordinates_in_stage`) are ordered nearest-first so that work
//!   close to the observer is dispatched before distant work

use std::collections::{HashMap, HashSet};

use cgmath::{Point3, Vector3};
use log::{debug, info};

use crate::config::PipelineConfig;
use crate::error::Result;

use super::chunk::chunk_stage::{ChunkStage, StageEvent};
use super::chunk::{ChunkId, ChunkKey, ChunkRecord, ChunkRole};

/// A deferred registry mutation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegistryCommand {
    Spawn(Point3<i32>, ChunkRole),
    Despawn(Point3<i32>),
    Retag(Point3<i32>, ChunkRole),
}

/// Outcome of one registry tick.
#[derive(Default)]
pub struct SpawnReport {
    pub spawned: usize,
    pub retagged: usize,
    /// Records retagged to `Halo`. Their meshes and colliders are no longer wanted.
    pub demoted: Vec<ChunkKey>,
    /// Removed records. Their volumes, meshes and colliders still have to be released.
    pub despawned: Vec<ChunkRecord>,
}

pub struct ChunkRegistry {
    chunks: HashMap<Point3<i32>, ChunkRecord>,
    chunk_size: Vector3<i32>,
    spawn_radius: [i32; 2],
    next_id: u64,
    last_observer_chunk: Option<Point3<i32>>,
}

impl ChunkRegistry {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            chunks: HashMap::new(),
            chunk_size: config.chunk_size(),
            spawn_radius: config.spawn_radius,
            next_id: 0,
            last_observer_chunk: None,
        }
    }

    pub fn chunk_size(&self) -> Vector3<i32> {
        self.chunk_size
    }

    /// World voxel containing `position`. Voxel `v` spans `[v - 0.5, v + 0.5)`.
    pub fn world_to_voxel(position: Point3<f32>) -> Point3<i32> {
        Point3::new(
            (position.x + 0.5).floor() as i32,
            (position.y + 0.5).floor() as i32,
            (position.z + 0.5).floor() as i32,
        )
    }

    /// Splits a world voxel into its chunk coordinate and logical local position.
    pub fn voxel_to_chunk(&self, voxel: Point3<i32>) -> (Point3<i32>, Point3<i32>) {
        let size = self.chunk_size;
        (
            Point3::new(
                voxel.x.div_euclid(size.x),
                voxel.y.div_euclid(size.y),
                voxel.z.div_euclid(size.z),
            ),
            Point3::new(
                voxel.x.rem_euclid(size.x),
                voxel.y.rem_euclid(size.y),
                voxel.z.rem_euclid(size.z),
            ),
        )
    }

    /// Chunk coordinate containing a world position, `floor(position / chunk_size)`.
    pub fn world_to_chunk(&self, position: Point3<f32>) -> Point3<i32> {
        let size = self.chunk_size.cast::<f32>().unwrap_or(Vector3::new(1.0, 1.0, 1.0));
        Point3::new(
            (position.x / size.x).floor() as i32,
            (position.y / size.y).floor() as i32,
            (position.z / size.z).floor() as i32,
        )
    }

    /// Role the spawn policy assigns to `coordinate` for an observer in `center`,
    /// or `None` if the coordinate should not be loaded.
    pub fn role_for(&self, center: Point3<i32>, coordinate: Point3<i32>) -> Option<ChunkRole> {
        let [horizontal, vertical] = self.spawn_radius;
        let offset = coordinate - center;
        let within = |h: i32, v: i32| {
            offset.x.abs() <= h && offset.z.abs() <= h && offset.y.abs() <= v
        };

        if within(horizontal, vertical) {
            Some(ChunkRole::Meshed)
        } else if within(horizontal + 1, vertical + 1) {
            Some(ChunkRole::Halo)
        } else {
            None
        }
    }

    /// Every coordinate that should be loaded around `center`, with its role.
    pub fn required_coordinates(&self, center: Point3<i32>) -> Vec<(Point3<i32>, ChunkRole)> {
        let [horizontal, vertical] = self.spawn_radius;
        let (h, v) = (horizontal + 1, vertical + 1);
        let mut required = Vec::with_capacity(((2 * h + 1) * (2 * h + 1) * (2 * v + 1)) as usize);

        for z in -h..=h {
            for y in -v..=v {
                for x in -h..=h {
                    let coordinate = center + Vector3::new(x, y, z);
                    if let Some(role) = self.role_for(center, coordinate) {
                        required.push((coordinate, role));
                    }
                }
            }
        }
        required
    }

    /// Reshapes the loaded set around the observer.
    ///
    /// # Arguments
    /// * `observer` - World-space observer position
    ///
    /// # Returns
    /// What changed. Empty when the observer stayed in the same chunk.
    pub fn tick(&mut self, observer: Point3<f32>) -> Result<SpawnReport> {
        let center = self.world_to_chunk(observer);
        if self.last_observer_chunk == Some(center) {
            return Ok(SpawnReport::default());
        }

        let required = self.required_coordinates(center);
        let required_set: HashSet<Point3<i32>> =
            required.iter().map(|(coordinate, _)| *coordinate).collect();

        let mut commands: Vec<RegistryCommand> = self
            .chunks
            .keys()
            .filter(|coordinate| !required_set.contains(*coordinate))
            .map(|coordinate| RegistryCommand::Despawn(*coordinate))
            .collect();

        for (coordinate, role) in required {
            match self.chunks.get(&coordinate) {
                None => commands.push(RegistryCommand::Spawn(coordinate, role)),
                Some(record) if record.role != role => {
                    commands.push(RegistryCommand::Retag(coordinate, role))
                }
                Some(_) => {}
            }
        }

        let report = self.apply_commands(commands)?;
        self.last_observer_chunk = Some(center);

        info!(
            "Observer entered chunk {:?}: spawned {}, despawned {}, retagged {}, loaded {}",
            center,
            report.spawned,
            report.despawned.len(),
            report.retagged,
            self.chunks.len()
        );
        Ok(report)
    }

    /// Applies a batch of commands.
    pub fn apply_commands(&mut self, commands: Vec<RegistryCommand>) -> Result<SpawnReport> {
        let mut report = SpawnReport::default();

        for command in commands {
            match command {
                RegistryCommand::Spawn(coordinate, role) => {
                    if self.chunks.contains_key(&coordinate) {
                        continue;
                    }
                    let id = ChunkId(self.next_id);
                    self.next_id += 1;
                    self.chunks
                        .insert(coordinate, ChunkRecord::new(id, coordinate, role));
                    report.spawned += 1;
                }
                RegistryCommand::Despawn(coordinate) => {
                    if let Some(record) = self.chunks.remove(&coordinate) {
                        debug!("Despawned chunk {} at {:?}", record.id, coordinate);
                        report.despawned.push(record);
                    }
                }
                RegistryCommand::Retag(coordinate, role) => {
                    let Some(record) = self.chunks.get_mut(&coordinate) else {
                        continue;
                    };
                    record.role = role;
                    let event = match role {
                        ChunkRole::Meshed => StageEvent::Promoted,
                        ChunkRole::Halo => StageEvent::Demoted,
                    };
                    record.apply(event)?;
                    if role == ChunkRole::Halo {
                        report.demoted.push(record.key());
                    }
                    report.retagged += 1;
                }
            }
        }

        Ok(report)
    }

    /// Makes the next `tick` re-evaluate the loaded set even if the observer did not move.
    pub fn force_refresh(&mut self) {
        self.last_observer_chunk = None;
    }

    pub fn get(&self, coordinate: Point3<i32>) -> Option<&ChunkRecord> {
        self.chunks.get(&coordinate)
    }

    pub fn get_mut(&mut self, coordinate: Point3<i32>) -> Option<&mut ChunkRecord> {
        self.chunks.get_mut(&coordinate)
    }

    /// The record addressed by `key`, if it still exists.
    pub fn get_live(&self, key: ChunkKey) -> Option<&ChunkRecord> {
        self.chunks
            .get(&key.coordinate)
            .filter(|record| record.id == key.id)
    }

    pub fn get_live_mut(&mut self, key: ChunkKey) -> Option<&mut ChunkRecord> {
        self.chunks
            .get_mut(&key.coordinate)
            .filter(|record| record.id == key.id)
    }

    pub fn get_by_id(&self, id: ChunkId) -> Option<&ChunkRecord> {
        self.chunks.values().find(|record| record.id == id)
    }

    pub fn contains(&self, coordinate: Point3<i32>) -> bool {
        self.chunks.contains_key(&coordinate)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.chunks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChunkRecord> {
        self.chunks.values_mut()
    }

    /// Coordinates of every record whose stage matches, nearest to the observer first.
    pub fn coordinates_in_stage<F>(&self, predicate: F) -> Vec<Point3<i32>>
    where
        F: Fn(ChunkStage) -> bool,
    {
        let center = self.last_observer_chunk.unwrap_or(Point3::new(0, 0, 0));
        let mut coordinates: Vec<Point3<i32>> = self
            .chunks
            .values()
            .filter(|record| predicate(record.stage()))
            .map(|record| record.coordinate)
            .collect();

        coordinates.sort_by_key(|coordinate| {
            let offset = *coordinate - center;
            (
                offset.x * offset.x + offset.y * offset.y + offset.z * offset.z,
                coordinate.z,
                coordinate.y,
                coordinate.x,
            )
        });
        coordinates
    }
}
