//! # Renderer Seam
//!
//! The pipeline hands finished meshes to a `Renderer` and keeps only the returned
//! `MeshHandle`. Replacing a chunk's mesh releases the previous handle; destroying
//! a chunk releases its current one.
//!
//! `HeadlessRenderer` keeps uploads in a map. It backs the demo binary and the
//! tests, and makes leaked meshes visible through `live_meshes()`.

pub mod vertex;

use std::collections::HashMap;

use cgmath::Point3;
use log::debug;
use serde::{Deserialize, Serialize};

pub use vertex::ChunkVertex;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u64);

/// Renderer-side material a mesh is drawn with.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialRef(pub u32);

/// Contiguous index range of one part of a mesh.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SubMesh {
    pub index_offset: u32,
    pub index_count: u32,
}

/// Axis-aligned bounds in chunk-local voxel units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Point3::new(0.0, 0.0, 0.0),
            max: Point3::new(0.0, 0.0, 0.0),
        }
    }
}

impl Aabb {
    /// Smallest box holding every point, or `None` for no points.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = [f32; 3]>,
    {
        points.into_iter().fold(None, |bounds: Option<Aabb>, [x, y, z]| {
            Some(match bounds {
                None => Aabb {
                    min: Point3::new(x, y, z),
                    max: Point3::new(x, y, z),
                },
                Some(b) => Aabb {
                    min: Point3::new(b.min.x.min(x), b.min.y.min(y), b.min.z.min(z)),
                    max: Point3::new(b.max.x.max(x), b.max.y.max(y), b.max.z.max(z)),
                },
            })
        })
    }

    pub fn contains(&self, point: Point3<f32>) -> bool {
        (self.min.x..=self.max.x).contains(&point.x)
            && (self.min.y..=self.max.y).contains(&point.y)
            && (self.min.z..=self.max.z).contains(&point.z)
    }
}

/// Everything a renderer needs to draw one chunk.
#[derive(Clone, Debug, Default)]
pub struct MeshDescription {
    pub vertices: Vec<ChunkVertex>,
    pub indices: Vec<u32>,
    /// Submesh 0 is the surface, 1..=6 the skirts of each chunk face.
    pub submeshes: Vec<SubMesh>,
    pub bounds: Aabb,
}

impl MeshDescription {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

pub trait Renderer {
    /// Takes ownership of a copy of `mesh` and returns its handle.
    ///
    /// # Arguments
    /// * `coordinate` - Chunk coordinate the mesh belongs to
    /// * `mesh` - Finished mesh, positions in chunk-local voxel units
    /// * `material` - Material to draw the mesh with
    fn upload(
        &mut self,
        coordinate: Point3<i32>,
        mesh: &MeshDescription,
        material: MaterialRef,
    ) -> MeshHandle;

    /// Frees a mesh. Unknown handles are ignored.
    fn release(&mut self, handle: MeshHandle);

    fn live_meshes(&self) -> usize;
}

/// What a `HeadlessRenderer` remembers about an upload.
#[derive(Clone, Debug)]
pub struct UploadedMesh {
    pub coordinate: Point3<i32>,
    pub material: MaterialRef,
    pub vertex_count: usize,
    pub index_count: usize,
    pub submesh_count: usize,
    pub bounds: Aabb,
}

#[derive(Default)]
pub struct HeadlessRenderer {
    meshes: HashMap<MeshHandle, UploadedMesh>,
    next_handle: u64,
    total_uploads: u64,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&UploadedMesh> {
        self.meshes.get(&handle)
    }

    pub fn total_uploads(&self) -> u64 {
        self.total_uploads
    }
}

impl Renderer for HeadlessRenderer {
    fn upload(
        &mut self,
        coordinate: Point3<i32>,
        mesh: &MeshDescription,
        material: MaterialRef,
    ) -> MeshHandle {
        let handle = MeshHandle(self.next_handle);
        self.next_handle += 1;
        self.total_uploads += 1;
        self.meshes.insert(
            handle,
            UploadedMesh {
                coordinate,
                material,
                vertex_count: mesh.vertices.len(),
                index_count: mesh.indices.len(),
                submesh_count: mesh.submeshes.len(),
                bounds: mesh.bounds,
            },
        );
        debug!(
            "Uploaded mesh {} for chunk {:?}: {} triangles",
            handle.0,
            coordinate,
            mesh.triangle_count()
        );
        handle
    }

    fn release(&mut self, handle: MeshHandle) {
        self.meshes.remove(&handle);
    }

    fn live_meshes(&self) -> usize {
        self.meshes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_from_points() {
        assert_eq!(Aabb::from_points(Vec::<[f32; 3]>::new()), None);
        let bounds = Aabb::from_points([[1.0, -2.0, 3.0], [-1.0, 4.0, 0.5]]).unwrap();
        assert_eq!(bounds.min, Point3::new(-1.0, -2.0, 0.5));
        assert_eq!(bounds.max, Point3::new(1.0, 4.0, 3.0));
        assert!(bounds.contains(Point3::new(0.0, 0.0, 1.0)));
        assert!(!bounds.contains(Point3::new(2.0, 0.0, 1.0)));
    }

    #[test]
    fn test_headless_renderer_tracks_live_meshes() {
        let mut renderer = HeadlessRenderer::new();
        let mesh = MeshDescription::default();
        let a = renderer.upload(Point3::new(0, 0, 0), &mesh, MaterialRef(1));
        let b = renderer.upload(Point3::new(1, 0, 0), &mesh, MaterialRef(1));
        assert_ne!(a, b);
        assert_eq!(renderer.live_meshes(), 2);

        renderer.release(a);
        renderer.release(a);
        assert_eq!(renderer.live_meshes(), 1);
        assert_eq!(renderer.mesh(b).unwrap().coordinate, Point3::new(1, 0, 0));
        assert_eq!(renderer.total_uploads(), 2);
    }
}
