//! Merging the stage outputs into the renderer's mesh.

use crate::chunk_pipeline::rendering::{Aabb, MeshDescription, SubMesh};

use super::build_context::{MeshBuffers, MeshBuildContext};

fn append(merged: &mut MeshBuffers, part: &MeshBuffers) -> SubMesh {
    let base = merged.vertices.len() as u32;
    let index_offset = merged.indices.len() as u32;
    merged.vertices.extend_from_slice(&part.vertices);
    merged
        .indices
        .extend(part.indices.iter().map(|index| index + base));
    SubMesh {
        index_offset,
        index_count: part.indices.len() as u32,
    }
}

/// Concatenates the core mesh and the six skirts into `context.merged`.
///
/// Submesh 0 is the core; submesh `1 + side` is the skirt of that face.
pub fn merge_buffers(context: &mut MeshBuildContext) {
    context.merged.clear();
    context.submeshes.clear();

    let core = append(&mut context.merged, &context.core);
    context.submeshes.push(core);
    for skirt in &context.skirts {
        let submesh = append(&mut context.merged, skirt);
        context.submeshes.push(submesh);
    }
}

/// Moves the merged buffers into a `MeshDescription` with its bounds.
pub fn finalize_description(context: &mut MeshBuildContext) {
    let merged = std::mem::take(&mut context.merged);
    let bounds = Aabb::from_points(merged.vertices.iter().map(|vertex| vertex.position))
        .unwrap_or_default();
    context.description = Some(MeshDescription {
        vertices: merged.vertices,
        indices: merged.indices,
        submeshes: std::mem::take(&mut context.submeshes),
        bounds,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_pipeline::rendering::ChunkVertex;
    use crate::chunk_pipeline::voxels::volume::PaddedGrid;
    use cgmath::{Point3, Vector3};

    fn triangle(offset: f32) -> MeshBuffers {
        MeshBuffers {
            vertices: (0..3)
                .map(|i| {
                    ChunkVertex::new([offset + i as f32, offset, 0.0], [0.0, 1.0, 0.0], 0, [0.0, 0.0])
                })
                .collect(),
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn test_indices_are_rebased_per_submesh() {
        let mut context = MeshBuildContext::new(PaddedGrid::new(Vector3::new(2, 2, 2)));
        context.core = triangle(0.0);
        context.skirts[3] = triangle(10.0);

        merge_buffers(&mut context);
        assert_eq!(context.submeshes.len(), 7);
        assert_eq!(context.submeshes[0], SubMesh { index_offset: 0, index_count: 3 });
        assert_eq!(context.submeshes[4], SubMesh { index_offset: 3, index_count: 3 });
        assert_eq!(context.submeshes[1].index_count, 0);
        assert_eq!(&context.merged.indices[3..], &[3, 4, 5]);

        finalize_description(&mut context);
        let description = context.description.as_ref().unwrap();
        assert_eq!(description.vertices.len(), 6);
        assert_eq!(description.bounds.min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(description.bounds.max, Point3::new(12.0, 10.0, 0.0));
    }
}
