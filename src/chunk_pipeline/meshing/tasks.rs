//! Worker tasks of the mesh build stage graph.

use crate::chunk_pipeline::task_management::task::Task;
use crate::chunk_pipeline::voxels::voxel_cell::VoxelCell;
use crate::core::MtResource;

use super::block_faces::build_block_faces;
use super::build_context::MeshBuildContext;
use super::dual_contouring::build_isosurface;
use super::merge::{finalize_description, merge_buffers};
use super::normals::compute_normals;
use super::skirts::build_skirts;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MeshStage {
    Normals,
    CoreMesh,
    Skirts,
    Merge,
    Finalize,
}

impl MeshStage {
    /// Stages in dependency order.
    pub const ALL: [MeshStage; 5] = [
        MeshStage::Normals,
        MeshStage::CoreMesh,
        MeshStage::Skirts,
        MeshStage::Merge,
        MeshStage::Finalize,
    ];
}

/// Runs one stage of one slot's build.
pub struct MeshStageTask {
    stage: MeshStage,
    cells: MtResource<Vec<VoxelCell>>,
    context: MtResource<MeshBuildContext>,
}

impl MeshStageTask {
    pub fn new(
        stage: MeshStage,
        cells: MtResource<Vec<VoxelCell>>,
        context: MtResource<MeshBuildContext>,
    ) -> Self {
        Self {
            stage,
            cells,
            context,
        }
    }
}

impl Task for MeshStageTask {
    fn name(&self) -> &'static str {
        match self.stage {
            MeshStage::Normals => "mesh normals",
            MeshStage::CoreMesh => "core mesh",
            MeshStage::Skirts => "mesh skirts",
            MeshStage::Merge => "mesh merge",
            MeshStage::Finalize => "mesh finalize",
        }
    }

    fn process(self: Box<Self>) {
        let mut context = self.context.get_mut();
        match self.stage {
            MeshStage::Normals => {
                let cells = self.cells.get();
                let grid = context.grid;
                compute_normals(&cells, &grid, &mut context.normals);
            }
            MeshStage::CoreMesh => {
                let cells = self.cells.get();
                build_isosurface(&cells, &mut context);
                build_block_faces(&cells, &mut context);
            }
            MeshStage::Skirts => build_skirts(&mut context),
            MeshStage::Merge => merge_buffers(&mut context),
            MeshStage::Finalize => finalize_description(&mut context),
        }
    }
}
