//! # Padded Voxel Volume
//!
//! Each chunk stores `(N + 2)` cells per axis: its `N` logical cells plus a
//! one-cell ring copied from the neighbours, so meshing never has to look outside
//! its own buffer. Cells are laid out x fastest, then y, then z. Logical cell `i`
//! lives at padded index `i + 1`.
//!
//! ## Architecture
//! The cell buffer is an `MtResource` shared with worker tasks. Access ordering is
//! tracked by two handles: the last scheduled write and the union of reads since
//! that write. New work depends on `access_handle()`; reads extend the pending
//! read set, writes replace both.

use cgmath::{Point3, Vector3};

use crate::core::{JobHandle, MtResource};

use super::voxel_cell::VoxelCell;

/// Dimensions of a padded grid and the index arithmetic over it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PaddedGrid {
    logical: [usize; 3],
}

impl PaddedGrid {
    /// # Panics
    /// Panics in debug builds if any axis is not positive.
    pub fn new(logical_size: Vector3<i32>) -> Self {
        debug_assert!(
            logical_size.x > 0 && logical_size.y > 0 && logical_size.z > 0,
            "chunk sizes are validated before a grid is built"
        );
        Self {
            logical: [
                logical_size.x.max(1) as usize,
                logical_size.y.max(1) as usize,
                logical_size.z.max(1) as usize,
            ],
        }
    }

    pub fn logical(&self) -> [usize; 3] {
        self.logical
    }

    pub fn padded(&self) -> [usize; 3] {
        [
            self.logical[0] + 2,
            self.logical[1] + 2,
            self.logical[2] + 2,
        ]
    }

    pub fn cell_count(&self) -> usize {
        let [x, y, z] = self.padded();
        x * y * z
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        let [px, py, _] = self.padded();
        x + px * (y + py * z)
    }

    /// Inverse of `index`.
    pub fn position(&self, index: usize) -> [usize; 3] {
        let [px, py, _] = self.padded();
        [index % px, (index / px) % py, index / (px * py)]
    }

    /// Padded position of a logical cell, or `None` outside `0..N`.
    pub fn padded_of_local(&self, local: Point3<i32>) -> Option<[usize; 3]> {
        let local = [local.x, local.y, local.z];
        let mut padded = [0usize; 3];
        for axis in 0..3 {
            if local[axis] < 0 || local[axis] as usize >= self.logical[axis] {
                return None;
            }
            padded[axis] = local[axis] as usize + 1;
        }
        Some(padded)
    }
}

/// The voxel storage of one chunk.
pub struct VoxelVolume {
    logical_size: Vector3<i32>,
    grid: PaddedGrid,
    cells: MtResource<Vec<VoxelCell>>,
    pending_read: JobHandle,
    pending_write: JobHandle,
}

impl VoxelVolume {
    /// Allocates a volume filled with air.
    pub fn new(logical_size: Vector3<i32>) -> Self {
        let grid = PaddedGrid::new(logical_size);
        Self {
            logical_size,
            grid,
            cells: MtResource::new(vec![VoxelCell::AIR; grid.cell_count()]),
            pending_read: JobHandle::completed(),
            pending_write: JobHandle::completed(),
        }
    }

    pub fn logical_size(&self) -> Vector3<i32> {
        self.logical_size
    }

    pub fn padded_size(&self) -> [usize; 3] {
        self.grid.padded()
    }

    pub fn grid(&self) -> PaddedGrid {
        self.grid
    }

    pub fn cell_count(&self) -> usize {
        self.grid.cell_count()
    }

    pub fn index_of(&self, x: usize, y: usize, z: usize) -> usize {
        self.grid.index(x, y, z)
    }

    /// Flat index of a logical cell, or `None` outside the interior.
    pub fn padded_index_of_local(&self, local: Point3<i32>) -> Option<usize> {
        self.grid
            .padded_of_local(local)
            .map(|[x, y, z]| self.grid.index(x, y, z))
    }

    /// Reads one cell. Takes the buffer's read lock for the duration of the call.
    pub fn get(&self, index: usize) -> Option<VoxelCell> {
        self.cells.get().get(index).copied()
    }

    /// Writes one cell. Returns false if the index is out of range.
    pub fn set(&self, index: usize, cell: VoxelCell) -> bool {
        match self.cells.get_mut().get_mut(index) {
            Some(slot) => {
                *slot = cell;
                true
            }
            None => false,
        }
    }

    /// The shared cell buffer, for tasks that run behind `access_handle()`.
    pub fn cells(&self) -> MtResource<Vec<VoxelCell>> {
        self.cells.clone()
    }

    /// Reallocates the buffer when the logical size changed.
    ///
    /// Tasks that still hold the previous buffer keep it alive until they finish.
    ///
    /// # Returns
    /// Whether a new buffer was allocated
    pub fn resize(&mut self, logical_size: Vector3<i32>) -> bool {
        if logical_size == self.logical_size {
            return false;
        }
        *self = Self::new(logical_size);
        true
    }

    /// Combined handle of every scheduled access.
    pub fn access_handle(&self) -> JobHandle {
        JobHandle::combine([self.pending_read.clone(), self.pending_write.clone()])
    }

    /// Records a read scheduled behind `access_handle()`.
    pub fn set_pending_read(&mut self, handle: JobHandle) {
        self.pending_read = JobHandle::combine([self.pending_read.clone(), handle]);
    }

    /// Records a write scheduled behind `access_handle()`.
    pub fn set_pending_write(&mut self, handle: JobHandle) {
        self.pending_write = handle;
        self.pending_read = JobHandle::completed();
    }

    pub fn pending_write(&self) -> &JobHandle {
        &self.pending_write
    }

    pub fn is_idle(&self) -> bool {
        self.access_handle().is_complete()
    }
}
