//! # Voxel Cell
//!
//! The 4-byte unit stored in every chunk volume and written by the generation
//! kernels. The layout is shared with the GPU: `material_id` occupies the low 16
//! bits of each `u32` in the kernel output buffer and `density` the high 16 bits.
//!
//! ## Encoding
//! - `material_id > 0`: a solid block of that material. `density` is free metadata.
//! - `material_id <= 0`: an isosurface cell of material `-material_id`. `density`
//!   is a signed fixed-point value, `density / i16::MAX`, in `[-1, 1]`.
//!   Positive density is inside the surface.
//! - `material_id == 0 && density <= 0`: air.

use serde::{Deserialize, Serialize};

/// Material identifier as stored in a cell.
pub type MaterialId = i16;

/// Scale between fixed-point cell density and `f32` density.
pub const DENSITY_SCALE: f32 = i16::MAX as f32;

#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable, Serialize, Deserialize,
)]
pub struct VoxelCell {
    pub material_id: MaterialId,
    pub density: i16,
}

impl VoxelCell {
    /// Fully empty isosurface cell.
    pub const AIR: VoxelCell = VoxelCell {
        material_id: 0,
        density: -i16::MAX,
    };

    /// A solid block cell.
    pub fn block(material_id: MaterialId) -> Self {
        debug_assert!(material_id > 0, "block materials are positive");
        Self {
            material_id,
            density: 0,
        }
    }

    /// An isosurface cell with `density` clamped into `[-1, 1]` and quantized.
    pub fn isosurface(material_id: MaterialId, density: f32) -> Self {
        debug_assert!(material_id <= 0, "isosurface materials are zero or negative");
        Self {
            material_id,
            density: quantize_density(density),
        }
    }

    pub fn is_block(&self) -> bool {
        self.material_id > 0
    }

    pub fn is_isosurface(&self) -> bool {
        self.material_id <= 0
    }

    pub fn is_air(&self) -> bool {
        self.material_id == 0 && self.density <= 0
    }

    pub fn is_solid(&self) -> bool {
        self.is_block() || self.density > 0
    }

    /// Density as used by the mesher. Blocks always count as fully inside.
    pub fn density_value(&self) -> f32 {
        if self.is_block() {
            1.0
        } else {
            (self.density as f32 / DENSITY_SCALE).clamp(-1.0, 1.0)
        }
    }
}

pub fn quantize_density(density: f32) -> i16 {
    (density.clamp(-1.0, 1.0) * DENSITY_SCALE).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_is_four_bytes() {
        assert_eq!(std::mem::size_of::<VoxelCell>(), 4);
    }

    #[test]
    fn test_block_predicates() {
        let block = VoxelCell::block(3);
        assert!(block.is_block());
        assert!(block.is_solid());
        assert!(!block.is_isosurface());
        assert!(!block.is_air());
        assert_eq!(block.density_value(), 1.0);
    }

    #[test]
    fn test_isosurface_predicates() {
        assert!(VoxelCell::AIR.is_air());
        assert!(!VoxelCell::AIR.is_solid());

        let rock = VoxelCell::isosurface(-2, 0.5);
        assert!(rock.is_isosurface());
        assert!(rock.is_solid());
        assert!(!rock.is_air());
        assert!((rock.density_value() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_density_is_clamped() {
        assert_eq!(VoxelCell::isosurface(0, 3.0).density, i16::MAX);
        assert_eq!(VoxelCell::isosurface(0, -3.0).density, -i16::MAX);
        let extreme = VoxelCell {
            material_id: 0,
            density: i16::MIN,
        };
        assert_eq!(extreme.density_value(), -1.0);
    }

    #[test]
    fn test_gpu_word_layout() {
        let cell = VoxelCell {
            material_id: -2,
            density: 100,
        };
        let word: u32 = bytemuck::cast(cell);
        assert_eq!(word & 0xffff, (-2i16) as u16 as u32);
        assert_eq!(word >> 16, 100);
    }
}
