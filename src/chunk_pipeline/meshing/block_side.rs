//! # Block Side Module
//!
//! The six axis directions a face can point in. Used both for the faces of solid
//! blocks and for the six faces of a chunk that may carry skirts.

use cgmath::Vector3;

/// Represents the six possible faces of a voxel block or chunk.
///
/// The discriminant doubles as the bit index in `SkirtMask` and as the skirt
/// submesh order. The order is: [FRONT, BACK, BOTTOM, TOP, LEFT, RIGHT]
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum BlockSide {
    /// The front face (facing positive Z)
    FRONT = 0,

    /// The back face (facing negative Z)
    BACK = 1,

    /// The bottom face (facing negative Y)
    BOTTOM = 2,

    /// The top face (facing positive Y)
    TOP = 3,

    /// The left face (facing negative X)
    LEFT = 4,

    /// The right face (facing positive X)
    RIGHT = 5,
}

impl BlockSide {
    /// Returns an array containing all six faces in discriminant order.
    pub fn all() -> [BlockSide; 6] {
        [
            BlockSide::FRONT,
            BlockSide::BACK,
            BlockSide::BOTTOM,
            BlockSide::TOP,
            BlockSide::LEFT,
            BlockSide::RIGHT,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Axis the face is perpendicular to: 0 = x, 1 = y, 2 = z.
    pub fn axis(self) -> usize {
        match self {
            BlockSide::LEFT | BlockSide::RIGHT => 0,
            BlockSide::BOTTOM | BlockSide::TOP => 1,
            BlockSide::FRONT | BlockSide::BACK => 2,
        }
    }

    /// Whether the face points along the positive axis.
    pub fn is_positive(self) -> bool {
        matches!(self, BlockSide::FRONT | BlockSide::TOP | BlockSide::RIGHT)
    }

    pub fn normal(self) -> Vector3<i32> {
        let mut normal = [0; 3];
        normal[self.axis()] = if self.is_positive() { 1 } else { -1 };
        Vector3::from(normal)
    }

    /// Corners of a unit face centred on the origin, counter-clockwise when seen
    /// from outside.
    pub fn face_corners(self) -> [[f32; 3]; 4] {
        let axis = self.axis();
        let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
        let offset = if self.is_positive() { 0.5 } else { -0.5 };

        let uv = if self.is_positive() {
            [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)]
        } else {
            [(-0.5, -0.5), (-0.5, 0.5), (0.5, 0.5), (0.5, -0.5)]
        };

        uv.map(|(du, dv)| {
            let mut corner = [0.0; 3];
            corner[axis] = offset;
            corner[u] = du;
            corner[v] = dv;
            corner
        })
    }
}
