//! Sparse voxel octree storage for the Voxtrace renderer.
//!
//! Two octree representations implement [`VoxelStorage`]:
//! - [`NodeOctree`]: boxed node tree, convenient for editing
//! - [`PackedOctree`]: flat `i32` record array, the only representation the
//!   render pipeline accepts
//!
//! [`pack_octree`] linearizes a packed octree into the node buffer layout the
//! render kernel traverses.

pub mod pack;
pub mod packed;
pub mod storage;
pub mod svo;

pub use pack::{pack_octree, OctreeBuffer, PackError};
pub use packed::{PackedNode, PackedOctree};
pub use storage::VoxelStorage;
pub use svo::{NodeOctree, OctreeNode};

/// Child slot of the octant containing `(x, y, z)` at the given level.
///
/// Bit 0 selects +x, bit 1 selects +y, bit 2 selects +z.
#[inline]
pub(crate) const fn child_index(x: u32, y: u32, z: u32, level: u32) -> usize {
    let bit = 1 << level;
    let xi = ((x & bit) != 0) as usize;
    let yi = ((y & bit) != 0) as usize;
    let zi = ((z & bit) != 0) as usize;
    xi | (yi << 1) | (zi << 2)
}

#[cfg(test)]
mod tests {
    use super::child_index;

    #[test]
    fn child_index_calculation() {
        // Level 0: bottom bits
        assert_eq!(child_index(0, 0, 0, 0), 0b000);
        assert_eq!(child_index(1, 0, 0, 0), 0b001);
        assert_eq!(child_index(0, 1, 0, 0), 0b010);
        assert_eq!(child_index(1, 1, 0, 0), 0b011);
        assert_eq!(child_index(0, 0, 1, 0), 0b100);
        assert_eq!(child_index(1, 1, 1, 0), 0b111);

        // Level 1: second bits
        assert_eq!(child_index(0, 0, 0, 1), 0b000);
        assert_eq!(child_index(2, 0, 0, 1), 0b001);
        assert_eq!(child_index(0, 2, 0, 1), 0b010);
        assert_eq!(child_index(0, 0, 2, 1), 0b100);
    }
}
