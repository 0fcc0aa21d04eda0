//! Node-based sparse voxel octree.
//!
//! Each branch owns its eight children directly, which makes edits cheap.
//! The render pipeline only accepts [`PackedOctree`]; convert with
//! [`PackedOctree::from_node_octree`] before rendering.
//!
//! [`PackedOctree`]: crate::PackedOctree
//! [`PackedOctree::from_node_octree`]: crate::PackedOctree::from_node_octree

use voxtrace_core::types::BlockId;

use crate::child_index;
use crate::storage::VoxelStorage;

/// One node of a [`NodeOctree`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OctreeNode {
    /// Every voxel below is air.
    #[default]
    Empty,
    /// Every voxel below holds the same non-air block.
    Leaf(BlockId),
    /// Eight children in `x | y << 1 | z << 2` order.
    Branch(Box<[OctreeNode; 8]>),
}

impl OctreeNode {
    /// Leaf for `block`, or `Empty` for air.
    pub fn leaf(block: BlockId) -> Self {
        if block.is_air() {
            Self::Empty
        } else {
            Self::Leaf(block)
        }
    }

    /// Branch whose eight children all hold `block`.
    pub fn uniform_branch(block: BlockId) -> Self {
        Self::Branch(Box::new(std::array::from_fn(|_| Self::leaf(block))))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<BlockId> {
        if let Self::Leaf(id) = self {
            Some(*id)
        } else {
            None
        }
    }

    pub fn as_branch(&self) -> Option<&[OctreeNode; 8]> {
        if let Self::Branch(children) = self {
            Some(children)
        } else {
            None
        }
    }

    /// Block every voxel under a non-branch node holds.
    fn uniform_block(&self) -> Option<BlockId> {
        match self {
            Self::Empty => Some(BlockId::AIR),
            Self::Leaf(id) => Some(*id),
            Self::Branch(_) => None,
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn count_nodes(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    /// Inline plus boxed size of this subtree in bytes.
    pub fn memory_usage(&self) -> usize {
        let mut bytes = 0;
        self.visit(&mut |node| {
            bytes += std::mem::size_of::<Self>();
            if node.as_branch().is_some() {
                bytes += std::mem::size_of::<[OctreeNode; 8]>();
            }
        });
        bytes
    }

    fn visit(&self, f: &mut impl FnMut(&OctreeNode)) {
        f(self);
        if let Self::Branch(children) = self {
            for child in children.iter() {
                child.visit(f);
            }
        }
    }

    /// Write `block` at `pos` inside a subtree `2^level` voxels wide,
    /// splitting uniform nodes on the way down and merging on the way up.
    fn write(&mut self, pos: [u32; 3], level: u32, block: BlockId) {
        if level == 0 {
            *self = Self::leaf(block);
            return;
        }
        if let Some(current) = self.uniform_block() {
            if current == block {
                return;
            }
            *self = Self::uniform_branch(current);
        }
        if let Self::Branch(children) = self {
            let slot = child_index(pos[0], pos[1], pos[2], level - 1);
            children[slot].write(pos, level - 1, block);
            if let Some(node) = merged(children) {
                *self = node;
            }
        }
    }
}

/// The single node eight identical non-branch children collapse into.
fn merged(children: &[OctreeNode; 8]) -> Option<OctreeNode> {
    let first = &children[0];
    let uniform = first.as_branch().is_none() && children.iter().all(|c| c == first);
    uniform.then(|| first.clone())
}

/// Sparse voxel octree of owned nodes, `2^depth` voxels per axis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeOctree {
    root: OctreeNode,
    depth: u32,
}

impl NodeOctree {
    /// Empty octree of the given depth.
    pub fn new(depth: u32) -> Self {
        Self::from_root(depth, OctreeNode::Empty)
    }

    pub fn from_root(depth: u32, root: OctreeNode) -> Self {
        Self { root, depth }
    }

    pub fn root(&self) -> &OctreeNode {
        &self.root
    }

    fn contains(&self, x: u32, y: u32, z: u32) -> bool {
        let size = self.size();
        x < size && y < size && z < size
    }
}

impl VoxelStorage for NodeOctree {
    fn get(&self, x: u32, y: u32, z: u32) -> BlockId {
        if !self.contains(x, y, z) {
            return BlockId::AIR;
        }
        let mut node = &self.root;
        let mut level = self.depth;
        loop {
            match node {
                OctreeNode::Empty => return BlockId::AIR,
                OctreeNode::Leaf(id) => return *id,
                // A branch at voxel level is malformed; treat it as air
                OctreeNode::Branch(_) if level == 0 => return BlockId::AIR,
                OctreeNode::Branch(children) => {
                    level -= 1;
                    node = &children[child_index(x, y, z, level)];
                }
            }
        }
    }

    fn set(&mut self, x: u32, y: u32, z: u32, block: BlockId) {
        if self.contains(x, y, z) {
            self.root.write([x, y, z], self.depth, block);
        }
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.root.memory_usage()
    }

    fn implementation_name(&self) -> &'static str {
        "NodeOctree"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STONE: BlockId = BlockId(1);

    #[test]
    fn new_octree_is_air_and_unpacked() {
        let octree = NodeOctree::new(5);
        assert!(octree.is_empty());
        assert_eq!(octree.size(), 32);
        assert_eq!(octree.get(31, 0, 17), BlockId::AIR);
        assert!(octree.as_packed().is_none());
        assert_eq!(octree.root().count_nodes(), 1);
    }

    #[test]
    fn single_voxel_splits_one_path() {
        let mut octree = NodeOctree::new(3);
        octree.set(5, 2, 6, BlockId(42));

        assert_eq!(octree.get(5, 2, 6), BlockId(42));
        assert_eq!(octree.get(5, 2, 7), BlockId::AIR);
        // Root plus three levels of eight children along one path
        assert_eq!(octree.root().count_nodes(), 1 + 3 * 8);
    }

    #[test]
    fn filled_region_merges_into_one_leaf() {
        let mut octree = NodeOctree::new(2);
        octree.fill([0, 0, 0], [4, 4, 4], STONE);

        assert_eq!(octree.root(), &OctreeNode::Leaf(STONE));
        assert_eq!(octree.root().count_nodes(), 1);
    }

    #[test]
    fn overwriting_with_air_restores_empty_root() {
        let mut octree = NodeOctree::new(3);
        octree.set(1, 2, 3, BlockId(5));
        octree.set(1, 2, 3, BlockId::AIR);
        assert_eq!(octree, NodeOctree::new(3));
    }

    #[test]
    fn out_of_bounds_is_air_and_ignored() {
        let mut octree = NodeOctree::new(3);
        octree.set(8, 0, 0, STONE);
        assert!(octree.is_empty());
        assert_eq!(octree.get(100, 100, 100), BlockId::AIR);
    }

    #[test]
    fn malformed_branch_at_voxel_level_reads_air() {
        let octree = NodeOctree::from_root(0, OctreeNode::uniform_branch(STONE));
        assert_eq!(octree.get(0, 0, 0), BlockId::AIR);
    }

    #[test]
    fn memory_grows_with_branches() {
        let mut octree = NodeOctree::new(4);
        let empty = octree.memory_usage();
        octree.fill_sphere([8.0, 8.0, 8.0], 3.0, BlockId(2));

        assert!(octree.memory_usage() > empty);
        assert_eq!(octree.get(8, 8, 5), octree.get(8, 8, 10));
    }
}
