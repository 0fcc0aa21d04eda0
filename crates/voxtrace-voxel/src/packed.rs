//! Flat-array octree.
//!
//! The tree is a single `Vec<i32>` of node records. Record 0 is the root.
//! A positive record is a branch whose eight children occupy the contiguous
//! records starting at that absolute index, in [`child_index`] order. A
//! non-positive record is a leaf holding the negated block id.
//!
//! Editing subdivides and merges in place. Blocks of eight records released
//! by a merge are kept on a free list and reused by later subdivisions, so the
//! array can contain holes that are unreachable from the root.

use voxtrace_core::types::BlockId;
use voxtrace_core::{Error, Result};

use crate::child_index;
use crate::storage::VoxelStorage;
use crate::svo::{NodeOctree, OctreeNode};

/// Decoded view of one node record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackedNode {
    /// Branch whose children start at `first_child`.
    Branch { first_child: usize },
    /// Uniform region of a single block type.
    Leaf(BlockId),
}

impl PackedNode {
    /// Decode a record whose child offsets are relative to `base`.
    #[inline]
    pub(crate) fn decode(value: i32, base: usize) -> Self {
        if value > 0 {
            Self::Branch {
                first_child: base + value as usize,
            }
        } else {
            Self::Leaf(BlockId(value.unsigned_abs()))
        }
    }
}

/// Record of a leaf holding `block`, or `None` past [`BlockId::MAX`].
#[inline]
pub(crate) fn leaf_record(block: BlockId) -> Option<i32> {
    i32::try_from(block.0).ok().map(|id| -id)
}

/// Octree stored as a flat array of `i32` node records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedOctree {
    pub(crate) depth: u32,
    pub(crate) tree_data: Vec<i32>,
    pub(crate) free_blocks: Vec<usize>,
}

impl PackedOctree {
    /// Create an empty octree of `2^depth` voxels per axis.
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            tree_data: vec![0],
            free_blocks: Vec::new(),
        }
    }

    /// Adopt an existing record array.
    ///
    /// Every branch reachable from the root must point to an in-bounds block
    /// of eight records located after it, no record may be reachable twice,
    /// no branch may sit below `depth` levels, and every reachable leaf must
    /// hold a block id no larger than [`BlockId::MAX`].
    pub fn from_raw(depth: u32, tree_data: Vec<i32>) -> Result<Self> {
        if tree_data.is_empty() {
            return Err(Error::InvalidData("octree has no root record".into()));
        }

        let mut reached = vec![false; tree_data.len()];
        let mut stack = vec![(0_usize, depth)];
        reached[0] = true;

        while let Some((index, level)) = stack.pop() {
            let first_child = match PackedNode::decode(tree_data[index], 0) {
                PackedNode::Branch { first_child } => first_child,
                PackedNode::Leaf(block) if block.0 > BlockId::MAX.0 => {
                    return Err(Error::InvalidData(format!(
                        "record {index} holds block id {}, above the maximum {}",
                        block.0,
                        BlockId::MAX.0
                    )));
                }
                PackedNode::Leaf(_) => continue,
            };

            if level == 0 {
                return Err(Error::InvalidData(format!(
                    "record {index} subdivides below the leaf level"
                )));
            }
            if first_child <= index || first_child + 8 > tree_data.len() {
                return Err(Error::OutOfBounds(format!(
                    "record {index} points to children at {first_child}, array holds {} records",
                    tree_data.len()
                )));
            }

            for child in first_child..first_child + 8 {
                if std::mem::replace(&mut reached[child], true) {
                    return Err(Error::InvalidData(format!(
                        "record {child} is shared by more than one branch"
                    )));
                }
                stack.push((child, level - 1));
            }
        }

        Ok(Self {
            depth,
            tree_data,
            free_blocks: Vec::new(),
        })
    }

    /// Build a packed octree with the same contents as `octree`.
    pub fn from_node_octree(octree: &NodeOctree) -> Self {
        let mut packed = Self::new(octree.depth());
        packed.tree_data[0] = packed.append_node(octree.root());
        packed
    }

    /// Reconstruct the equivalent node tree.
    pub fn to_node_octree(&self) -> NodeOctree {
        NodeOctree::from_root(self.depth, self.node_tree(0))
    }

    /// Raw node records, including unreachable free blocks.
    pub fn tree_data(&self) -> &[i32] {
        &self.tree_data
    }

    /// Decode the record at `index`.
    pub fn node(&self, index: usize) -> Option<PackedNode> {
        self.tree_data
            .get(index)
            .map(|&value| PackedNode::decode(value, 0))
    }

    /// Number of records reachable from the root.
    pub fn node_count(&self) -> usize {
        self.tree_data.len() - self.free_blocks.len() * 8
    }

    /// Number of released eight-record blocks awaiting reuse.
    pub fn free_block_count(&self) -> usize {
        self.free_blocks.len()
    }

    fn append_node(&mut self, node: &OctreeNode) -> i32 {
        match node {
            OctreeNode::Empty => 0,
            OctreeNode::Leaf(block) => leaf_record(*block).unwrap_or_else(|| {
                tracing::warn!("block id {} does not fit in a packed octree record", block.0);
                0
            }),
            OctreeNode::Branch(children) => {
                let first = self.tree_data.len();
                self.tree_data.resize(first + 8, 0);
                for (slot, child) in children.iter().enumerate() {
                    self.tree_data[first + slot] = self.append_node(child);
                }
                first as i32
            }
        }
    }

    fn node_tree(&self, index: usize) -> OctreeNode {
        match PackedNode::decode(self.tree_data[index], 0) {
            PackedNode::Leaf(block) => OctreeNode::leaf(block),
            PackedNode::Branch { first_child } => OctreeNode::Branch(Box::new(
                std::array::from_fn(|slot| self.node_tree(first_child + slot)),
            )),
        }
    }

    /// Reserve eight records filled with `value`, returning the first index.
    fn allocate_block(&mut self, value: i32) -> usize {
        let first = match self.free_blocks.pop() {
            Some(first) => first,
            None => {
                let first = self.tree_data.len();
                self.tree_data.resize(first + 8, 0);
                first
            }
        };
        self.tree_data[first..first + 8].fill(value);
        first
    }

    /// Collapse the branch at `index` if its children are identical leaves.
    fn try_merge(&mut self, index: usize) -> bool {
        let PackedNode::Branch { first_child } = PackedNode::decode(self.tree_data[index], 0) else {
            return false;
        };

        let children = &self.tree_data[first_child..first_child + 8];
        let first = children[0];
        if first > 0 || children.iter().any(|&c| c != first) {
            return false;
        }

        self.tree_data[index] = first;
        self.free_blocks.push(first_child);
        true
    }
}

impl VoxelStorage for PackedOctree {
    fn get(&self, x: u32, y: u32, z: u32) -> BlockId {
        let size = self.size();
        if x >= size || y >= size || z >= size {
            return BlockId::AIR;
        }

        let mut index = 0;
        let mut level = self.depth;
        loop {
            match PackedNode::decode(self.tree_data[index], 0) {
                PackedNode::Leaf(block) => return block,
                PackedNode::Branch { first_child } => {
                    if level == 0 {
                        return BlockId::AIR;
                    }
                    level -= 1;
                    index = first_child + child_index(x, y, z, level);
                }
            }
        }
    }

    fn set(&mut self, x: u32, y: u32, z: u32, block: BlockId) {
        let size = self.size();
        if x >= size || y >= size || z >= size {
            return;
        }
        let Some(value) = leaf_record(block) else {
            tracing::warn!("block id {} does not fit in a packed octree record", block.0);
            return;
        };
        let mut path = Vec::with_capacity(self.depth as usize);
        let mut index = 0;

        for level in (0..self.depth).rev() {
            let current = self.tree_data[index];
            if current == value {
                return;
            }
            let first_child = if current > 0 {
                current as usize
            } else {
                let first = self.allocate_block(current);
                self.tree_data[index] = first as i32;
                first
            };
            path.push(index);
            index = first_child + child_index(x, y, z, level);
        }

        self.tree_data[index] = value;

        for &parent in path.iter().rev() {
            if !self.try_merge(parent) {
                break;
            }
        }
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn is_empty(&self) -> bool {
        self.tree_data[0] == 0
    }

    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.tree_data.capacity() * std::mem::size_of::<i32>()
            + self.free_blocks.capacity() * std::mem::size_of::<usize>()
    }

    fn implementation_name(&self) -> &'static str {
        "PackedOctree"
    }

    fn as_packed(&self) -> Option<&PackedOctree> {
        Some(self)
    }
}
