//! Linearization of a packed octree into the kernel's node buffer.
//!
//! The buffer stores one `i32` record per node, breadth first. A positive
//! record is a branch whose eight children start `value` records after it; a
//! non-positive record is a leaf of block `-value`. The root is record 0.

use std::collections::VecDeque;

use thiserror::Error;
use voxtrace_core::constants::MAX_OCTREE_DEPTH;

use crate::packed::{leaf_record, PackedNode};
use crate::storage::VoxelStorage;
use crate::svo::{NodeOctree, OctreeNode};

/// Failure to produce a node buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackError {
    /// The octree is not a [`PackedOctree`](crate::PackedOctree).
    #[error("{implementation} is not supported, only the packed octree representation is supported")]
    Unsupported { implementation: &'static str },

    #[error("octree depth {depth} exceeds the maximum of {max}")]
    TooDeep { depth: u32, max: u32 },

    #[error("octree has {0} nodes, more than a node buffer can address")]
    TooLarge(usize),

    #[error("block id {block} does not fit in a node record")]
    BlockOutOfRange { block: u32 },
}

/// Node buffer in the kernel's self-relative layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OctreeBuffer {
    depth: u32,
    nodes: Vec<i32>,
}

impl OctreeBuffer {
    /// Octree depth; the kernel's `octreeDepth` argument.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Node records.
    pub fn nodes(&self) -> &[i32] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Size of the node array in bytes.
    pub fn byte_size(&self) -> usize {
        std::mem::size_of_val(self.nodes.as_slice())
    }

    /// Node records as raw bytes for upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    /// Decode the record at `index`.
    pub fn node(&self, index: usize) -> Option<PackedNode> {
        self.nodes
            .get(index)
            .map(|&value| PackedNode::decode(value, index))
    }

    /// Rebuild the node tree this buffer encodes.
    pub fn to_node_octree(&self) -> NodeOctree {
        NodeOctree::from_root(self.depth, self.node_tree(0))
    }

    fn node_tree(&self, index: usize) -> OctreeNode {
        match self.node(index) {
            Some(PackedNode::Leaf(block)) => OctreeNode::leaf(block),
            Some(PackedNode::Branch { first_child }) => OctreeNode::Branch(Box::new(
                std::array::from_fn(|slot| self.node_tree(first_child + slot)),
            )),
            None => OctreeNode::Empty,
        }
    }
}

/// Pack `octree` into a node buffer.
///
/// Only [`PackedOctree`](crate::PackedOctree) is accepted. Free blocks of the
/// source array are not reachable from the root and are dropped.
pub fn pack_octree(octree: &dyn VoxelStorage) -> Result<OctreeBuffer, PackError> {
    let Some(packed) = octree.as_packed() else {
        return Err(PackError::Unsupported {
            implementation: octree.implementation_name(),
        });
    };

    let depth = packed.depth();
    if depth > MAX_OCTREE_DEPTH {
        return Err(PackError::TooDeep {
            depth,
            max: MAX_OCTREE_DEPTH,
        });
    }

    let mut nodes = Vec::with_capacity(packed.node_count());
    nodes.push(0);
    // (source index, output index)
    let mut queue = VecDeque::from([(0_usize, 0_usize)]);

    while let Some((source, out)) = queue.pop_front() {
        match packed.node(source) {
            Some(PackedNode::Branch { first_child }) => {
                let first_out = nodes.len();
                if first_out + 8 > i32::MAX as usize {
                    return Err(PackError::TooLarge(first_out + 8));
                }
                nodes[out] = (first_out - out) as i32;
                nodes.resize(first_out + 8, 0);
                for slot in 0..8 {
                    queue.push_back((first_child + slot, first_out + slot));
                }
            }
            Some(PackedNode::Leaf(block)) => {
                nodes[out] =
                    leaf_record(block).ok_or(PackError::BlockOutOfRange { block: block.0 })?;
            }
            None => nodes[out] = 0,
        }
    }

    tracing::debug!(
        depth,
        nodes = nodes.len(),
        dropped = packed.tree_data().len().saturating_sub(nodes.len()),
        "Packed octree"
    );

    Ok(OctreeBuffer { depth, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeOctree, PackedOctree};
    use voxtrace_core::types::BlockId;

    fn sample_tree() -> PackedOctree {
        let mut octree = PackedOctree::new(3);
        octree.fill([0, 0, 0], [8, 1, 8], BlockId(1));
        octree.set(5, 5, 5, BlockId(2));
        octree.set(1, 6, 2, BlockId(3));
        octree
    }

    #[test]
    fn rejects_node_octree() {
        let mut octree = NodeOctree::new(3);
        octree.set(1, 1, 1, BlockId(1));

        let err = pack_octree(&octree).unwrap_err();
        assert_eq!(
            err,
            PackError::Unsupported {
                implementation: "NodeOctree"
            }
        );
        assert!(err
            .to_string()
            .contains("only the packed octree representation is supported"));
    }

    #[test]
    fn empty_octree_packs_to_single_leaf() {
        let buffer = pack_octree(&PackedOctree::new(4)).unwrap();
        assert_eq!(buffer.nodes(), &[0]);
        assert_eq!(buffer.depth(), 4);
        assert_eq!(buffer.byte_size(), 4);
    }

    #[test]
    fn children_are_addressed_relative_to_parent() {
        let buffer = pack_octree(&sample_tree()).unwrap();

        for index in 0..buffer.node_count() {
            let value = buffer.nodes()[index];
            if value > 0 {
                let first = index + value as usize;
                assert!(first > index);
                assert!(first + 8 <= buffer.node_count());
                assert_eq!(
                    buffer.node(index),
                    Some(PackedNode::Branch { first_child: first })
                );
            }
        }
        assert_eq!(buffer.node(0), Some(PackedNode::Branch { first_child: 1 }));
    }

    #[test]
    fn reconstruction_preserves_topology() {
        let source = sample_tree();
        let buffer = pack_octree(&source).unwrap();
        let rebuilt = buffer.to_node_octree();
        let expected = source.to_node_octree();

        assert_eq!(rebuilt.root().count_nodes(), expected.root().count_nodes());
        assert_eq!(buffer.node_count(), expected.root().count_nodes());
        assert_eq!(rebuilt, expected);
    }

    #[test]
    fn free_blocks_are_compacted_away() {
        let mut octree = sample_tree();
        // Subdivide then collapse a region so the source array gains a hole.
        octree.set(7, 7, 7, BlockId(4));
        octree.set(7, 7, 7, BlockId::AIR);
        assert!(octree.free_block_count() > 0);

        let buffer = pack_octree(&octree).unwrap();
        assert_eq!(buffer.node_count(), octree.node_count());
        assert!(buffer.node_count() < octree.tree_data().len());
        assert_eq!(buffer.to_node_octree(), octree.to_node_octree());
    }

    #[test]
    fn out_of_range_leaf_is_an_error() {
        let octree = PackedOctree {
            depth: 0,
            tree_data: vec![i32::MIN],
            free_blocks: Vec::new(),
        };
        assert_eq!(
            pack_octree(&octree),
            Err(PackError::BlockOutOfRange { block: 1 << 31 })
        );
    }

    #[test]
    fn rejects_excessive_depth() {
        let octree = PackedOctree::new(MAX_OCTREE_DEPTH + 1);
        assert!(matches!(
            pack_octree(&octree),
            Err(PackError::TooDeep { .. })
        ));
    }
}
