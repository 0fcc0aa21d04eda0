//! Common interface of octree representations.

use voxtrace_core::types::BlockId;

use crate::packed::PackedOctree;

/// Voxel storage backed by an octree of `2^depth` voxels per axis.
pub trait VoxelStorage: Send + Sync {
    /// Block at the given position; air outside the octree bounds.
    fn get(&self, x: u32, y: u32, z: u32) -> BlockId;

    /// Set the block at the given position; no-op outside the octree bounds.
    fn set(&mut self, x: u32, y: u32, z: u32, block: BlockId);

    /// Octree depth.
    fn depth(&self) -> u32;

    /// Edge length in voxels.
    fn size(&self) -> u32 {
        1 << self.depth()
    }

    /// Returns true if every voxel is air.
    fn is_empty(&self) -> bool;

    /// Approximate heap and inline memory usage in bytes.
    fn memory_usage(&self) -> usize;

    /// Human-readable name of the representation, used in diagnostics.
    fn implementation_name(&self) -> &'static str;

    /// The packed representation, if this storage is one.
    fn as_packed(&self) -> Option<&PackedOctree> {
        None
    }

    /// Fill the half-open box `[min, max)` with a block type.
    fn fill(&mut self, min: [u32; 3], max: [u32; 3], block: BlockId) {
        let size = self.size();
        for z in min[2].min(size)..max[2].min(size) {
            for y in min[1].min(size)..max[1].min(size) {
                for x in min[0].min(size)..max[0].min(size) {
                    self.set(x, y, z, block);
                }
            }
        }
    }

    /// Fill every voxel whose center lies inside a sphere.
    fn fill_sphere(&mut self, center: [f32; 3], radius: f32, block: BlockId) {
        let size = self.size();
        let r2 = radius * radius;

        let lower = |c: f32| ((c - radius).floor().max(0.0) as u32).min(size);
        let upper = |c: f32| ((c + radius).ceil().max(0.0) as u32).min(size);

        for z in lower(center[2])..upper(center[2]) {
            for y in lower(center[1])..upper(center[1]) {
                for x in lower(center[0])..upper(center[0]) {
                    let dx = x as f32 + 0.5 - center[0];
                    let dy = y as f32 + 0.5 - center[1];
                    let dz = z as f32 + 0.5 - center[2];
                    if dx * dx + dy * dy + dz * dz <= r2 {
                        self.set(x, y, z, block);
                    }
                }
            }
        }
    }
}
