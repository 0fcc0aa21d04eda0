//! Shared scenes, palettes, and kernels for pipeline tests.

use std::sync::Arc;

use glam::Vec3;
use voxtrace_core::constants::COMPONENTS_PER_PIXEL;
use voxtrace_core::{BlockId, KernelSignature, Material};
use voxtrace_gpu::{HostBindings, HostKernel};
use voxtrace_render::{Block, BlockPalette, Camera, Texture};
use voxtrace_shaders::render_kernel_signature;
use voxtrace_voxel::{PackedOctree, VoxelStorage};

/// Block ids assigned by [`test_palette`].
pub const STONE: BlockId = BlockId(1);
pub const GRASS: BlockId = BlockId(2);
pub const LAMP: BlockId = BlockId(3);
pub const GLASS: BlockId = BlockId(4);

/// Palette with stone, grass, lamp, and glass blocks, in that order.
pub fn test_palette() -> Arc<BlockPalette> {
    let mut palette = BlockPalette::new();
    palette.add(Block::new("stone", Arc::new(Texture::solid(4, 4, 0xFF80_8080))));

    let mut grass = vec![0xFF2E_8B22_u32; 8 * 8];
    for (i, texel) in grass.iter_mut().enumerate() {
        if (i / 8 + i % 8) % 3 == 0 {
            *texel = 0xFF3C_B043;
        }
    }
    palette.add(Block::new(
        "grass",
        Arc::new(Texture::new(8, 8, grass).unwrap_or_else(|_| Texture::solid(8, 8, 0xFF2E_8B22))),
    ));

    palette.add(
        Block::new("lamp", Arc::new(Texture::solid(2, 2, 0xFFFF_F0C0)))
            .with_material(Material::EMISSIVE),
    );
    palette.add(Block::new("glass", Arc::new(Texture::solid(1, 1, 0x40FF_FFFF))).invisible());
    Arc::new(palette)
}

/// Packed octree with the half-open box `[min, max)` filled with `block`.
pub fn cube_octree(depth: u32, min: [u32; 3], max: [u32; 3], block: BlockId) -> PackedOctree {
    let mut octree = PackedOctree::new(depth);
    octree.fill(min, max, block);
    octree
}

/// Stone floor with a grass cube, a lamp, and a glass pane above it.
pub fn floor_scene(depth: u32) -> PackedOctree {
    let mut octree = PackedOctree::new(depth);
    let size = octree.size();
    let center = size / 2;
    let quarter = (size / 4).max(1);

    octree.fill([0, 0, 0], [size, 1, size], STONE);
    octree.fill(
        [center - quarter / 2, 1, center - quarter / 2],
        [center + quarter / 2 + 1, quarter + 1, center + quarter / 2 + 1],
        GRASS,
    );
    octree.set(0, 1, 0, LAMP);
    octree.fill([0, quarter + 2, 0], [size, quarter + 3, 1], GLASS);
    octree
}

/// Camera on the +z side of an octree, looking at its center.
pub fn test_camera(octree_size: u32, distance_factor: f32) -> Camera {
    let center = Vec3::splat(octree_size as f32 / 2.0);
    let distance = octree_size as f32 * distance_factor;
    Camera::new(center + Vec3::Z * distance).looking_at(center)
}

/// Kernel that writes `pixel + component / 4` to every result value, so
/// merged samples can be checked exactly.
#[derive(Clone, Copy, Debug, Default)]
pub struct IndexKernel;

impl IndexKernel {
    /// Value the kernel writes at `index` of the result buffer.
    pub fn expected(index: usize) -> f32 {
        let pixel = index / COMPONENTS_PER_PIXEL;
        let component = index % COMPONENTS_PER_PIXEL;
        pixel as f32 + component as f32 * 0.25
    }
}

impl HostKernel for IndexKernel {
    fn signature(&self) -> KernelSignature {
        render_kernel_signature()
    }

    fn run(&self, bindings: &mut HostBindings, work_items: u32) -> voxtrace_gpu::Result<()> {
        let (_, result) = bindings.split_output::<f32>(6)?;
        let values = (work_items as usize * COMPONENTS_PER_PIXEL).min(result.len());
        for (i, value) in result[..values].iter_mut().enumerate() {
            *value = Self::expected(i);
        }
        Ok(())
    }
}
