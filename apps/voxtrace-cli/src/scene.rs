//! Demo worlds rendered by the CLI.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use glam::Vec3;
use tracing::info;
use voxtrace_core::{BlockId, Material};
use voxtrace_render::{Block, BlockPalette, Camera, Texture};
use voxtrace_voxel::{PackedOctree, VoxelStorage};

/// Octree depth of every demo world: 64 voxels per axis.
const WORLD_DEPTH: u32 = 6;

/// Built-in demo world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SceneKind {
    /// Rolling hills with a lamp post.
    #[default]
    Terrain,
    /// A single stone cube.
    Cube,
    /// Metal and emissive spheres on a floor.
    Spheres,
}

impl fmt::Display for SceneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Terrain => "terrain",
            Self::Cube => "cube",
            Self::Spheres => "spheres",
        })
    }
}

impl FromStr for SceneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terrain" => Ok(Self::Terrain),
            "cube" => Ok(Self::Cube),
            "spheres" => Ok(Self::Spheres),
            other => Err(format!(
                "unknown scene `{other}` (expected terrain, cube, or spheres)"
            )),
        }
    }
}

/// Block ids of [`demo_palette`].
struct Blocks {
    stone: BlockId,
    grass: BlockId,
    dirt: BlockId,
    lamp: BlockId,
    metal: BlockId,
}

/// World, palette, and viewpoint of a demo scene.
pub struct DemoScene {
    pub palette: Arc<BlockPalette>,
    pub octree: Arc<dyn VoxelStorage>,
    pub camera: Camera,
}

/// Build the demo scene `kind`.
pub fn build(kind: SceneKind) -> DemoScene {
    let (palette, blocks) = demo_palette();
    let mut octree = PackedOctree::new(WORLD_DEPTH);
    let size = octree.size();

    let camera = match kind {
        SceneKind::Terrain => {
            generate_terrain(&mut octree, &blocks);
            Camera::new(Vec3::new(-8.0, 40.0, -8.0)).looking_at(Vec3::new(32.0, 16.0, 32.0))
        }
        SceneKind::Cube => {
            octree.fill([24, 24, 24], [40, 40, 40], blocks.stone);
            Camera::new(Vec3::new(60.0, 52.0, 80.0)).looking_at(Vec3::splat(32.0))
        }
        SceneKind::Spheres => {
            octree.fill([0, 0, 0], [size, 2, size], blocks.stone);
            octree.fill_sphere([20.0, 10.0, 32.0], 8.0, blocks.metal);
            octree.fill_sphere([44.0, 8.0, 28.0], 6.0, blocks.lamp);
            octree.fill_sphere([32.0, 6.0, 46.0], 4.0, blocks.grass);
            Camera::new(Vec3::new(32.0, 24.0, 90.0)).looking_at(Vec3::new(32.0, 8.0, 32.0))
        }
    };

    info!(
        "Built {kind} scene: {} voxels per axis, {} octree records",
        size,
        octree.node_count()
    );

    DemoScene {
        palette: Arc::new(palette),
        octree: Arc::new(octree),
        camera,
    }
}

fn demo_palette() -> (BlockPalette, Blocks) {
    let mut palette = BlockPalette::new();
    let blocks = Blocks {
        stone: palette.add(Block::new("stone", Arc::new(speckled(16, 0xFF7F_7F7F, 0xFF6A_6A6A)))),
        grass: palette.add(Block::new("grass", Arc::new(speckled(16, 0xFF4C_9A2A, 0xFF3E_8420)))),
        dirt: palette.add(Block::new("dirt", Arc::new(speckled(16, 0xFF86_5A3A, 0xFF70_4A30)))),
        lamp: palette.add(
            Block::new("lamp", Arc::new(Texture::solid(4, 4, 0xFFFF_E8A0)))
                .with_material(Material::EMISSIVE),
        ),
        metal: palette.add(
            Block::new("metal", Arc::new(speckled(8, 0xFFC0_C4CC, 0xFFB0_B4BC)))
                .with_material(Material::METAL),
        ),
    };
    (palette, blocks)
}

/// Square texture alternating two colors in a fixed pseudo-random pattern.
fn speckled(size: u32, base: u32, speck: u32) -> Texture {
    let pixels = (0..size * size)
        .map(|i| {
            if i.wrapping_mul(2_654_435_761) >> 28 < 5 {
                speck
            } else {
                base
            }
        })
        .collect();
    Texture::new(size, size, pixels).unwrap_or_else(|_| Texture::solid(size, size, base))
}

fn generate_terrain(octree: &mut PackedOctree, blocks: &Blocks) {
    let size = octree.size();
    for z in 0..size {
        for x in 0..size {
            let (fx, fz) = (x as f32, z as f32);
            let height = 12.0 + 5.0 * (fx * 0.15).sin() + 4.0 * (fz * 0.11).cos()
                + 2.0 * ((fx + fz) * 0.3).sin();
            let top = (height.max(1.0) as u32).min(size - 1);

            octree.fill([x, 0, z], [x + 1, top.saturating_sub(3), z + 1], blocks.stone);
            octree.fill(
                [x, top.saturating_sub(3), z],
                [x + 1, top, z + 1],
                blocks.dirt,
            );
            octree.set(x, top, z, blocks.grass);
        }
    }

    let post = [size / 2, size / 2];
    octree.fill([post[0], 0, post[1]], [post[0] + 1, 30, post[1] + 1], blocks.metal);
    octree.fill(
        [post[0] - 1, 30, post[1] - 1],
        [post[0] + 2, 33, post[1] + 2],
        blocks.lamp,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_names_round_trip() {
        for kind in [SceneKind::Terrain, SceneKind::Cube, SceneKind::Spheres] {
            assert_eq!(kind.to_string().parse::<SceneKind>(), Ok(kind));
        }
        assert!("castle".parse::<SceneKind>().is_err());
    }

    #[test]
    fn scenes_use_the_packed_representation() {
        for kind in [SceneKind::Terrain, SceneKind::Cube, SceneKind::Spheres] {
            let scene = build(kind);
            assert!(scene.octree.as_packed().is_some());
            assert!(!scene.octree.is_empty());
            assert_eq!(scene.palette.len(), 6);
        }
    }

    #[test]
    fn terrain_has_grass_on_top() {
        let (_, blocks) = demo_palette();
        let mut octree = PackedOctree::new(WORLD_DEPTH);
        generate_terrain(&mut octree, &blocks);

        let column = (0..octree.size()).rev().find(|&y| octree.get(3, y, 3) != BlockId::AIR);
        assert_eq!(column.map(|y| octree.get(3, y, 3)), Some(blocks.grass));
        assert_eq!(octree.get(3, 0, 3), blocks.stone);
    }
}
