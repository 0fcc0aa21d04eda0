//! CPU implementation of the render kernel.
//!
//! Traces the same first-hit, textured, face-shaded image as the WGSL kernel
//! so the whole pipeline runs on machines without a Vulkan device.

use glam::{UVec3, Vec3};
use rayon::prelude::*;
use voxtrace_core::constants::{COMPONENTS_PER_PIXEL, MAX_OCTREE_DEPTH};
use voxtrace_core::KernelSignature;
use voxtrace_gpu::{HostBindings, HostKernel, Result};
use voxtrace_shaders::{render_kernel_signature, DEFAULT_SKY_COLOR};

use crate::palette::{GpuMaterial, MaterialFlags};

const MAX_STEPS: u32 = 1024;
const EPSILON: f32 = 1e-4;
const FAR: f32 = 1e30;

/// Nodes, palette, and atlas of one pass, as bound to the kernel.
#[derive(Clone, Copy, Debug)]
pub struct SceneView<'a> {
    pub depth: u32,
    pub nodes: &'a [i32],
    pub palette: &'a [GpuMaterial],
    pub atlas: &'a [u32],
}

fn exit_distance(origin: f32, dir: f32, lo: f32, hi: f32) -> f32 {
    if dir > 0.0 {
        (hi - origin) / dir
    } else if dir < 0.0 {
        (lo - origin) / dir
    } else {
        FAR
    }
}

fn entry_distance(origin: f32, dir: f32, lo: f32, hi: f32) -> f32 {
    if dir > 0.0 {
        (lo - origin) / dir
    } else if dir < 0.0 {
        (hi - origin) / dir
    } else if origin >= lo && origin <= hi {
        -FAR
    } else {
        FAR
    }
}

fn face_shade(axis: Option<usize>, dir: Vec3) -> f32 {
    match axis {
        Some(0) => 0.8,
        Some(1) if dir.y < 0.0 => 1.0,
        Some(1) => 0.5,
        Some(2) => 0.65,
        _ => 1.0,
    }
}

impl SceneView<'_> {
    /// Leaf record and level of the leaf containing `cell`.
    fn lookup(&self, cell: UVec3) -> (i32, u32) {
        let mut index = 0_usize;
        let mut level = self.depth;
        for _ in 0..=self.depth {
            let value = self.nodes.get(index).copied().unwrap_or(0);
            if value <= 0 || level == 0 {
                return (value, level);
            }
            level -= 1;
            let octant = ((cell.x >> level) & 1)
                | (((cell.y >> level) & 1) << 1)
                | (((cell.z >> level) & 1) << 2);
            index += value as usize + octant as usize;
        }
        (0, 0)
    }

    fn sample_texture(&self, material: &GpuMaterial, p: Vec3, axis: Option<usize>) -> Vec3 {
        let (u, v) = match axis {
            Some(0) => (p.z.fract(), 1.0 - p.y.fract()),
            Some(1) => (p.x.fract(), p.z.fract()),
            _ => (p.x.fract(), 1.0 - p.y.fract()),
        };
        let w = material.texture_width.max(1);
        let h = material.texture_height.max(1);
        let tx = ((u * w as f32) as u32).min(w - 1);
        let ty = ((v * h as f32) as u32).min(h - 1);
        let index = u64::from(material.texture_offset)
            + u64::from(ty) * u64::from(material.atlas_stride)
            + u64::from(tx);
        let argb = usize::try_from(index)
            .ok()
            .and_then(|i| self.atlas.get(i))
            .copied()
            .unwrap_or(0);

        Vec3::new(
            ((argb >> 16) & 0xFF) as f32,
            ((argb >> 8) & 0xFF) as f32,
            (argb & 0xFF) as f32,
        ) / 255.0
    }

    /// Color seen along a ray: the first visible block, or `sky`.
    pub fn trace(&self, origin: Vec3, dir: Vec3, sky: Vec3) -> Vec3 {
        let size = (1_u64 << self.depth) as f32;

        let mut t_enter = -FAR;
        let mut t_leave = FAR;
        let mut axis = None;
        for a in 0..3 {
            let enter = entry_distance(origin[a], dir[a], 0.0, size);
            if enter > t_enter {
                t_enter = enter;
                axis = Some(a);
            }
            t_leave = t_leave.min(exit_distance(origin[a], dir[a], 0.0, size));
        }
        if t_enter >= FAR || t_leave < t_enter.max(0.0) {
            return sky;
        }

        let mut t = if t_enter > 0.0 {
            t_enter + EPSILON
        } else {
            axis = None;
            0.0
        };

        for _ in 0..MAX_STEPS {
            let p = origin + dir * t;
            if p.cmplt(Vec3::ZERO).any() || p.cmpge(Vec3::splat(size)).any() {
                return sky;
            }

            let cell = p.floor().as_uvec3();
            let (value, level) = self.lookup(cell);
            let block = if value > 0 { 0 } else { value.unsigned_abs() };

            if block != 0 {
                if let Some(material) = self.palette.get(block as usize) {
                    if !material.flags().contains(MaterialFlags::INVISIBLE) {
                        let color = self.sample_texture(material, p, axis);
                        return color * face_shade(axis, dir) + color * material.emittance;
                    }
                }
            }

            let lo = ((cell >> level) << level).as_vec3();
            let hi = lo + Vec3::splat((1_u64 << level) as f32);
            let mut t_exit = FAR;
            for a in 0..3 {
                let d = exit_distance(origin[a], dir[a], lo[a], hi[a]);
                if d < t_exit {
                    t_exit = d;
                    axis = Some(a);
                }
            }
            t = t_exit + EPSILON;
        }

        sky
    }
}

/// Host kernel with the render kernel's signature.
#[derive(Clone, Copy, Debug)]
pub struct ReferenceKernel {
    sky: Vec3,
}

impl Default for ReferenceKernel {
    fn default() -> Self {
        Self::new(DEFAULT_SKY_COLOR)
    }
}

impl ReferenceKernel {
    pub fn new(sky: [f32; 3]) -> Self {
        Self {
            sky: Vec3::from_array(sky),
        }
    }
}

impl HostKernel for ReferenceKernel {
    fn signature(&self) -> KernelSignature {
        render_kernel_signature()
    }

    fn run(&self, bindings: &mut HostBindings, work_items: u32) -> Result<()> {
        let (inputs, result) = bindings.split_output::<f32>(6)?;
        let origins = inputs.slice::<f32>(0)?;
        let dirs = inputs.slice::<f32>(1)?;
        let depth = inputs.int(2)?.clamp(0, MAX_OCTREE_DEPTH as i32) as u32;
        let scene = SceneView {
            depth,
            nodes: inputs.slice::<i32>(3)?,
            palette: inputs.slice::<GpuMaterial>(4)?,
            atlas: inputs.slice::<u32>(5)?,
        };

        let pixels = (work_items as usize)
            .min(result.len() / COMPONENTS_PER_PIXEL)
            .min(origins.len() / COMPONENTS_PER_PIXEL)
            .min(dirs.len() / COMPONENTS_PER_PIXEL);
        let sky = self.sky;

        result[..pixels * COMPONENTS_PER_PIXEL]
            .par_chunks_exact_mut(COMPONENTS_PER_PIXEL)
            .enumerate()
            .for_each(|(pixel, out)| {
                let base = pixel * COMPONENTS_PER_PIXEL;
                let origin = Vec3::from_slice(&origins[base..base + COMPONENTS_PER_PIXEL]);
                let dir = Vec3::from_slice(&dirs[base..base + COMPONENTS_PER_PIXEL]);
                out.copy_from_slice(&scene.trace(origin, dir, sky).to_array());
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SKY: Vec3 = Vec3::new(0.6, 0.75, 1.0);

    fn material(offset: u32, flags: MaterialFlags) -> GpuMaterial {
        GpuMaterial {
            texture_offset: offset,
            texture_width: 1,
            texture_height: 1,
            atlas_stride: 2,
            flags: flags.bits(),
            roughness: 1.0,
            ior: 1.0,
            ..GpuMaterial::default()
        }
    }

    /// Depth 1 octree with block 1 in octant 0 and block 2 in octant 7.
    fn scene<'a>(nodes: &'a [i32], palette: &'a [GpuMaterial]) -> SceneView<'a> {
        SceneView {
            depth: 1,
            nodes,
            palette,
            atlas: &[0xFFFF_0000, 0xFF00_FF00],
        }
    }

    const NODES: [i32; 9] = [1, -1, 0, 0, 0, 0, 0, 0, -2];

    #[test]
    fn ray_missing_the_octree_sees_sky() {
        let palette = [material(0, MaterialFlags::INVISIBLE), material(0, MaterialFlags::empty())];
        let scene = scene(&NODES, &palette);
        let color = scene.trace(Vec3::new(-5.0, 0.5, 0.5), Vec3::NEG_X, SKY);
        assert_eq!(color, SKY);
    }

    #[test]
    fn ray_hits_first_block_with_face_shade() {
        let palette = [
            material(0, MaterialFlags::INVISIBLE),
            material(0, MaterialFlags::empty()),
            material(1, MaterialFlags::empty()),
        ];
        let scene = scene(&NODES, &palette);

        // Enters the x = 0 face of octant 0: red, shaded 0.8
        let color = scene.trace(Vec3::new(-3.0, 0.5, 0.5), Vec3::X, SKY);
        assert_relative_eq!(color.x, 0.8, epsilon = 1e-5);
        assert_relative_eq!(color.y, 0.0);

        // From above onto octant 7: green, top face
        let color = scene.trace(Vec3::new(1.5, 5.0, 1.5), Vec3::NEG_Y, SKY);
        assert_relative_eq!(color.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(color.x, 0.0);
    }

    #[test]
    fn invisible_blocks_are_skipped() {
        let palette = [
            material(0, MaterialFlags::INVISIBLE),
            material(0, MaterialFlags::INVISIBLE),
            material(1, MaterialFlags::empty()),
        ];
        let scene = scene(&NODES, &palette);

        // Diagonal through octant 0 into octant 7
        let dir = Vec3::ONE.normalize();
        let color = scene.trace(Vec3::splat(-1.0), dir, SKY);
        assert!(color.y > 0.0);
        assert_relative_eq!(color.x, 0.0);
    }

    #[test]
    fn ids_outside_the_palette_are_empty() {
        let palette = [material(0, MaterialFlags::INVISIBLE)];
        let scene = scene(&NODES, &palette);
        let color = scene.trace(Vec3::new(-3.0, 0.5, 0.5), Vec3::X, SKY);
        assert_eq!(color, SKY);
    }

    #[test]
    fn emittance_adds_texture_color() {
        let mut lamp = material(0, MaterialFlags::EMISSIVE);
        lamp.emittance = 1.0;
        let palette = [material(0, MaterialFlags::INVISIBLE), lamp];
        let scene = scene(&NODES, &palette);

        let color = scene.trace(Vec3::new(-3.0, 0.5, 0.5), Vec3::X, SKY);
        assert_relative_eq!(color.x, 1.8, epsilon = 1e-5);
    }

    #[test]
    fn origin_inside_a_block_hits_it_unshaded() {
        let palette = [material(0, MaterialFlags::INVISIBLE), material(0, MaterialFlags::empty())];
        let scene = scene(&NODES, &palette);
        let color = scene.trace(Vec3::splat(0.5), Vec3::Y, SKY);
        assert_relative_eq!(color.x, 1.0, epsilon = 1e-5);
    }
}
