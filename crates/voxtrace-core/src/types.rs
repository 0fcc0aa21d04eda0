//! Core voxel types.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Index of a block in the scene palette.
///
/// Block ID 0 is reserved for air (empty space).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Air block (empty space)
    pub const AIR: Self = Self(0);

    /// Largest id representable in a packed octree leaf record.
    pub const MAX: Self = Self(i32::MAX as u32);

    /// Returns true if this block is air (empty)
    #[inline]
    pub const fn is_air(self) -> bool {
        self.0 == 0
    }

    /// Returns true if this block is solid (not air)
    #[inline]
    pub const fn is_solid(self) -> bool {
        self.0 != 0
    }

    /// Palette index of this block.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Surface properties of a block, consumed by the render kernel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Light emitted relative to the texture color (0.0 = no emission)
    pub emittance: f32,
    /// Probability of a specular bounce (0.0 = fully diffuse)
    pub specular: f32,
    /// Metallic (0.0 = dielectric, 1.0 = metal)
    pub metalness: f32,
    /// Roughness (0.0 = mirror, 1.0 = diffuse)
    pub roughness: f32,
    /// Index of refraction
    pub ior: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self::DIFFUSE
    }
}

impl Material {
    /// Plain diffuse surface
    pub const DIFFUSE: Self = Self {
        emittance: 0.0,
        specular: 0.0,
        metalness: 0.0,
        roughness: 1.0,
        ior: 1.000_293,
    };

    /// Light source surface
    pub const EMISSIVE: Self = Self {
        emittance: 1.0,
        specular: 0.0,
        metalness: 0.0,
        roughness: 1.0,
        ior: 1.000_293,
    };

    /// Water surface
    pub const WATER: Self = Self {
        emittance: 0.0,
        specular: 0.12,
        metalness: 0.0,
        roughness: 0.05,
        ior: 1.333,
    };

    /// Polished metal surface
    pub const METAL: Self = Self {
        emittance: 0.0,
        specular: 0.0,
        metalness: 1.0,
        roughness: 0.2,
        ior: 1.000_293,
    };

    /// Returns true if this material emits light
    #[inline]
    pub fn is_emissive(&self) -> bool {
        self.emittance > 0.0
    }
}
