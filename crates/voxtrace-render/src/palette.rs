//! Block palette and its device record layout.
//!
//! Palette packing runs in two phases around the atlas build: [`preload`]
//! stages every block texture into the [`AtlasBuilder`], and
//! [`GpuPalette::new`] resolves each block's atlas region once the atlas
//! exists. Records are indexed by block id; id 0 is air.

use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use voxtrace_core::{BlockId, Material, MATERIAL_RECORD_BYTES};

use crate::atlas::{AtlasBuilder, AtlasError, Texture, TextureAtlas, TextureId};
use crate::error::{RenderError, Result};

bitflags! {
    /// Per-block flags read by the kernel.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MaterialFlags: u32 {
        /// Rays pass through the block.
        const INVISIBLE = 1 << 0;
        /// The block emits light.
        const EMISSIVE = 1 << 1;
    }
}

/// A block type: its texture and surface material.
#[derive(Clone, Debug)]
pub struct Block {
    pub name: String,
    pub texture: Arc<Texture>,
    pub material: Material,
    pub invisible: bool,
}

impl Block {
    pub fn new(name: impl Into<String>, texture: Arc<Texture>) -> Self {
        Self {
            name: name.into(),
            texture,
            material: Material::DIFFUSE,
            invisible: false,
        }
    }

    #[must_use]
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    #[must_use]
    pub fn invisible(mut self) -> Self {
        self.invisible = true;
        self
    }

    pub fn flags(&self) -> MaterialFlags {
        let mut flags = MaterialFlags::empty();
        flags.set(MaterialFlags::INVISIBLE, self.invisible);
        flags.set(MaterialFlags::EMISSIVE, self.material.is_emissive());
        flags
    }
}

/// Ordered block table. Entry 0 is always air.
#[derive(Clone, Debug)]
pub struct BlockPalette {
    blocks: Vec<Block>,
}

impl Default for BlockPalette {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockPalette {
    pub fn new() -> Self {
        let air = Block::new("air", Arc::new(Texture::solid(1, 1, 0))).invisible();
        Self { blocks: vec![air] }
    }

    /// Append a block, returning its id.
    pub fn add(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    /// Number of entries, air included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if the palette holds nothing but air.
    pub fn is_empty(&self) -> bool {
        self.blocks.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (BlockId(i as u32), block))
    }
}

/// Staged texture of every palette entry, indexed by block id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaletteTextures {
    ids: Vec<TextureId>,
}

impl PaletteTextures {
    pub fn get(&self, block: BlockId) -> Option<TextureId> {
        self.ids.get(block.index()).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Stage every block texture of `palette` into `builder`.
pub fn preload(palette: &BlockPalette, builder: &mut AtlasBuilder) -> PaletteTextures {
    let ids = palette
        .blocks
        .iter()
        .map(|block| builder.add(&block.texture))
        .collect();
    PaletteTextures { ids }
}

/// One palette record as the kernel reads it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub texture_offset: u32,
    pub texture_width: u32,
    pub texture_height: u32,
    pub atlas_stride: u32,
    pub flags: u32,
    pub emittance: f32,
    pub specular: f32,
    pub metalness: f32,
    pub roughness: f32,
    pub ior: f32,
    pub _pad: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<GpuMaterial>() == MATERIAL_RECORD_BYTES);

impl GpuMaterial {
    pub fn flags(&self) -> MaterialFlags {
        MaterialFlags::from_bits_truncate(self.flags)
    }
}

/// Device-ready palette records.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuPalette {
    materials: Vec<GpuMaterial>,
}

impl GpuPalette {
    /// Resolve every block against the built atlas.
    pub fn new(
        palette: &BlockPalette,
        textures: &PaletteTextures,
        atlas: &TextureAtlas,
    ) -> Result<Self> {
        if textures.len() != palette.len() {
            return Err(RenderError::PaletteMismatch {
                blocks: palette.len(),
                textures: textures.len(),
            });
        }

        let stride = atlas.width();
        let materials = palette
            .blocks
            .iter()
            .zip(&textures.ids)
            .map(|(block, &texture)| {
                let region = atlas
                    .region(texture)
                    .ok_or(AtlasError::UnknownTexture(texture.index() as u32))?;
                let material = block.material;
                Ok(GpuMaterial {
                    texture_offset: region.offset(stride),
                    texture_width: region.width,
                    texture_height: region.height,
                    atlas_stride: stride,
                    flags: block.flags().bits(),
                    emittance: material.emittance,
                    specular: material.specular,
                    metalness: material.metalness,
                    roughness: material.roughness,
                    ior: material.ior,
                    _pad: [0; 2],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(blocks = materials.len(), "Packed block palette");
        Ok(Self { materials })
    }

    pub fn materials(&self) -> &[GpuMaterial] {
        &self.materials
    }

    pub fn get(&self, block: BlockId) -> Option<&GpuMaterial> {
        self.materials.get(block.index())
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Records as bytes; the kernel's `blockPalette` argument.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.materials)
    }
}
