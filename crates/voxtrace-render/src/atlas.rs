//! Texture atlas construction.
//!
//! Block textures are staged in an [`AtlasBuilder`] and shelf-packed into one
//! flat `0xAARRGGBB` pixel buffer by [`AtlasBuilder::build`]. The builder is
//! consumed, so staging storage is released exactly once and the resulting
//! [`TextureAtlas`] is immutable.

use std::sync::Arc;

use hashbrown::HashMap;
use image::RgbaImage;
use thiserror::Error;

/// Default atlas width in texels.
pub const DEFAULT_ATLAS_WIDTH: u32 = 4096;

/// Failure to stage or pack textures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AtlasError {
    #[error("texture has {actual} pixels, expected {expected} for its size")]
    PixelCount { expected: usize, actual: usize },

    #[error("texture {texture} has zero size")]
    ZeroSized { texture: u32 },

    #[error("texture {texture} is {width} texels wide, the atlas is {atlas_width}")]
    TooWide {
        texture: u32,
        width: u32,
        atlas_width: u32,
    },

    #[error("atlas of width {width} is too large to address")]
    TooLarge { width: u32 },

    #[error("texture {0} is not in the atlas")]
    UnknownTexture(u32),
}

/// An image in `0xAARRGGBB` texels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<u32>) -> Result<Self, AtlasError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(AtlasError::PixelCount {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Texture filled with one color.
    pub fn solid(width: u32, height: u32, argb: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![argb; width as usize * height as usize],
        }
    }

    /// Convert an RGBA8 image.
    pub fn from_rgba8(image: &RgbaImage) -> Self {
        let pixels = image
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                u32::from_be_bytes([a, r, g, b])
            })
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn texel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// Handle of a texture staged in an [`AtlasBuilder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u32);

impl TextureId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Placement of a texture inside the atlas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtlasRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl AtlasRegion {
    /// Index of the region's top-left texel in an atlas of the given stride.
    pub fn offset(&self, stride: u32) -> u32 {
        self.y * stride + self.x
    }

    /// Returns true if the two regions share at least one texel.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// Mutable staging area for atlas textures.
#[derive(Debug)]
pub struct AtlasBuilder {
    width: u32,
    textures: Vec<Arc<Texture>>,
    staged: HashMap<usize, TextureId>,
}

impl AtlasBuilder {
    pub fn new(width: u32) -> Self {
        Self {
            width,
            textures: Vec::new(),
            staged: HashMap::new(),
        }
    }

    /// Atlas width in texels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Stage a texture. Adding the same texture again returns its first id.
    pub fn add(&mut self, texture: &Arc<Texture>) -> TextureId {
        let key = Arc::as_ptr(texture) as usize;
        if let Some(&id) = self.staged.get(&key) {
            return id;
        }
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(Arc::clone(texture));
        self.staged.insert(key, id);
        id
    }

    /// Number of distinct staged textures.
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Pack every staged texture into an atlas.
    ///
    /// Textures are placed on shelves, tallest first, left to right.
    pub fn build(self) -> Result<TextureAtlas, AtlasError> {
        let width = self.width;
        for (index, texture) in self.textures.iter().enumerate() {
            let texture_id = index as u32;
            if texture.width == 0 || texture.height == 0 {
                return Err(AtlasError::ZeroSized {
                    texture: texture_id,
                });
            }
            if texture.width > width {
                return Err(AtlasError::TooWide {
                    texture: texture_id,
                    width: texture.width,
                    atlas_width: width,
                });
            }
        }

        let mut order: Vec<usize> = (0..self.textures.len()).collect();
        order.sort_by(|&a, &b| self.textures[b].height.cmp(&self.textures[a].height));

        let mut regions = vec![
            AtlasRegion {
                x: 0,
                y: 0,
                width: 0,
                height: 0,
            };
            self.textures.len()
        ];
        let too_large = AtlasError::TooLarge { width };
        let (mut x, mut shelf_y, mut shelf_height) = (0_u32, 0_u32, 0_u32);
        for &index in &order {
            let texture = &self.textures[index];
            if x + texture.width > width {
                shelf_y = shelf_y.checked_add(shelf_height).ok_or_else(|| too_large.clone())?;
                x = 0;
                shelf_height = 0;
            }
            regions[index] = AtlasRegion {
                x,
                y: shelf_y,
                width: texture.width,
                height: texture.height,
            };
            x += texture.width;
            shelf_height = shelf_height.max(texture.height);
        }

        let height = shelf_y.checked_add(shelf_height).ok_or_else(|| too_large.clone())?;
        if u64::from(width) * u64::from(height) > u64::from(u32::MAX) {
            return Err(too_large);
        }

        let stride = width as usize;
        let mut pixels = vec![0_u32; stride * height as usize];
        for (texture, region) in self.textures.iter().zip(&regions) {
            let row_len = texture.width as usize;
            for (row, src) in texture.pixels.chunks_exact(row_len).enumerate() {
                let start = (region.y as usize + row) * stride + region.x as usize;
                pixels[start..start + row_len].copy_from_slice(src);
            }
        }

        tracing::debug!(
            textures = regions.len(),
            width,
            height,
            "Built texture atlas"
        );

        Ok(TextureAtlas {
            width,
            height,
            pixels,
            regions,
        })
    }
}

/// Packed atlas pixels and the region of every staged texture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureAtlas {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
    regions: Vec<AtlasRegion>,
}

impl TextureAtlas {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major texels; the kernel's `atlasTexture` argument.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn byte_size(&self) -> usize {
        std::mem::size_of_val(self.pixels.as_slice())
    }

    pub fn region(&self, id: TextureId) -> Option<AtlasRegion> {
        self.regions.get(id.index()).copied()
    }

    pub fn regions(&self) -> &[AtlasRegion] {
        &self.regions
    }

    pub fn texel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, argb: u32) -> Arc<Texture> {
        Arc::new(Texture::solid(width, height, argb))
    }

    #[test]
    fn equal_textures_get_disjoint_regions() {
        let textures = [
            solid(16, 16, 0xFF00_0000),
            solid(16, 16, 0xFF11_1111),
            solid(16, 16, 0xFF22_2222),
        ];
        let mut builder = AtlasBuilder::new(32);
        let ids: Vec<_> = textures.iter().map(|t| builder.add(t)).collect();
        let atlas = builder.build().unwrap();

        let regions: Vec<_> = ids.iter().map(|&id| atlas.region(id).unwrap()).collect();
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }
        assert_eq!((atlas.width(), atlas.height()), (32, 32));
    }

    #[test]
    fn texels_are_copied_into_their_region() {
        let a = solid(2, 2, 0xFFAA_0000);
        let b = Arc::new(Texture::new(3, 1, vec![1, 2, 3]).unwrap());
        let mut builder = AtlasBuilder::new(8);
        let ia = builder.add(&a);
        let ib = builder.add(&b);
        let atlas = builder.build().unwrap();

        let ra = atlas.region(ia).unwrap();
        assert_eq!(atlas.texel(ra.x + 1, ra.y + 1), Some(0xFFAA_0000));
        let rb = atlas.region(ib).unwrap();
        for x in 0..3 {
            assert_eq!(atlas.texel(rb.x + x, rb.y), b.texel(x, 0));
        }
    }

    #[test]
    fn same_texture_is_staged_once() {
        let texture = solid(4, 4, 0);
        let mut builder = AtlasBuilder::new(16);
        let first = builder.add(&texture);
        let second = builder.add(&Arc::clone(&texture));
        assert_eq!(first, second);
        assert_eq!(builder.len(), 1);

        // Equal contents, different texture
        builder.add(&solid(4, 4, 0));
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn textures_wrap_onto_new_shelves() {
        let mut builder = AtlasBuilder::new(8);
        let tall = builder.add(&solid(4, 8, 0));
        let wide = builder.add(&solid(8, 2, 0));
        let atlas = builder.build().unwrap();

        assert_eq!(atlas.region(tall).unwrap().y, 0);
        assert_eq!(atlas.region(wide).unwrap().y, 8);
        assert_eq!(atlas.height(), 10);
    }

    #[test]
    fn rejects_texture_wider_than_atlas() {
        let mut builder = AtlasBuilder::new(8);
        builder.add(&solid(16, 1, 0));
        assert_eq!(
            builder.build().unwrap_err(),
            AtlasError::TooWide {
                texture: 0,
                width: 16,
                atlas_width: 8
            }
        );
    }

    #[test]
    fn rejects_zero_sized_texture() {
        let mut builder = AtlasBuilder::new(8);
        builder.add(&solid(0, 4, 0));
        assert_eq!(
            builder.build().unwrap_err(),
            AtlasError::ZeroSized { texture: 0 }
        );
    }

    #[test]
    fn empty_builder_builds_empty_atlas() {
        let atlas = AtlasBuilder::new(64).build().unwrap();
        assert_eq!(atlas.height(), 0);
        assert!(atlas.pixels().is_empty());
    }

    #[test]
    fn pixel_count_must_match_size() {
        assert_eq!(
            Texture::new(2, 2, vec![0; 3]).unwrap_err(),
            AtlasError::PixelCount {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn rgba_images_convert_to_argb() {
        let image = RgbaImage::from_raw(1, 1, vec![0x11, 0x22, 0x33, 0x44]).unwrap();
        let texture = Texture::from_rgba8(&image);
        assert_eq!(texture.texel(0, 0), Some(0x4411_2233));
    }
}
