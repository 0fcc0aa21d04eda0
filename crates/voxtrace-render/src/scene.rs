//! What a host hands the renderer for one pass.

use std::sync::Arc;

use voxtrace_core::constants::COMPONENTS_PER_PIXEL;
use voxtrace_core::{HostFields, HostStateError};
use voxtrace_voxel::VoxelStorage;

use crate::camera::Camera;
use crate::error::{RenderError, Result};
use crate::palette::BlockPalette;

/// Names of the host fields [`RenderScene::from_host`] reads.
pub mod fields {
    /// `Vec<f64>`, three values per pixel.
    pub const SAMPLE_BUFFER: &str = "sampleBuffer";
    /// `u32`
    pub const WIDTH: &str = "width";
    /// `u32`
    pub const HEIGHT: &str = "height";
    /// `Arc<BlockPalette>`
    pub const PALETTE: &str = "palette";
    /// `Arc<dyn VoxelStorage>`
    pub const WORLD_OCTREE: &str = "worldOctree";
    /// `Camera`
    pub const CAMERA: &str = "camera";
}

/// Scene state for one pass. Results are merged into `samples`.
pub struct RenderScene<'a> {
    pub samples: &'a mut [f64],
    pub width: u32,
    pub height: u32,
    pub palette: Arc<BlockPalette>,
    pub octree: Arc<dyn VoxelStorage>,
    pub camera: Camera,
}

impl<'a> RenderScene<'a> {
    pub fn new(
        samples: &'a mut [f64],
        width: u32,
        height: u32,
        palette: Arc<BlockPalette>,
        octree: Arc<dyn VoxelStorage>,
        camera: Camera,
    ) -> Self {
        Self {
            samples,
            width,
            height,
            palette,
            octree,
            camera,
        }
    }

    /// Read the scene out of a host's exposed fields.
    ///
    /// Every field is read and type-checked before the sample buffer is
    /// borrowed, so a failure leaves the host untouched.
    pub fn from_host(host: &'a mut HostFields) -> std::result::Result<Self, HostStateError> {
        let width = *host.get::<u32>(fields::WIDTH)?;
        let height = *host.get::<u32>(fields::HEIGHT)?;
        let palette = host.cloned::<Arc<BlockPalette>>(fields::PALETTE)?;
        let octree = host.cloned::<Arc<dyn VoxelStorage>>(fields::WORLD_OCTREE)?;
        let camera = host.cloned::<Camera>(fields::CAMERA)?;
        let samples = host.get_mut::<Vec<f64>>(fields::SAMPLE_BUFFER)?;

        Ok(Self {
            samples: samples.as_mut_slice(),
            width,
            height,
            palette,
            octree,
            camera,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Check that the sample buffer holds three values per pixel.
    pub fn validate(&self) -> Result<()> {
        let expected = self.pixel_count() * COMPONENTS_PER_PIXEL;
        if self.samples.len() != expected || expected == 0 {
            return Err(RenderError::SampleBufferSize {
                len: self.samples.len(),
                expected,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for RenderScene<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderScene")
            .field("samples", &self.samples.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("palette", &self.palette.len())
            .field("octree", &self.octree.implementation_name())
            .field("camera", &self.camera)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxtrace_voxel::PackedOctree;

    fn host() -> HostFields {
        let octree: Arc<dyn VoxelStorage> = Arc::new(PackedOctree::new(2));
        HostFields::new()
            .with(fields::SAMPLE_BUFFER, vec![0.5_f64; 12])
            .with(fields::WIDTH, 2_u32)
            .with(fields::HEIGHT, 2_u32)
            .with(fields::PALETTE, Arc::new(BlockPalette::new()))
            .with(fields::WORLD_OCTREE, octree)
            .with(fields::CAMERA, Camera::default())
    }

    #[test]
    fn extracts_every_field() {
        let mut host = host();
        let scene = RenderScene::from_host(&mut host).unwrap();
        assert_eq!((scene.width, scene.height), (2, 2));
        assert_eq!(scene.samples, &[0.5; 12]);
        assert_eq!(scene.octree.implementation_name(), "PackedOctree");
        assert!(scene.validate().is_ok());
    }

    #[test]
    fn type_mismatch_names_the_field() {
        let mut host = host();
        host.insert(fields::HEIGHT, 2_i64);

        let err = RenderScene::from_host(&mut host).unwrap_err();
        assert!(matches!(
            &err,
            HostStateError::TypeMismatch { field, expected: "u32", actual: "i64" } if field == "height"
        ));
        assert_eq!(host.get::<Vec<f64>>(fields::SAMPLE_BUFFER).unwrap(), &[0.5; 12]);
    }

    #[test]
    fn sample_buffer_must_match_resolution() {
        let mut host = host();
        host.insert(fields::WIDTH, 3_u32);

        let scene = RenderScene::from_host(&mut host).unwrap();
        assert!(matches!(
            scene.validate(),
            Err(RenderError::SampleBufferSize {
                len: 12,
                expected: 18,
                ..
            })
        ));
    }
}
