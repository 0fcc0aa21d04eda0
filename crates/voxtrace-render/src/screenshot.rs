//! Export of the sample buffer as an image file.

use std::path::Path;

use image::RgbaImage;
use thiserror::Error;
use tracing::info;
use voxtrace_core::constants::COMPONENTS_PER_PIXEL;

/// Errors that can occur while exporting a frame.
#[derive(Error, Debug)]
pub enum ScreenshotError {
    /// Sample buffer does not match the image size.
    #[error("sample buffer holds {actual} values, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    /// RGBA byte count does not match the image size.
    #[error("RGBA data does not fit the image size")]
    InvalidImageData,

    #[error("could not write image: {0}")]
    SaveFailed(#[from] image::ImageError),
}

/// Display gamma applied when converting linear samples.
pub const DEFAULT_GAMMA: f64 = 2.2;

/// Convert linear RGB samples to an 8-bit RGBA image.
///
/// Samples are scaled by `exposure`, clamped to `[0, 1]`, and gamma encoded.
pub fn tone_map(
    samples: &[f64],
    width: u32,
    height: u32,
    exposure: f64,
) -> Result<RgbaImage, ScreenshotError> {
    let expected = width as usize * height as usize * COMPONENTS_PER_PIXEL;
    if samples.len() != expected {
        return Err(ScreenshotError::SizeMismatch {
            expected,
            actual: samples.len(),
        });
    }

    let encode = |v: f64| {
        let encoded = (v * exposure).clamp(0.0, 1.0).powf(1.0 / DEFAULT_GAMMA);
        (encoded * 255.0).round() as u8
    };
    let data: Vec<u8> = samples
        .chunks_exact(COMPONENTS_PER_PIXEL)
        .flat_map(|rgb| [encode(rgb[0]), encode(rgb[1]), encode(rgb[2]), 255])
        .collect();

    RgbaImage::from_raw(width, height, data).ok_or(ScreenshotError::InvalidImageData)
}

/// Write already tone-mapped RGBA bytes; the extension picks the format.
pub fn save_screenshot(
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    path: impl AsRef<Path>,
) -> Result<(), ScreenshotError> {
    RgbaImage::from_raw(width, height, rgba)
        .ok_or(ScreenshotError::InvalidImageData)
        .and_then(|image| save_image(&image, path))
}

/// Tone map `samples` and write them to `path`.
pub fn save_samples(
    samples: &[f64],
    width: u32,
    height: u32,
    path: impl AsRef<Path>,
) -> Result<(), ScreenshotError> {
    let image = tone_map(samples, width, height, 1.0)?;
    save_image(&image, path)
}

fn save_image(image: &RgbaImage, path: impl AsRef<Path>) -> Result<(), ScreenshotError> {
    image.save(path.as_ref())?;
    info!("Wrote {}", path.as_ref().display());
    Ok(())
}
