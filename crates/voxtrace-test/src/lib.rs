//! Test harness for the Voxtrace renderer.
//!
//! Provides headless rendering over the host or Vulkan backend, shared scene
//! fixtures, and visual regression testing.

pub mod fixtures;
pub mod harness;

pub use fixtures::{
    cube_octree, floor_scene, test_camera, test_palette, IndexKernel, GLASS, GRASS, LAMP, STONE,
};
pub use harness::{compare_images, HeadlessRenderer, VisualRegressionTest};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Render error: {0}")]
    Render(#[from] voxtrace_render::RenderError),
    #[error("GPU error: {0}")]
    Gpu(#[from] voxtrace_gpu::GpuError),
    #[error("Screenshot error: {0}")]
    Screenshot(#[from] voxtrace_render::ScreenshotError),
    #[error("Pass aborted: {0}")]
    Aborted(#[from] voxtrace_voxel::PackError),
    #[error("Image comparison failed: {0}")]
    ImageComparison(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Where baselines live and how far a render may drift from them.
#[derive(Debug, Clone)]
pub struct VisualTestConfig {
    /// Largest accepted mean channel difference, in `[0, 1]`.
    pub threshold: f64,
    pub baseline_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for VisualTestConfig {
    fn default() -> Self {
        Self {
            threshold: 0.001,
            baseline_dir: PathBuf::from("target/test_data/baselines"),
            output_dir: PathBuf::from("target/test_output"),
        }
    }
}
