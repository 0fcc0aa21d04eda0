//! Render pass error types.

use thiserror::Error;
use voxtrace_core::HostStateError;
use voxtrace_gpu::GpuError;
use voxtrace_shaders::ShaderError;

use crate::atlas::AtlasError;

/// Errors that fail a render pass.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Atlas(#[from] AtlasError),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    HostState(#[from] HostStateError),

    /// The sample buffer does not hold three values per pixel.
    #[error("sample buffer holds {len} values, expected {expected} for {width}x{height} pixels")]
    SampleBufferSize {
        len: usize,
        expected: usize,
        width: u32,
        height: u32,
    },

    /// Device results and the sample buffer disagree in length.
    #[error("result buffer holds {actual} values, sample buffer holds {expected}")]
    ResultLength { expected: usize, actual: usize },

    /// Block textures were staged for a different palette.
    #[error("palette has {blocks} blocks but {textures} staged textures")]
    PaletteMismatch { blocks: usize, textures: usize },

    #[error("invalid camera: {0}")]
    Camera(String),

    #[error("pass of {0} pixels exceeds the dispatch limit")]
    TooManyPixels(usize),

    #[error("failed to build merge thread pool: {0}")]
    ThreadPool(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
