//! Render pass pipeline for the Voxtrace renderer.
//!
//! This crate provides:
//! - Texture atlas and block palette packing
//! - Camera models and per-pixel ray generation
//! - Kernel upload, binding, and dispatch
//! - Result merging and pass orchestration
//! - A CPU reference kernel
//! - Screenshot export

pub mod atlas;
pub mod backend;
pub mod camera;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host_kernel;
pub mod merge;
pub mod palette;
pub mod pass;
pub mod scene;
pub mod screenshot;

pub use atlas::{AtlasBuilder, AtlasError, AtlasRegion, Texture, TextureAtlas, TextureId};
pub use backend::{create_context, host_context, vulkan_context};
pub use camera::{Camera, CameraRays, Projection};
pub use config::{BackendKind, RenderConfig};
pub use dispatch::{PassInputs, PassResources};
pub use error::{RenderError, Result};
pub use host_kernel::{ReferenceKernel, SceneView};
pub use merge::merge_results;
pub use palette::{preload, Block, BlockPalette, GpuMaterial, GpuPalette, MaterialFlags, PaletteTextures};
pub use pass::{PassOutcome, PassStats, PostRender, Renderer};
pub use scene::RenderScene;
pub use screenshot::{save_samples, save_screenshot, tone_map, ScreenshotError};
