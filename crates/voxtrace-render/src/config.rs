//! Renderer configuration.

use std::fmt;
use std::str::FromStr;

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use voxtrace_shaders::DEFAULT_SKY_COLOR;

use crate::atlas::DEFAULT_ATLAS_WIDTH;
use crate::error::{RenderError, Result};

/// Compute backend a renderer runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CPU reference kernel.
    #[default]
    Host,
    /// Headless Vulkan compute.
    Vulkan,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Vulkan => "vulkan",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(Self::Host),
            "vulkan" | "gpu" => Ok(Self::Vulkan),
            other => Err(format!("unknown backend `{other}` (expected host or vulkan)")),
        }
    }
}

/// Renderer settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Atlas width in texels.
    pub atlas_width: u32,
    /// Merge pool size; `None` uses the rayon default.
    pub merge_threads: Option<usize>,
    pub backend: BackendKind,
    /// Color of rays that leave the octree. Only the host kernel reads it.
    pub sky_color: [f32; 3],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            atlas_width: DEFAULT_ATLAS_WIDTH,
            merge_threads: None,
            backend: BackendKind::default(),
            sky_color: DEFAULT_SKY_COLOR,
        }
    }
}

impl RenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_atlas_width(mut self, width: u32) -> Self {
        self.atlas_width = width;
        self
    }

    #[must_use]
    pub fn with_merge_threads(mut self, threads: usize) -> Self {
        self.merge_threads = Some(threads);
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_sky_color(mut self, sky_color: [f32; 3]) -> Self {
        self.sky_color = sky_color;
        self
    }

    /// Build the thread pool results are merged on.
    pub fn build_merge_pool(&self) -> Result<ThreadPool> {
        let mut builder =
            ThreadPoolBuilder::new().thread_name(|i| format!("voxtrace-merge-{i}"));
        if let Some(threads) = self.merge_threads {
            builder = builder.num_threads(threads);
        }
        builder
            .build()
            .map_err(|e| RenderError::ThreadPool(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.atlas_width, 4096);
        assert_eq!(config.merge_threads, None);
        assert_eq!(config.backend, BackendKind::Host);
        assert_eq!(config.sky_color, DEFAULT_SKY_COLOR);
    }

    #[test]
    fn builder_methods() {
        let config = RenderConfig::new()
            .with_atlas_width(256)
            .with_merge_threads(3)
            .with_backend(BackendKind::Vulkan)
            .with_sky_color([0.0; 3]);

        assert_eq!(config.atlas_width, 256);
        assert_eq!(config.build_merge_pool().unwrap().current_num_threads(), 3);
        assert_eq!(config.backend, BackendKind::Vulkan);
    }

    #[test]
    fn backend_parses_names() {
        assert_eq!("host".parse::<BackendKind>().unwrap(), BackendKind::Host);
        assert_eq!("Vulkan".parse::<BackendKind>().unwrap(), BackendKind::Vulkan);
        assert!("metal".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Vulkan.to_string(), "vulkan");
    }
}
