//! Voxtrace command line renderer
//!
//! Builds a demo voxel world, renders it with the ray tracing kernel, and
//! saves the sample buffer as an image.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p voxtrace-cli -- [OPTIONS]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Terrain on the CPU reference kernel
//! cargo run -p voxtrace-cli
//!
//! # Spheres on a Vulkan device, three passes
//! cargo run -p voxtrace-cli -- --backend vulkan --scene spheres --passes 3 -o spheres.png
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod scene;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;
use voxtrace_core::HostFields;
use voxtrace_gpu::{ComputeDevice, ContextSlot};
use voxtrace_render::scene::fields;
use voxtrace_render::{
    create_context, save_samples, BackendKind, PassOutcome, RenderConfig, RenderScene, Renderer,
};

use crate::scene::SceneKind;

/// Command line options.
#[derive(Debug, Clone)]
struct Options {
    width: u32,
    height: u32,
    backend: BackendKind,
    scene: SceneKind,
    passes: u32,
    threads: Option<usize>,
    atlas_width: u32,
    output: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            backend: BackendKind::Host,
            scene: SceneKind::Terrain,
            passes: 1,
            threads: None,
            atlas_width: RenderConfig::default().atlas_width,
            output: PathBuf::from("voxtrace.png"),
        }
    }
}

impl Options {
    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut options = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = || {
                args.next()
                    .with_context(|| format!("`{arg}` expects a value"))
            };
            match arg.as_str() {
                "--width" => options.width = value()?.parse().context("invalid --width")?,
                "--height" => options.height = value()?.parse().context("invalid --height")?,
                "--backend" => options.backend = value()?.parse().map_err(anyhow::Error::msg)?,
                "--scene" => options.scene = value()?.parse().map_err(anyhow::Error::msg)?,
                "--passes" => options.passes = value()?.parse().context("invalid --passes")?,
                "--threads" => {
                    options.threads = Some(value()?.parse().context("invalid --threads")?);
                }
                "--atlas-width" => {
                    options.atlas_width = value()?.parse().context("invalid --atlas-width")?;
                }
                "-o" | "--output" => options.output = PathBuf::from(value()?),
                other => bail!("unknown option `{other}` (see --help)"),
            }
        }

        if options.width == 0 || options.height == 0 {
            bail!("image size must be non-zero, got {}x{}", options.width, options.height);
        }
        if options.passes == 0 {
            bail!("--passes must be at least 1");
        }
        Ok(options)
    }
}

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = Options::parse(std::env::args().skip(1))?;
    run(&options)
}

fn run(options: &Options) -> anyhow::Result<()> {
    let mut config = RenderConfig::new()
        .with_backend(options.backend)
        .with_atlas_width(options.atlas_width);
    if let Some(threads) = options.threads {
        config = config.with_merge_threads(threads);
    }

    let slot = ContextSlot::new();
    let context = slot
        .acquire(|| create_context(&config))
        .with_context(|| format!("Failed to create {} device context", options.backend))?;
    info!("Rendering on {}", context.device().name());

    let mut renderer = Renderer::new(context, config)?;
    let completed = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&completed);
    let passes = options.passes;
    renderer.set_post_render(move || counter.fetch_add(1, Ordering::SeqCst) + 1 < passes);

    let demo = scene::build(options.scene);
    let values = options.width as usize * options.height as usize * 3;
    let mut host = HostFields::new()
        .with(fields::SAMPLE_BUFFER, vec![0.0_f64; values])
        .with(fields::WIDTH, options.width)
        .with(fields::HEIGHT, options.height)
        .with(fields::PALETTE, demo.palette)
        .with(fields::WORLD_OCTREE, demo.octree)
        .with(fields::CAMERA, demo.camera);

    loop {
        let mut scene = RenderScene::from_host(&mut host)?;
        match renderer.render(&mut scene)? {
            PassOutcome::Completed {
                continue_rendering,
                stats,
            } => {
                info!(
                    "Pass {}/{passes}: {} pixels in {:.2?}",
                    completed.load(Ordering::SeqCst),
                    stats.pixels,
                    stats.elapsed
                );
                if !continue_rendering {
                    break;
                }
            }
            PassOutcome::Aborted(e) => bail!("Render pass aborted: {e}"),
        }
    }

    let samples = host.get::<Vec<f64>>(fields::SAMPLE_BUFFER)?;
    save_samples(samples, options.width, options.height, &options.output)?;
    Ok(())
}

fn print_help() {
    eprintln!(
        "Voxtrace command line renderer

USAGE:
    cargo run -p voxtrace-cli -- [OPTIONS]

OPTIONS:
    --width <N>             Image width in pixels (default: 640)
    --height <N>            Image height in pixels (default: 360)
    --backend <BACKEND>     host or vulkan (default: host)
    --scene <SCENE>         terrain, cube, or spheres (default: terrain)
    --passes <N>            Number of render passes (default: 1)
    --threads <N>           Merge thread count (default: one per core)
    --atlas-width <N>       Texture atlas width in pixels (default: 4096)
    -o, --output <PATH>     Output image path (default: voxtrace.png)
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Options> {
        Options::parse(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn defaults_without_arguments() {
        let options = parse(&[]).unwrap();
        assert_eq!((options.width, options.height), (640, 360));
        assert_eq!(options.backend, BackendKind::Host);
        assert_eq!(options.scene, SceneKind::Terrain);
        assert_eq!(options.passes, 1);
    }

    #[test]
    fn parses_every_option() {
        let options = parse(&[
            "--width", "32", "--height", "16", "--backend", "vulkan", "--scene", "cube",
            "--passes", "3", "--threads", "2", "--atlas-width", "512", "-o", "out.png",
        ])
        .unwrap();
        assert_eq!((options.width, options.height), (32, 16));
        assert_eq!(options.backend, BackendKind::Vulkan);
        assert_eq!(options.scene, SceneKind::Cube);
        assert_eq!(options.passes, 3);
        assert_eq!(options.threads, Some(2));
        assert_eq!(options.atlas_width, 512);
        assert_eq!(options.output, PathBuf::from("out.png"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--width"]).is_err());
        assert!(parse(&["--width", "wide"]).is_err());
        assert!(parse(&["--width", "0"]).is_err());
        assert!(parse(&["--passes", "0"]).is_err());
        assert!(parse(&["--scene", "castle"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn renders_small_image_on_host() {
        let output = std::env::temp_dir().join("voxtrace-cli-test.png");
        let options = Options {
            width: 8,
            height: 6,
            scene: SceneKind::Cube,
            passes: 2,
            output: output.clone(),
            ..Options::default()
        };
        run(&options).unwrap();
        assert!(output.exists());
    }
}
