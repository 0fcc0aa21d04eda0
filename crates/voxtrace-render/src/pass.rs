//! Render pass orchestration.
//!
//! A pass packs the octree, builds the atlas and palette, generates camera
//! rays, dispatches the kernel, merges its output into the sample buffer,
//! notifies the host, and releases every device buffer. Buffers are held by
//! release guards, so early returns and unwinding release them too.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use voxtrace_gpu::{DeviceContext, Interrupt};
use voxtrace_voxel::{pack_octree, PackError};

use crate::atlas::AtlasBuilder;
use crate::camera::CameraRays;
use crate::config::RenderConfig;
use crate::dispatch::{dispatch, Dispatched, PassInputs};
use crate::error::Result;
use crate::merge::merge_results;
use crate::palette::{preload, GpuPalette};
use crate::scene::RenderScene;

/// Host callback run once after every completed pass. Its return value is
/// reported in [`PassOutcome::Completed`].
pub type PostRender = Box<dyn FnMut() -> bool + Send>;

/// Sizes and timing of a completed pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub pixels: usize,
    pub work_items: u32,
    pub octree_nodes: usize,
    pub palette_blocks: usize,
    pub atlas_size: (u32, u32),
    pub uploaded_bytes: usize,
    pub elapsed: Duration,
}

/// How a pass ended without a device or host error.
#[derive(Debug)]
pub enum PassOutcome {
    /// Results were merged and the host notified.
    Completed {
        /// Value returned by the post-render callback.
        continue_rendering: bool,
        stats: PassStats,
    },
    /// The scene could not be rendered; nothing was allocated or written.
    Aborted(PackError),
}

impl PassOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Runs render passes against a shared device context.
pub struct Renderer {
    context: Arc<DeviceContext>,
    config: RenderConfig,
    merge_pool: ThreadPool,
    post_render: PostRender,
    interrupt: Interrupt,
}

impl Renderer {
    pub fn new(context: Arc<DeviceContext>, config: RenderConfig) -> Result<Self> {
        let merge_pool = config.build_merge_pool()?;
        Ok(Self {
            context,
            config,
            merge_pool,
            post_render: Box::new(|| true),
            interrupt: Interrupt::new(),
        })
    }

    /// Replace the post-render callback.
    pub fn set_post_render(&mut self, callback: impl FnMut() -> bool + Send + 'static) {
        self.post_render = Box::new(callback);
    }

    /// Handle that stops the running pass at its next check.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render one pass into `scene.samples`.
    ///
    /// Returns [`PassOutcome::Aborted`] when the octree cannot be packed. On
    /// any error the sample buffer is left unchanged unless the merge itself
    /// has started, and every device buffer is released.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(skip_all))]
    pub fn render(&mut self, scene: &mut RenderScene<'_>) -> Result<PassOutcome> {
        let start = Instant::now();
        scene.validate()?;

        let octree = match pack_octree(scene.octree.as_ref()) {
            Ok(octree) => octree,
            Err(e) => {
                tracing::error!("Cannot render scene: {e}");
                return Ok(PassOutcome::Aborted(e));
            }
        };

        let pass = self.context.begin_pass()?;
        self.interrupt.check()?;

        let mut builder = AtlasBuilder::new(self.config.atlas_width);
        let textures = preload(&scene.palette, &mut builder);
        let atlas = builder.build()?;
        let palette = GpuPalette::new(&scene.palette, &textures, &atlas)?;

        let rays = CameraRays::generate(&scene.camera, scene.width, scene.height)?;
        self.interrupt.check()?;

        let inputs = PassInputs {
            rays: &rays,
            octree: &octree,
            palette: &palette,
            atlas: &atlas,
        };
        let Dispatched {
            result,
            resources,
            work_items,
        } = dispatch(&pass, &inputs, scene.samples, &self.interrupt)?;
        self.interrupt.check()?;

        merge_results(&self.merge_pool, &result, scene.samples)?;

        let continue_rendering = (self.post_render)();

        let uploaded_bytes = resources.byte_size();
        resources.release()?;

        let stats = PassStats {
            pixels: scene.pixel_count(),
            work_items,
            octree_nodes: octree.node_count(),
            palette_blocks: palette.len(),
            atlas_size: (atlas.width(), atlas.height()),
            uploaded_bytes,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            pixels = stats.pixels,
            nodes = stats.octree_nodes,
            blocks = stats.palette_blocks,
            bytes = stats.uploaded_bytes,
            "Render pass completed in {:.2?}",
            stats.elapsed
        );

        Ok(PassOutcome::Completed {
            continue_rendering,
            stats,
        })
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("context", &self.context)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::Texture;
    use crate::backend::host_context;
    use crate::palette::{Block, BlockPalette};
    use crate::Camera;
    use glam::Vec3;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use voxtrace_core::BlockId;
    use voxtrace_voxel::{NodeOctree, PackedOctree, VoxelStorage};

    fn renderer() -> Renderer {
        let context = Arc::new(host_context([0.0, 0.0, 1.0]).unwrap());
        Renderer::new(context, RenderConfig::default().with_atlas_width(16)).unwrap()
    }

    fn palette() -> Arc<BlockPalette> {
        let mut palette = BlockPalette::new();
        palette.add(Block::new("red", Arc::new(Texture::solid(2, 2, 0xFFFF_0000))));
        Arc::new(palette)
    }

    fn cube_octree() -> Arc<dyn VoxelStorage> {
        let mut octree = PackedOctree::new(2);
        octree.fill([1, 1, 1], [3, 3, 3], BlockId(1));
        Arc::new(octree)
    }

    fn camera() -> Camera {
        Camera::new(Vec3::new(2.0, 2.0, 6.0)).looking_at(Vec3::splat(2.0))
    }

    #[test]
    fn pass_renders_and_releases_everything() {
        let mut renderer = renderer();
        let mut samples = vec![0.0_f64; 4 * 4 * 3];
        let mut scene = RenderScene::new(&mut samples, 4, 4, palette(), cube_octree(), camera());

        let stats = match renderer.render(&mut scene).unwrap() {
            PassOutcome::Completed { stats, .. } => stats,
            PassOutcome::Aborted(e) => panic!("pass aborted: {e}"),
        };
        assert_eq!(stats.pixels, 16);
        assert_eq!(stats.work_items, 16);
        assert_eq!(renderer.context().live_allocations(), 0);

        // Center pixels see the red cube, corners the blue sky
        let pixel = |i: usize| &samples[i * 3..i * 3 + 3];
        assert!(pixel(5)[0] > 0.0 && pixel(5)[2] == 0.0);
        assert_eq!(pixel(0), &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn node_octree_aborts_without_touching_samples() {
        let mut renderer = renderer();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        renderer.set_post_render(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let mut samples = vec![0.25_f64; 12];
        let octree: Arc<dyn VoxelStorage> = Arc::new(NodeOctree::new(2));
        let mut scene = RenderScene::new(&mut samples, 2, 2, palette(), octree, camera());

        let outcome = renderer.render(&mut scene).unwrap();
        assert!(matches!(
            outcome,
            PassOutcome::Aborted(PackError::Unsupported { .. })
        ));
        assert_eq!(samples, vec![0.25; 12]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(renderer.context().live_allocations(), 0);
    }

    #[test]
    fn post_render_runs_once_per_pass_and_is_reported() {
        let mut renderer = renderer();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        renderer.set_post_render(move || counter.fetch_add(1, Ordering::SeqCst) == 0);

        let mut samples = vec![0.0_f64; 12];
        for expected in [true, false] {
            let mut scene =
                RenderScene::new(&mut samples, 2, 2, palette(), cube_octree(), camera());
            match renderer.render(&mut scene).unwrap() {
                PassOutcome::Completed {
                    continue_rendering, ..
                } => assert_eq!(continue_rendering, expected),
                PassOutcome::Aborted(e) => panic!("aborted: {e}"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn interrupted_pass_leaves_samples_unchanged() {
        let mut renderer = renderer();
        renderer.interrupt().trigger();

        let mut samples = vec![0.5_f64; 12];
        let mut scene = RenderScene::new(&mut samples, 2, 2, palette(), cube_octree(), camera());
        assert!(renderer.render(&mut scene).is_err());
        assert_eq!(samples, vec![0.5; 12]);
        assert_eq!(renderer.context().live_allocations(), 0);
    }

    #[test]
    fn wrong_sample_buffer_length_is_rejected() {
        let mut renderer = renderer();
        let mut samples = vec![0.0_f64; 10];
        let mut scene = RenderScene::new(&mut samples, 2, 2, palette(), cube_octree(), camera());
        assert!(renderer.render(&mut scene).is_err());
        assert_eq!(renderer.context().live_allocations(), 0);
    }
}
