//! Test harness for headless rendering and visual regression testing.
//!
//! [`HeadlessRenderer`] owns a sample buffer and a [`Renderer`] and runs
//! whole passes against it, on the host device or on a Vulkan GPU.

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use voxtrace_core::constants::COMPONENTS_PER_PIXEL;
use voxtrace_gpu::{DeviceContext, GpuContextBuilder, HostDevice, HostDeviceStats, HostKernel};
use voxtrace_render::{
    tone_map, vulkan_context, BlockPalette, Camera, PassOutcome, PassStats, ReferenceKernel,
    RenderConfig, RenderScene, Renderer,
};
use voxtrace_shaders::{render_kernel_signature, DEFAULT_SKY_COLOR};
use voxtrace_voxel::VoxelStorage;

use crate::{Result, TestError, VisualTestConfig};

/// Headless renderer for testing.
///
/// Host-backed renderers keep a handle on their [`HostDevice`], so tests can
/// inspect allocations, releases, and dispatches after a pass.
pub struct HeadlessRenderer {
    renderer: Renderer,
    device: Option<Arc<HostDevice>>,
    samples: Vec<f64>,
    width: u32,
    height: u32,
}

impl HeadlessRenderer {
    /// Renderer running the reference kernel on the host.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_kernel(width, height, ReferenceKernel::new(DEFAULT_SKY_COLOR))
    }

    /// Renderer running `kernel` on the host.
    pub fn with_kernel(width: u32, height: u32, kernel: impl HostKernel + 'static) -> Result<Self> {
        let device = Arc::new(HostDevice::with_name("headless", kernel));
        let context = DeviceContext::new(
            Box::new(Arc::clone(&device)),
            &render_kernel_signature(),
        )?;
        Self::from_context(Arc::new(context), Some(device), width, height)
    }

    /// Renderer running the compiled kernel on a Vulkan device.
    pub fn vulkan(width: u32, height: u32) -> Result<Self> {
        let context = vulkan_context(
            GpuContextBuilder::new()
                .app_name("voxtrace-test")
                .validation(true),
        )?;
        Self::from_context(Arc::new(context), None, width, height)
    }

    fn from_context(
        context: Arc<DeviceContext>,
        device: Option<Arc<HostDevice>>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let config = RenderConfig::default().with_atlas_width(256);
        Ok(Self {
            renderer: Renderer::new(context, config)?,
            device,
            samples: vec![0.0; width as usize * height as usize * COMPONENTS_PER_PIXEL],
            width,
            height,
        })
    }

    /// Run one pass over the given scene.
    pub fn render(
        &mut self,
        palette: &Arc<BlockPalette>,
        octree: Arc<dyn VoxelStorage>,
        camera: &Camera,
    ) -> Result<PassOutcome> {
        let mut scene = RenderScene::new(
            &mut self.samples,
            self.width,
            self.height,
            Arc::clone(palette),
            octree,
            camera.clone(),
        );
        Ok(self.renderer.render(&mut scene)?)
    }

    /// Run one pass and return its stats, failing if it was aborted.
    pub fn render_completed(
        &mut self,
        palette: &Arc<BlockPalette>,
        octree: Arc<dyn VoxelStorage>,
        camera: &Camera,
    ) -> Result<PassStats> {
        match self.render(palette, octree, camera)? {
            PassOutcome::Completed { stats, .. } => Ok(stats),
            PassOutcome::Aborted(e) => Err(e.into()),
        }
    }

    /// Run one pass and tone map the sample buffer.
    pub fn render_image(
        &mut self,
        palette: &Arc<BlockPalette>,
        octree: Arc<dyn VoxelStorage>,
        camera: &Camera,
    ) -> Result<RgbaImage> {
        self.render_completed(palette, octree, camera)?;
        self.image()
    }

    /// Tone map the current sample buffer.
    pub fn image(&self) -> Result<RgbaImage> {
        Ok(tone_map(&self.samples, self.width, self.height, 1.0)?)
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Overwrite every sample with `value`.
    pub fn fill_samples(&mut self, value: f64) {
        self.samples.fill(value);
    }

    /// Counters of the host device, if this renderer runs on the host.
    pub fn device_stats(&self) -> Option<HostDeviceStats> {
        self.device.as_ref().map(|device| device.stats())
    }

    /// Host device, if this renderer runs on the host.
    pub fn host_device(&self) -> Option<&Arc<HostDevice>> {
        self.device.as_ref()
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn context(&self) -> &Arc<DeviceContext> {
        self.renderer.context()
    }

    /// Get the output dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Renders scenes and checks them against stored PNG baselines.
///
/// The first run of a name records its baseline; later runs fail when the
/// mean channel difference exceeds the configured threshold, leaving the
/// rendered image and a difference map in the output directory.
pub struct VisualRegressionTest {
    config: VisualTestConfig,
    renderer: HeadlessRenderer,
}

impl VisualRegressionTest {
    /// Runner over a 256x256 host renderer.
    pub fn new(config: VisualTestConfig) -> Result<Self> {
        Self::with_renderer(config, HeadlessRenderer::new(256, 256)?)
    }

    pub fn with_renderer(config: VisualTestConfig, renderer: HeadlessRenderer) -> Result<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        std::fs::create_dir_all(&config.output_dir)?;
        Ok(Self { config, renderer })
    }

    pub fn run_test(
        &mut self,
        name: &str,
        palette: &Arc<BlockPalette>,
        octree: Arc<dyn VoxelStorage>,
        camera: &Camera,
    ) -> Result<()> {
        let rendered = self.renderer.render_image(palette, octree, camera)?;
        let file = format!("{name}.png");
        rendered.save(self.config.output_dir.join(&file))?;

        let baseline_path = self.config.baseline_dir.join(&file);
        let Ok(baseline) = image::open(&baseline_path) else {
            rendered.save(&baseline_path)?;
            tracing::info!("Recorded baseline {}", baseline_path.display());
            return Ok(());
        };
        let baseline = baseline.to_rgba8();

        let difference = compare_images(&baseline, &rendered)?;
        if difference <= self.config.threshold {
            return Ok(());
        }
        let diff_path = self.config.output_dir.join(format!("{name}_diff.png"));
        difference_map(&baseline, &rendered).save(&diff_path)?;
        Err(TestError::ImageComparison(format!(
            "{name} differs from its baseline by {difference:.4}, above {:.4}; see {}",
            self.config.threshold,
            diff_path.display()
        )))
    }
}

/// Mean absolute RGB difference of two images, normalized to `[0, 1]`.
pub fn compare_images(a: &RgbaImage, b: &RgbaImage) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        return Err(TestError::ImageComparison(format!(
            "sizes differ: {:?} and {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }
    let channels = a.pixels().zip(b.pixels()).flat_map(|(pa, pb)| {
        (0..3).map(move |c| u64::from(pa[c].abs_diff(pb[c])))
    });
    let (sum, count) = channels.fold((0_u64, 0_u64), |(sum, n), d| (sum + d, n + 1));
    if count == 0 {
        return Ok(0.0);
    }
    Ok(sum as f64 / (count as f64 * 255.0))
}

/// Pixels differing by more than a few levels in red, the rest dimmed.
fn difference_map(baseline: &RgbaImage, rendered: &RgbaImage) -> RgbaImage {
    let mut map = baseline.clone();
    for (out, actual) in map.pixels_mut().zip(rendered.pixels()) {
        let changed = (0..3).any(|c| out[c].abs_diff(actual[c]) > 10);
        *out = if changed {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([out[0] / 2, out[1] / 2, out[2] / 2, 255])
        };
    }
    map
}
