//! Upload, argument binding, and synchronous kernel execution.

use voxtrace_core::constants::COMPONENTS_PER_PIXEL;
use voxtrace_core::{ArgAccess, KernelSignature};
use voxtrace_gpu::{DeviceBuffer, GpuError, Interrupt, KernelArgs, PassLock};
use voxtrace_voxel::OctreeBuffer;

use crate::atlas::TextureAtlas;
use crate::camera::CameraRays;
use crate::error::{RenderError, Result};
use crate::palette::GpuPalette;

/// Host data uploaded for one pass.
#[derive(Clone, Copy, Debug)]
pub struct PassInputs<'s> {
    pub rays: &'s CameraRays,
    pub octree: &'s OctreeBuffer,
    pub palette: &'s GpuPalette,
    pub atlas: &'s TextureAtlas,
}

/// Device buffers of one pass.
///
/// Fields are declared in release order, so dropping the set releases them in
/// the same order as [`release`](Self::release).
#[derive(Debug)]
pub struct PassResources<'a> {
    pub atlas: DeviceBuffer<'a>,
    pub octree: DeviceBuffer<'a>,
    pub palette: DeviceBuffer<'a>,
    pub ray_origins: DeviceBuffer<'a>,
    pub ray_directions: DeviceBuffer<'a>,
    pub result: DeviceBuffer<'a>,
}

impl PassResources<'_> {
    /// Release every buffer: atlas, octree, palette, rays, then result.
    ///
    /// All buffers are released even if one fails; the first error is returned.
    pub fn release(self) -> Result<()> {
        let buffers = [
            self.atlas,
            self.octree,
            self.palette,
            self.ray_origins,
            self.ray_directions,
            self.result,
        ];
        let mut first_error: Option<GpuError> = None;
        for buffer in buffers {
            if let Err(e) = buffer.release() {
                tracing::warn!("Buffer release failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Total bytes uploaded.
    pub fn byte_size(&self) -> usize {
        [
            &self.atlas,
            &self.octree,
            &self.palette,
            &self.ray_origins,
            &self.ray_directions,
            &self.result,
        ]
        .iter()
        .map(|buffer| buffer.size())
        .sum()
    }
}

/// Copy every pass input to the device. The result buffer starts as an `f32`
/// copy of `samples`.
pub fn upload<'a>(
    pass: &PassLock<'a>,
    inputs: &PassInputs<'_>,
    samples: &[f64],
) -> Result<PassResources<'a>> {
    let ray_origins = pass.upload(
        "rayPos",
        ArgAccess::ReadOnly,
        bytemuck::cast_slice(inputs.rays.origins()),
    )?;
    let ray_directions = pass.upload(
        "rayDir",
        ArgAccess::ReadOnly,
        bytemuck::cast_slice(inputs.rays.directions()),
    )?;
    let octree = pass.upload("octreeData", ArgAccess::ReadOnly, inputs.octree.as_bytes())?;
    let palette = pass.upload("blockPalette", ArgAccess::ReadOnly, inputs.palette.as_bytes())?;
    let atlas = pass.upload("atlasTexture", ArgAccess::ReadOnly, inputs.atlas.as_bytes())?;

    let pass_buffer: Vec<f32> = samples.iter().map(|&s| s as f32).collect();
    let result = pass.upload(
        "result",
        ArgAccess::ReadWrite,
        bytemuck::cast_slice(&pass_buffer),
    )?;

    Ok(PassResources {
        atlas,
        octree,
        palette,
        ray_origins,
        ray_directions,
        result,
    })
}

/// Bind the pass buffers in kernel argument order.
pub fn bind_arguments(
    signature: KernelSignature,
    resources: &PassResources<'_>,
    octree_depth: u32,
) -> Result<KernelArgs> {
    let depth = i32::try_from(octree_depth)
        .map_err(|_| GpuError::InvalidArgument(format!("octree depth {octree_depth}")))?;

    let mut args = KernelArgs::new(signature);
    args.bind_buffer("rayPos", &resources.ray_origins)?
        .bind_buffer("rayDir", &resources.ray_directions)?
        .bind_int("octreeDepth", depth)?
        .bind_buffer("octreeData", &resources.octree)?
        .bind_buffer("blockPalette", &resources.palette)?
        .bind_buffer("atlasTexture", &resources.atlas)?
        .bind_buffer("result", &resources.result)?;
    args.ensure_complete()?;
    Ok(args)
}

/// Blocking read of the result buffer.
pub fn read_result(resources: &PassResources<'_>) -> Result<Vec<f32>> {
    let mut out = vec![0.0_f32; resources.result.size() / std::mem::size_of::<f32>()];
    resources
        .result
        .read_into(bytemuck::cast_slice_mut(&mut out))?;
    Ok(out)
}

/// Output of a completed dispatch.
#[derive(Debug)]
pub struct Dispatched<'a> {
    pub result: Vec<f32>,
    pub resources: PassResources<'a>,
    pub work_items: u32,
}

/// Upload, bind, run the kernel with one work item per pixel, and read back.
///
/// On error every buffer uploaded so far is released before returning.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "debug", skip_all))]
pub fn dispatch<'a>(
    pass: &PassLock<'a>,
    inputs: &PassInputs<'_>,
    samples: &[f64],
    interrupt: &Interrupt,
) -> Result<Dispatched<'a>> {
    let pixels = samples.len() / COMPONENTS_PER_PIXEL;
    let work_items = u32::try_from(pixels).map_err(|_| RenderError::TooManyPixels(pixels))?;

    let resources = upload(pass, inputs, samples)?;
    tracing::debug!(
        bytes = resources.byte_size(),
        work_items,
        "Uploaded pass buffers"
    );
    interrupt.check()?;

    let args = bind_arguments(*pass.context().signature(), &resources, inputs.octree.depth())?;
    pass.device().dispatch(&args, work_items, interrupt)?;

    let result = read_result(&resources)?;
    if result.len() != samples.len() {
        return Err(RenderError::ResultLength {
            expected: samples.len(),
            actual: result.len(),
        });
    }

    Ok(Dispatched {
        result,
        resources,
        work_items,
    })
}
