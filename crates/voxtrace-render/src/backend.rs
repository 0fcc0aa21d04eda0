//! Device context construction for each [`BackendKind`].

use voxtrace_gpu::{DeviceContext, GpuContextBuilder, HostDevice, VulkanDevice};
use voxtrace_shaders::{render_kernel_spirv, RENDER_KERNEL, WORKGROUP_SIZE};

use crate::config::{BackendKind, RenderConfig};
use crate::error::Result;
use crate::host_kernel::ReferenceKernel;

/// Create a device context for the configured backend.
pub fn create_context(config: &RenderConfig) -> Result<DeviceContext> {
    match config.backend {
        BackendKind::Host => host_context(config.sky_color),
        BackendKind::Vulkan => vulkan_context(GpuContextBuilder::new().app_name("voxtrace")),
    }
}

/// Context running the reference kernel on the CPU.
pub fn host_context(sky_color: [f32; 3]) -> Result<DeviceContext> {
    let device = HostDevice::with_name("host reference kernel", ReferenceKernel::new(sky_color));
    Ok(DeviceContext::new(Box::new(device), &RENDER_KERNEL)?)
}

/// Context running the WGSL kernel on a Vulkan device.
pub fn vulkan_context(builder: GpuContextBuilder) -> Result<DeviceContext> {
    let spirv = render_kernel_spirv()?;
    let gpu = builder.build()?;
    let device = VulkanDevice::new(gpu, spirv, RENDER_KERNEL, WORKGROUP_SIZE)?;
    Ok(DeviceContext::new(Box::new(device), &RENDER_KERNEL)?)
}
