//! Headless Vulkan compute backend.
//!
//! Built on `ash` with memory from `gpu-allocator`. No surface or swapchain
//! extensions are requested; the device owns a single compute queue.

pub mod capabilities;
pub mod context;
pub mod device;
pub mod instance;
pub mod kernel;
pub mod memory;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder};
pub use device::VulkanDevice;
pub use kernel::KernelPipeline;
pub use memory::{BufferAllocator, StorageBuffer};
