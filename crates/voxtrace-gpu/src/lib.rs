//! Compute device layer for the Voxtrace renderer.
//!
//! This crate provides:
//! - The [`ComputeDevice`] trait and the [`DeviceBuffer`] release guard
//! - Positional kernel argument binding checked against the program signature
//! - [`DeviceContext`], shared across passes and locked for one pass at a time
//! - A headless Vulkan backend and a host (CPU) backend

pub mod context;
pub mod device;
pub mod error;
pub mod host;
pub mod kernel;
pub mod vulkan;

pub use context::{ContextSlot, DeviceContext, PassLock};
pub use device::{BufferHandle, ComputeDevice, DeviceBuffer, Interrupt};
pub use error::{GpuError, Result};
pub use host::{DispatchRecord, HostBindings, HostDevice, HostDeviceStats, HostInputs, HostKernel};
pub use kernel::{KernelArg, KernelArgs};
pub use vulkan::{GpuCapabilities, GpuContext, GpuContextBuilder, VulkanDevice};
