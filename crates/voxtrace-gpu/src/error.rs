//! GPU error types.

use ash::vk;
use thiserror::Error;
use voxtrace_core::SignatureMismatch;

/// Compute device errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan loader could not be found or initialized.
    #[error("Failed to load Vulkan: {0}")]
    Loader(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// The compiled program does not declare the expected kernel signature.
    #[error("Kernel signature mismatch: {0}")]
    Signature(#[from] SignatureMismatch),

    /// Kernel arguments do not match the program signature.
    #[error("Invalid kernel argument: {0}")]
    InvalidArgument(String),

    /// Buffer handle is unknown to the device (never created or already released).
    #[error("Unknown buffer handle {0}")]
    UnknownBuffer(u64),

    /// Host and device buffer sizes disagree.
    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A render pass is already running on this context.
    #[error("A render pass is already in flight on this device context")]
    PassInFlight,

    /// The pass was interrupted while waiting for the device.
    #[error("Interrupted while waiting for the device")]
    Interrupted,

    /// Kernel execution failed on the device.
    #[error("Kernel execution failed: {0}")]
    Execution(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
