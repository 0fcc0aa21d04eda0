//! Core types, math, and traits for the Voxtrace renderer.
//!
//! This crate provides the foundational types shared by every stage of a
//! render pass:
//! - Block ids and material properties
//! - Ray math
//! - Kernel signature descriptors
//! - Typed access to host-owned state
//! - Common error types

pub mod error;
pub mod host;
pub mod kernel;
pub mod math;
pub mod types;

pub use error::{Error, Result};
pub use host::{HostFields, HostStateError};
pub use kernel::{
    ArgAccess, ArgKind, ArgSpec, KernelSignature, SignatureMismatch, MATERIAL_RECORD_BYTES,
};
pub use types::{BlockId, Material};

/// Renderer-wide constants
pub mod constants {
    /// Maximum octree depth the kernel can traverse.
    pub const MAX_OCTREE_DEPTH: u32 = 24;
    /// Number of `f32` components per pixel in sample, ray, and result buffers.
    pub const COMPONENTS_PER_PIXEL: usize = 3;
}
