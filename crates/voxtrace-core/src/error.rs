//! Error types shared across the renderer.

use thiserror::Error;

use crate::host::HostStateError;

/// Renderer-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Out of bounds access
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Host state could not be read
    #[error(transparent)]
    HostState(#[from] HostStateError),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
