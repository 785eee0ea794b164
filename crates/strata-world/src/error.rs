//! World generation errors.

use strata_gpu::GpuError;
use thiserror::Error;

/// Errors raised while generating or streaming height maps.
#[derive(Error, Debug)]
pub enum WorldError {
    /// Configuration rejected before any work was scheduled.
    #[error("Invalid height map configuration: {0}")]
    InvalidConfig(String),

    /// Upload to the GPU failed.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, WorldError>;
