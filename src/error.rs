//! Error types for StashKV
//!
//! Provides a unified error type for all operations. Build entry points
//! report failures as `BadInput` (malformed records, length mismatches,
//! oversubscribed capacity) or `FailToOutput` (the sink rejected a write),
//! matching the two externally meaningful failure classes of a build.

use thiserror::Error;

/// Result type alias using StashError
pub type Result<T> = std::result::Result<T, StashError>;

/// Unified error type for StashKV operations
#[derive(Debug, Error)]
pub enum StashError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Build Errors
    // -------------------------------------------------------------------------
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("failed to output: {0}")]
    FailToOutput(String),

    #[error("allocation of {0} bytes failed")]
    Alloc(usize),

    // -------------------------------------------------------------------------
    // Artifact Errors
    // -------------------------------------------------------------------------
    #[error("corrupted artifact: {0}")]
    Corrupted(String),
}
