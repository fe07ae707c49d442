//! Core error types for profilerx-core.
//!
//! Uses `thiserror` for structured, matchable error variants. None of these
//! ever reach the host engine: the engine converts them into logged
//! diagnostics and safe defaults.

use thiserror::Error;

/// Errors produced while validating core records.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A profile record failed a structural check.
    #[error("invalid profile '{prompt_id}': {reason}")]
    InvalidProfile { prompt_id: String, reason: String },

    /// A JSON value could not be interpreted as a node value description.
    #[error("invalid node value: {reason}")]
    InvalidNodeValue { reason: String },
}

/// A memory-sampling primitive is unavailable or failed.
///
/// Callers degrade the affected metric to zero.
#[derive(Debug, Error)]
pub enum SamplerError {
    /// The measurement source does not exist on this host (no device, no
    /// process table entry).
    #[error("memory source unavailable: {0}")]
    Unavailable(String),

    /// The measurement source exists but the read failed.
    #[error("memory sampling failed: {0}")]
    Failed(String),
}
