//! Engine error types.
//!
//! Only construction can fail outright. Once running, the engine turns every
//! fault into a logged diagnostic and a safe default.

use profilerx_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A configuration value could not be parsed or is out of range.
    #[error("invalid configuration {key}={value:?}: {reason}")]
    InvalidConfig {
        key: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub(crate) fn invalid_config(
        key: &str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::InvalidConfig {
            key: key.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}
