//! Storage error types for profilerx-storage.
//!
//! [`StorageError`] covers every failure mode of the persistence layer:
//! I/O, serialization, and the archive-specific not-found / bad-format /
//! bad-name cases that callers report back as failures rather than faults.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing a file failed.
    #[error("I/O error on {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No archive with the given name exists.
    #[error("archive not found: {0}")]
    ArchiveNotFound(String),

    /// The archive exists but is not a sequence of workflow profiles.
    #[error("invalid archive format in {name}: {reason}")]
    InvalidArchiveFormat { name: String, reason: String },

    /// The name is not a plain archive file name.
    #[error("invalid archive name: {0:?}")]
    InvalidArchiveName(String),

    /// The current-history store exists but could not be decoded.
    #[error("invalid history file: {reason}")]
    InvalidHistory { reason: String },

    /// A backend refused the write (used by the in-memory store to simulate
    /// a full or read-only disk).
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the failures a caller should report as "no such archive" or
    /// "bad request" rather than as an internal fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::ArchiveNotFound(_)
                | StorageError::InvalidArchiveFormat { .. }
                | StorageError::InvalidArchiveName(_)
        )
    }
}
