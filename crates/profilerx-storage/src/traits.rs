//! The [`ProfileStorage`] trait defining the persistence contract.
//!
//! Three stores live behind it:
//! - the **current history** (one sequence of closed workflow profiles),
//! - the **archives** (immutable, timestamp-named history snapshots),
//! - the **method-trace log** (`{executions, method_stats}`).
//!
//! The trait is synchronous and `&self`-based; backends synchronize
//! internally so a single instance can be shared across threads in an `Arc`.

use profilerx_core::{TraceLog, WorkflowProfile};

use crate::error::StorageError;
use crate::types::{ArchiveSummary, Payload};

/// The storage contract for profile history.
pub trait ProfileStorage: Send + Sync {
    // -------------------------------------------------------------------
    // Current history
    // -------------------------------------------------------------------

    /// Loads the current history. A store that was never written yields an
    /// empty history.
    fn load_history(&self) -> Result<Vec<WorkflowProfile>, StorageError>;

    /// Replaces the current history with an encoded sequence of profiles.
    fn write_history(&self, payload: &Payload) -> Result<(), StorageError>;

    /// Encodes and writes `history` in one step.
    fn save_history(&self, history: &[WorkflowProfile]) -> Result<(), StorageError> {
        self.write_history(&Payload::encode(history)?)
    }

    // -------------------------------------------------------------------
    // Archives
    // -------------------------------------------------------------------

    /// Writes a new archive and returns its name. Never overwrites an
    /// existing archive.
    fn create_archive(&self, payload: &Payload) -> Result<String, StorageError>;

    /// Reads and validates an archive.
    ///
    /// Fails with [`StorageError::ArchiveNotFound`] or
    /// [`StorageError::InvalidArchiveFormat`].
    fn read_archive(&self, name: &str) -> Result<Vec<WorkflowProfile>, StorageError>;

    /// Removes an archive.
    fn delete_archive(&self, name: &str) -> Result<(), StorageError>;

    /// Lists archives, newest first.
    fn list_archives(&self) -> Result<Vec<ArchiveSummary>, StorageError>;

    // -------------------------------------------------------------------
    // Method traces
    // -------------------------------------------------------------------

    /// Loads the method-trace log, empty if never written.
    fn load_traces(&self) -> Result<TraceLog, StorageError>;

    /// Replaces the method-trace log.
    fn write_traces(&self, payload: &Payload) -> Result<(), StorageError>;
}
