//! Archive operations on [`ProfileStore`].
//!
//! Archives are immutable snapshots of a full history. Every operation here
//! holds the store's state lock across its storage I/O, so no profile can be
//! appended between writing an archive and clearing the history.
//!
//! The `try_*` variants return the underlying [`StorageError`] for callers
//! that report it (HTTP, CLI); the plain variants log it and return a safe
//! default.

use profilerx_storage::{ArchiveSummary, StorageError};

use crate::store::ProfileStore;

impl ProfileStore {
    /// Moves the current history into a new archive.
    ///
    /// Returns the archive name, or `None` if the history was empty or the
    /// archive could not be written (history is then kept).
    pub fn archive_history(&self) -> Option<String> {
        match self.try_archive_history() {
            Ok(name) => name,
            Err(e) => {
                tracing::error!(error = %e, "failed to archive history");
                None
            }
        }
    }

    pub fn try_archive_history(&self) -> Result<Option<String>, StorageError> {
        let mut state = self.state.lock();
        let name = self.archive_locked(&mut state)?;
        if let Some(name) = &name {
            tracing::info!(archive = %name, "history archived on request");
        }
        Ok(name)
    }

    /// Replaces the current history with the content of an archive.
    ///
    /// Returns `false` (state unchanged) if the archive is missing or
    /// malformed, or if the current history could not be archived first.
    pub fn load_archive(&self, name: &str) -> bool {
        match self.try_load_archive(name) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(archive = name, error = %e, "failed to load archive");
                false
            }
        }
    }

    /// Loads an archive into the current history and deletes the archive.
    ///
    /// A non-empty current history is archived first, so nothing is ever
    /// discarded. Returns the number of profiles loaded.
    pub fn try_load_archive(&self, name: &str) -> Result<usize, StorageError> {
        let mut state = self.state.lock();
        let mut loaded = self.storage().read_archive(name)?;

        if !state.history.is_empty() {
            self.archive_locked(&mut state)?;
        }

        let max = self.max_history();
        if loaded.len() > max {
            let excess = loaded.len() - max;
            tracing::warn!(archive = name, excess, max_history = max, "archive exceeds history bound, dropping oldest");
            loaded.drain(..excess);
        }
        let count = loaded.len();
        state.history = loaded;

        match self.write_locked(&mut state) {
            Ok(()) => {
                if let Err(e) = self.storage().delete_archive(name) {
                    tracing::warn!(archive = name, error = %e, "loaded archive could not be removed");
                }
            }
            // The archive stays on disk as the only durable copy.
            Err(e) => tracing::error!(archive = name, error = %e, "failed to persist loaded history"),
        }
        tracing::info!(archive = name, profiles = count, "archive loaded");
        Ok(count)
    }

    pub fn delete_archive(&self, name: &str) -> bool {
        match self.try_delete_archive(name) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(archive = name, error = %e, "failed to delete archive");
                false
            }
        }
    }

    pub fn try_delete_archive(&self, name: &str) -> Result<(), StorageError> {
        let _state = self.state.lock();
        self.storage().delete_archive(name)?;
        tracing::info!(archive = name, "archive deleted");
        Ok(())
    }

    /// Archives, newest first. Unreadable archive storage lists as empty.
    pub fn list_archives(&self) -> Vec<ArchiveSummary> {
        self.storage().list_archives().unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to list archives");
            Vec::new()
        })
    }
}
