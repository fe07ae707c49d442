//! JSON-file implementation of [`ProfileStorage`].
//!
//! Layout inside the data directory:
//!
//! ```text
//! <data_dir>/profiling_history.json
//! <data_dir>/method_traces.json
//! <data_dir>/archives/profiling_history_<millis>[_<n>].json
//! ```
//!
//! All writes go to a temp file in the destination directory first and are
//! renamed into place, so readers never observe a partial document.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use profilerx_core::{TraceLog, WorkflowProfile};

use crate::error::StorageError;
use crate::traits::ProfileStorage;
use crate::types::{
    archive_file_name, decode_archive, decode_history, sort_newest_first, validate_archive_name,
    ArchiveSummary, Payload,
};

pub const HISTORY_FILE: &str = "profiling_history.json";
pub const TRACES_FILE: &str = "method_traces.json";
pub const ARCHIVE_DIR: &str = "archives";

/// Same-millisecond collisions tolerated before giving up.
const MAX_NAME_ATTEMPTS: u32 = 1_000;

/// File-backed profile storage rooted at a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    data_dir: PathBuf,
    archive_dir: PathBuf,
}

impl JsonFileStore {
    /// Opens (creating if needed) the data directory and its archive
    /// subdirectory.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let archive_dir = data_dir.join(ARCHIVE_DIR);
        fs::create_dir_all(&archive_dir).map_err(|e| StorageError::io(&archive_dir, e))?;
        tracing::debug!(data_dir = %data_dir.display(), "opened profile store");
        Ok(JsonFileStore {
            data_dir,
            archive_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn traces_path(&self) -> PathBuf {
        self.data_dir.join(TRACES_FILE)
    }

    fn archive_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_archive_name(name)?;
        Ok(self.archive_dir.join(name))
    }
}

/// Writes `bytes` to a temp file inside `dir`, flushed to disk.
fn stage(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, StorageError> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    Ok(tmp)
}

fn replace_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = stage(dir, bytes)?;
    tmp.persist(target)
        .map_err(|e| StorageError::io(target, e.error))?;
    Ok(())
}

/// Reads a file, mapping "does not exist" to `None`.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

fn epoch_seconds(time: SystemTime) -> f64 {
    DateTime::<Utc>::from(time).timestamp_micros() as f64 / 1_000_000.0
}

impl ProfileStorage for JsonFileStore {
    fn load_history(&self) -> Result<Vec<WorkflowProfile>, StorageError> {
        match read_optional(&self.history_path())? {
            Some(bytes) => decode_history(&bytes),
            None => Ok(Vec::new()),
        }
    }

    fn write_history(&self, payload: &Payload) -> Result<(), StorageError> {
        replace_atomically(&self.data_dir, &self.history_path(), payload.as_bytes())
    }

    fn create_archive(&self, payload: &Payload) -> Result<String, StorageError> {
        let created_ms = Utc::now().timestamp_millis();
        let mut tmp = stage(&self.archive_dir, payload.as_bytes())?;
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = archive_file_name(created_ms, attempt);
            let path = self.archive_dir.join(&name);
            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    tracing::info!(archive = %name, bytes = payload.byte_len(), "created archive");
                    return Ok(name);
                }
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => tmp = e.file,
                Err(e) => return Err(StorageError::io(path, e.error)),
            }
        }
        Err(StorageError::io(
            &self.archive_dir,
            std::io::Error::new(ErrorKind::AlreadyExists, "no free archive name"),
        ))
    }

    fn read_archive(&self, name: &str) -> Result<Vec<WorkflowProfile>, StorageError> {
        let path = self.archive_path(name)?;
        match read_optional(&path)? {
            Some(bytes) => decode_archive(name, &bytes),
            None => Err(StorageError::ArchiveNotFound(name.to_string())),
        }
    }

    fn delete_archive(&self, name: &str) -> Result<(), StorageError> {
        let path = self.archive_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::ArchiveNotFound(name.to_string()))
            }
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn list_archives(&self) -> Result<Vec<ArchiveSummary>, StorageError> {
        let entries = match fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.archive_dir, e)),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.archive_dir, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Skips in-flight temp files and anything else foreign.
            if validate_archive_name(&name).is_err() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                // Deleted between readdir and stat.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(entry.path(), e)),
            };
            let modified = metadata
                .modified()
                .map_err(|e| StorageError::io(entry.path(), e))?;
            let created = metadata.created().unwrap_or(modified);
            archives.push(ArchiveSummary {
                name,
                size: metadata.len(),
                created: epoch_seconds(created),
                modified: epoch_seconds(modified),
            });
        }
        sort_newest_first(&mut archives);
        Ok(archives)
    }

    fn load_traces(&self) -> Result<TraceLog, StorageError> {
        match read_optional(&self.traces_path())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(TraceLog::default()),
        }
    }

    fn write_traces(&self, payload: &Payload) -> Result<(), StorageError> {
        replace_atomically(&self.data_dir, &self.traces_path(), payload.as_bytes())
    }
}
