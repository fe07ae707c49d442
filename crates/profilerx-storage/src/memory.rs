//! In-memory implementation of [`ProfileStorage`].
//!
//! [`InMemoryStore`] keeps the encoded documents in memory and decodes them
//! through the same paths as [`JsonFileStore`](crate::JsonFileStore), so the
//! validation semantics are identical. It can also be told to reject writes,
//! which is how persistence failures are exercised in tests.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::Mutex;

use profilerx_core::{TraceLog, WorkflowProfile};

use crate::error::StorageError;
use crate::traits::ProfileStorage;
use crate::types::{
    archive_file_name, decode_archive, decode_history, validate_archive_name, ArchiveSummary,
    Payload,
};

#[derive(Debug, Clone)]
struct StoredArchive {
    bytes: Vec<u8>,
    created: f64,
    /// Insertion order, breaks ties between equal timestamps.
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    history: Option<Vec<u8>>,
    traces: Option<Vec<u8>>,
    archives: BTreeMap<String, StoredArchive>,
    next_seq: u64,
    reject_writes: bool,
    history_writes: u64,
}

/// Process-local profile storage.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every write fails with [`StorageError::WriteRejected`].
    pub fn reject_writes(&self, reject: bool) {
        self.inner.lock().reject_writes = reject;
    }

    /// Number of successful history writes so far.
    pub fn history_writes(&self) -> u64 {
        self.inner.lock().history_writes
    }

    /// Stores raw bytes under an archive name, bypassing encoding.
    pub fn insert_archive_raw(&self, name: &str, bytes: impl Into<Vec<u8>>) -> Result<(), StorageError> {
        validate_archive_name(name)?;
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.archives.insert(
            name.to_string(),
            StoredArchive {
                bytes: bytes.into(),
                created: now_seconds(),
                seq,
            },
        );
        Ok(())
    }
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn check_writable(inner: &Inner) -> Result<(), StorageError> {
    if inner.reject_writes {
        Err(StorageError::WriteRejected("in-memory store is read-only".into()))
    } else {
        Ok(())
    }
}

impl ProfileStorage for InMemoryStore {
    fn load_history(&self) -> Result<Vec<WorkflowProfile>, StorageError> {
        let inner = self.inner.lock();
        match &inner.history {
            Some(bytes) => decode_history(bytes),
            None => Ok(Vec::new()),
        }
    }

    fn write_history(&self, payload: &Payload) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        check_writable(&inner)?;
        inner.history = Some(payload.as_bytes().to_vec());
        inner.history_writes += 1;
        Ok(())
    }

    fn create_archive(&self, payload: &Payload) -> Result<String, StorageError> {
        let mut inner = self.inner.lock();
        check_writable(&inner)?;
        let created_ms = Utc::now().timestamp_millis();
        let mut attempt = 0;
        let name = loop {
            let candidate = archive_file_name(created_ms, attempt);
            if !inner.archives.contains_key(&candidate) {
                break candidate;
            }
            attempt += 1;
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.archives.insert(
            name.clone(),
            StoredArchive {
                bytes: payload.as_bytes().to_vec(),
                created: created_ms as f64 / 1_000.0,
                seq,
            },
        );
        Ok(name)
    }

    fn read_archive(&self, name: &str) -> Result<Vec<WorkflowProfile>, StorageError> {
        validate_archive_name(name)?;
        let inner = self.inner.lock();
        let stored = inner
            .archives
            .get(name)
            .ok_or_else(|| StorageError::ArchiveNotFound(name.to_string()))?;
        decode_archive(name, &stored.bytes)
    }

    fn delete_archive(&self, name: &str) -> Result<(), StorageError> {
        validate_archive_name(name)?;
        let mut inner = self.inner.lock();
        check_writable(&inner)?;
        inner
            .archives
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::ArchiveNotFound(name.to_string()))
    }

    fn list_archives(&self) -> Result<Vec<ArchiveSummary>, StorageError> {
        let inner = self.inner.lock();
        let mut entries: Vec<(&String, &StoredArchive)> = inner.archives.iter().collect();
        entries.sort_by(|(_, a), (_, b)| {
            b.created
                .total_cmp(&a.created)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        Ok(entries
            .into_iter()
            .map(|(name, stored)| ArchiveSummary {
                name: name.clone(),
                size: stored.bytes.len() as u64,
                created: stored.created,
                modified: stored.created,
            })
            .collect())
    }

    fn load_traces(&self) -> Result<TraceLog, StorageError> {
        let inner = self.inner.lock();
        match &inner.traces {
            Some(bytes) => Ok(serde_json::from_slice(bytes)?),
            None => Ok(TraceLog::default()),
        }
    }

    fn write_traces(&self, payload: &Payload) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        check_writable(&inner)?;
        inner.traces = Some(payload.as_bytes().to_vec());
        Ok(())
    }
}
