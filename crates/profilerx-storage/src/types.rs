//! Storage-layer types: encoded payloads, archive listings, archive naming.

use serde::{Deserialize, Serialize};

use profilerx_core::WorkflowProfile;

use crate::error::StorageError;

/// Prefix shared by every archive file name.
pub const ARCHIVE_PREFIX: &str = "profiling_history_";

/// A fully serialized document, ready to be written.
///
/// Encoding is separated from writing so that callers can serialize a
/// consistent snapshot under their own lock and perform I/O after releasing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
}

impl Payload {
    /// Serializes `value` as pretty-printed JSON.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, StorageError> {
        Ok(Payload {
            bytes: serde_json::to_vec_pretty(value)?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded size in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

/// One entry of an archive directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub name: String,
    /// Bytes.
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub created: f64,
    /// Seconds since the Unix epoch.
    pub modified: f64,
}

/// Sorts a listing newest-first by creation time, then by name.
pub(crate) fn sort_newest_first(archives: &mut [ArchiveSummary]) {
    archives.sort_by(|a, b| {
        b.created
            .total_cmp(&a.created)
            .then_with(|| b.name.cmp(&a.name))
    });
}

/// Builds the archive name for a creation time, disambiguating collisions
/// within the same millisecond with a numeric suffix.
pub fn archive_file_name(created_ms: i64, attempt: u32) -> String {
    if attempt == 0 {
        format!("{}{}.json", ARCHIVE_PREFIX, created_ms)
    } else {
        format!("{}{}_{}.json", ARCHIVE_PREFIX, created_ms, attempt)
    }
}

/// Rejects anything that is not a plain `*.json` file name.
pub fn validate_archive_name(name: &str) -> Result<(), StorageError> {
    let plain = !name.is_empty()
        && name.ends_with(".json")
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !name.contains("..");
    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidArchiveName(name.to_string()))
    }
}

/// Decodes and validates an archive body.
pub(crate) fn decode_archive(name: &str, bytes: &[u8]) -> Result<Vec<WorkflowProfile>, StorageError> {
    let invalid = |reason: String| StorageError::InvalidArchiveFormat {
        name: name.to_string(),
        reason,
    };
    let profiles: Vec<WorkflowProfile> =
        serde_json::from_slice(bytes).map_err(|e| invalid(e.to_string()))?;
    for profile in &profiles {
        profile.validate().map_err(|e| invalid(e.to_string()))?;
    }
    Ok(profiles)
}

/// Decodes the current-history document.
pub(crate) fn decode_history(bytes: &[u8]) -> Result<Vec<WorkflowProfile>, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::InvalidHistory {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_names_are_plain_json_files() {
        assert!(validate_archive_name("profiling_history_1700000000000.json").is_ok());
        assert!(validate_archive_name("../profiling_history.json").is_err());
        assert!(validate_archive_name("sub/dir.json").is_err());
        assert!(validate_archive_name("..\\x.json").is_err());
        assert!(validate_archive_name("notes.txt").is_err());
        assert!(validate_archive_name(".json").is_err());
        assert!(validate_archive_name("").is_err());
    }

    #[test]
    fn archive_names_disambiguate_collisions() {
        assert_eq!(archive_file_name(42, 0), "profiling_history_42.json");
        assert_eq!(archive_file_name(42, 2), "profiling_history_42_2.json");
    }

    #[test]
    fn listing_sorts_newest_first() {
        let entry = |name: &str, created: f64| ArchiveSummary {
            name: name.to_string(),
            size: 0,
            created,
            modified: created,
        };
        let mut list = vec![entry("a.json", 1.0), entry("c.json", 3.0), entry("b.json", 3.0)];
        sort_newest_first(&mut list);
        let names: Vec<_> = list.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["c.json", "b.json", "a.json"]);
    }

    #[test]
    fn non_sequence_archive_is_rejected() {
        let err = decode_archive("x.json", br#"{"promptId": "p"}"#).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArchiveFormat { .. }));
        let err = decode_archive("x.json", b"not json").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn empty_sequence_is_a_valid_archive() {
        assert!(decode_archive("x.json", b"[]").unwrap().is_empty());
    }
}
