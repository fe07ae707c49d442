//! Persistence for ProfilerX profile history, archives and method traces.
//!
//! Provides the [`ProfileStorage`] trait defining the storage contract, plus
//! the [`JsonFileStore`] and [`InMemoryStore`] backends.
//!
//! # Architecture
//!
//! Callers encode a [`Payload`] while they hold whatever lock guards the
//! in-memory state, release it, and only then hand the payload to the store.
//! Every write is all-or-nothing: file backends write to a temp file in the
//! target directory and rename it into place.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: Payload, ArchiveSummary and archive naming
//! - [`traits`]: ProfileStorage trait definition
//! - [`file`]: JsonFileStore implementation (data directory layout)
//! - [`memory`]: InMemoryStore implementation

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use error::StorageError;
pub use file::JsonFileStore;
pub use memory::InMemoryStore;
pub use traits::ProfileStorage;
pub use types::{validate_archive_name, ArchiveSummary, Payload};
