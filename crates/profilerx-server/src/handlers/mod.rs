//! HTTP handler modules.
//!
//! Handlers are thin: extract, delegate to the engine through
//! [`HostAdapter`](profilerx_engine::HostAdapter), and return JSON.

pub mod archives;
pub mod ingest;
pub mod stats;
