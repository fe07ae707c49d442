//! HTTP/JSON API for the ProfilerX profiling engine.
//!
//! Exposes the query surface a monitoring dashboard consumes (stats,
//! archives, method statistics) and an ingestion surface for hosts that
//! report workflow and node events over HTTP instead of linking the engine.
//! Every route lives under `/profilerx`.

pub mod error;
pub mod handlers;
pub mod router;
pub mod schema;
pub mod state;
