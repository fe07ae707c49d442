//! The ProfilerX profiling engine.
//!
//! Owns the in-flight and closed workflow profiles, the rolling-average
//! tables, history archiving, and the method-call tracer. Hosts talk to it
//! through [`HostAdapter`], which guarantees that no instrumentation fault
//! ever reaches the host's own execution.
//!
//! # Modules
//!
//! - [`config`]: ProfilerConfig, read from `PROFILERX_*` environment variables
//! - [`error`]: EngineError
//! - [`store`]: ProfileStore (workflow/node lifecycle, history, averages)
//! - [`archive`]: archive operations on ProfileStore
//! - [`tracer`]: MethodCallTracer (per-thread call stacks, method stats)
//! - [`adapter`]: HostAdapter ingestion facade

pub mod adapter;
pub mod archive;
pub mod config;
pub mod error;
pub mod store;
pub mod tracer;

pub use adapter::{HostAdapter, NodeOutcome};
pub use config::{ProfilerConfig, SamplerKind};
pub use error::EngineError;
pub use store::{ProfileStore, StatsSnapshot, WORKFLOW_LABEL};
pub use tracer::MethodCallTracer;
