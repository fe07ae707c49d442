//! Core data model for the ProfilerX compute-graph profiler.
//!
//! Defines the profile records produced while a host engine executes
//! workflows ([`WorkflowProfile`], [`NodeProfile`]), the incremental
//! [`RollingAverage`] accumulator, method-trace records, and the two
//! injectable capabilities the engine samples from: a [`Clock`] and a
//! [`MemorySampler`].
//!
//! This crate holds no locks and does no I/O; it is shared by the storage,
//! engine, server and CLI crates.

pub mod average;
pub mod clock;
pub mod error;
pub mod profile;
pub mod sampler;
pub mod trace;
pub mod value;

// Re-export commonly used types
pub use average::{AverageTable, RollingAverage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, SamplerError};
pub use profile::{NodeProfile, ShapeMap, WorkflowProfile, WorkflowStatus};
pub use sampler::{FixedSampler, MemorySample, MemorySampler, NullSampler, ProcessSampler};
pub use trace::{CallContext, ExecutionTrace, MethodCallRecord, MethodStats, TraceLog};
pub use value::{NodeIo, NodeValue};
