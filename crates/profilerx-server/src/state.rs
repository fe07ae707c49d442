//! Application state shared by all handlers.

use std::sync::Arc;

use profilerx_core::{NullSampler, SystemClock};
use profilerx_engine::{HostAdapter, ProfilerConfig};
use profilerx_storage::InMemoryStore;

use crate::error::ApiError;

/// Shared application state for the HTTP server.
///
/// The engine synchronizes internally, so the adapter is shared as-is; every
/// engine call is a short critical section and is made directly from the
/// handler.
#[derive(Clone)]
pub struct AppState {
    pub adapter: HostAdapter,
}

impl AppState {
    /// Opens the file-backed engine described by `config`.
    pub fn new(config: &ProfilerConfig) -> Result<Self, ApiError> {
        Ok(AppState {
            adapter: HostAdapter::open(config)?,
        })
    }

    /// An engine with in-memory storage, zero memory readings and tracing
    /// enabled (for testing).
    pub fn in_memory() -> Self {
        let config = ProfilerConfig::default().with_tracing(true);
        let adapter = HostAdapter::with_parts(
            &config,
            Arc::new(InMemoryStore::new()),
            Arc::new(NullSampler),
            Arc::new(SystemClock),
        );
        AppState { adapter }
    }

    pub fn with_adapter(adapter: HostAdapter) -> Self {
        AppState { adapter }
    }
}
