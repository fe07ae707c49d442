//! Stats and method-statistics handlers.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;

use profilerx_core::MethodStats;
use profilerx_engine::StatsSnapshot;

use crate::state::AppState;

/// Current stats snapshot.
///
/// `GET /profilerx/stats`
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.adapter.store().get_stats())
}

/// Per-method tracer statistics (empty while tracing is disabled).
///
/// `GET /profilerx/methods`
pub async fn get_methods(State(state): State<AppState>) -> Json<BTreeMap<String, MethodStats>> {
    Json(state.adapter.tracer().method_stats())
}
