//! Router assembly for the ProfilerX HTTP API.
//!
//! [`build_router`] wires all handler functions to their routes with CORS
//! and tracing middleware layers.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the complete axum router.
///
/// Routes use axum 0.8 `/{param}` path syntax. CORS is permissive so a
/// dashboard served from another origin can poll it.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Queries
        .route("/profilerx/stats", get(handlers::stats::get_stats))
        .route("/profilerx/methods", get(handlers::stats::get_methods))
        // Archives
        .route("/profilerx/archives", get(handlers::archives::list_archives))
        .route("/profilerx/archive", post(handlers::archives::create_archive))
        .route(
            "/profilerx/archive/{name}/load",
            post(handlers::archives::load_archive),
        )
        .route(
            "/profilerx/archive/{name}",
            delete(handlers::archives::delete_archive),
        )
        // Ingestion
        .route(
            "/profilerx/workflows/{id}/start",
            post(handlers::ingest::start_workflow),
        )
        .route(
            "/profilerx/workflows/{id}/end",
            post(handlers::ingest::end_workflow),
        )
        .route(
            "/profilerx/workflows/{id}/abort",
            post(handlers::ingest::abort_workflow),
        )
        .route(
            "/profilerx/workflows/{id}/nodes/{node}/start",
            post(handlers::ingest::start_node),
        )
        .route(
            "/profilerx/workflows/{id}/nodes/{node}/end",
            post(handlers::ingest::end_node),
        )
        .route(
            "/profilerx/workflows/{id}/nodes/{node}/error",
            post(handlers::ingest::record_error),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
