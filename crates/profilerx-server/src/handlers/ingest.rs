//! Workflow and node event ingestion handlers.
//!
//! Unknown workflow or node ids are no-ops on the node routes, exactly as
//! for in-process hosts; only closing a workflow reports 404.

use axum::extract::{Path, State};
use axum::Json;

use profilerx_core::WorkflowProfile;

use crate::error::ApiError;
use crate::schema::archives::SuccessResponse;
use crate::schema::ingest::{
    node_io, AbortRequest, EndNodeRequest, RecordErrorRequest, StartNodeRequest,
};
use crate::state::AppState;

const DEFAULT_ABORT_REASON: &str = "aborted by client";

/// `POST /profilerx/workflows/{id}/start`
pub async fn start_workflow(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> Json<SuccessResponse> {
    state.adapter.start_workflow(&prompt_id);
    Json(SuccessResponse::ok())
}

/// `POST /profilerx/workflows/{id}/end`
pub async fn end_workflow(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> Result<Json<WorkflowProfile>, ApiError> {
    state
        .adapter
        .end_workflow(&prompt_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("workflow {} is not active", prompt_id)))
}

/// The body is optional; without one the default reason is used.
///
/// `POST /profilerx/workflows/{id}/abort`
pub async fn abort_workflow(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
    body: Option<Json<AbortRequest>>,
) -> Result<Json<WorkflowProfile>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let reason = req.reason.as_deref().unwrap_or(DEFAULT_ABORT_REASON);
    state
        .adapter
        .abort_workflow(&prompt_id, reason)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("workflow {} is not active", prompt_id)))
}

/// `POST /profilerx/workflows/{id}/nodes/{node}/start`
pub async fn start_node(
    State(state): State<AppState>,
    Path((prompt_id, node_id)): Path<(String, String)>,
    Json(req): Json<StartNodeRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let inputs = node_io(&req.inputs)?;
    state
        .adapter
        .start_node(&prompt_id, &node_id, &req.node_type, &inputs);
    Ok(Json(SuccessResponse::ok()))
}

/// `POST /profilerx/workflows/{id}/nodes/{node}/end`
pub async fn end_node(
    State(state): State<AppState>,
    Path((prompt_id, node_id)): Path<(String, String)>,
    Json(req): Json<EndNodeRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let outputs = node_io(&req.outputs)?;
    state
        .adapter
        .end_node(&prompt_id, &node_id, &outputs, req.cache_hit);
    Ok(Json(SuccessResponse::ok()))
}

/// `POST /profilerx/workflows/{id}/nodes/{node}/error`
pub async fn record_error(
    State(state): State<AppState>,
    Path((prompt_id, node_id)): Path<(String, String)>,
    Json(req): Json<RecordErrorRequest>,
) -> Json<SuccessResponse> {
    state
        .adapter
        .record_error(&prompt_id, &node_id, &req.message);
    Json(SuccessResponse::ok())
}
