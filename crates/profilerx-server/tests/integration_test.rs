//! End-to-end tests for the ProfilerX HTTP API.
//!
//! Requests go through the full stack (router -> handler -> engine ->
//! storage) via `tower::ServiceExt::oneshot`, without binding a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

use profilerx_core::{NullSampler, SystemClock};
use profilerx_engine::{HostAdapter, ProfilerConfig};
use profilerx_server::router::build_router;
use profilerx_server::state::AppState;
use profilerx_storage::{InMemoryStore, ProfileStorage};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn test_app() -> Router {
    build_router(AppState::in_memory())
}

/// A router plus direct access to its storage.
fn test_app_with_storage() -> (Router, Arc<InMemoryStore>) {
    let storage = Arc::new(InMemoryStore::new());
    let adapter = HostAdapter::with_parts(
        &ProfilerConfig::default(),
        storage.clone(),
        Arc::new(NullSampler),
        Arc::new(SystemClock),
    );
    (build_router(AppState::with_adapter(adapter)), storage)
}

async fn request_json(
    app: &Router,
    method: &str,
    path: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap_or(json!(null));
    (status, json)
}

async fn post_json(
    app: &Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    request_json(app, "POST", path, Some(body)).await
}

async fn post_empty(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    request_json(app, "POST", path, None).await
}

async fn get_json(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    request_json(app, "GET", path, None).await
}

/// Runs one workflow with a single node through the ingestion routes.
async fn run_workflow(app: &Router, prompt_id: &str, cache_hit: bool) {
    let (status, _) = post_empty(app, &format!("/profilerx/workflows/{}/start", prompt_id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = post_json(
        app,
        &format!("/profilerx/workflows/{}/nodes/n1/start", prompt_id),
        json!({ "node_type": "KSampler", "inputs": { "latent": { "shape": [1, 4, 64, 64] } } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "start node failed: {:?}", body);
    let (status, _) = post_json(
        app,
        &format!("/profilerx/workflows/{}/nodes/n1/end", prompt_id),
        json!({ "outputs": [{ "shape": [1, 3, 512, 512] }], "cache_hit": cache_hit }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = post_empty(app, &format!("/profilerx/workflows/{}/end", prompt_id)).await;
    assert_eq!(status, StatusCode::OK, "end workflow failed: {:?}", body);
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_of_fresh_engine_are_empty() {
    let app = test_app();
    let (status, body) = get_json(&app, "/profilerx/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], json!({}));
    assert_eq!(body["latest"], json!(null));
    assert_eq!(body["history"], json!([]));
    assert_eq!(body["workflow_averages"]["count"], 0);
}

#[tokio::test]
async fn ingested_workflow_shows_in_stats() {
    let app = test_app();
    run_workflow(&app, "p1", false).await;

    let (_, body) = get_json(&app, "/profilerx/stats").await;
    let latest = &body["latest"];
    assert_eq!(latest["promptId"], "p1");
    assert_eq!(latest["status"], "completed");
    assert_eq!(latest["cacheMisses"], 1);
    assert_eq!(latest["cacheHits"], 0);
    assert_eq!(latest["nodes"]["n1"]["inputSizes"]["latent"], json!([1, 4, 64, 64]));
    assert_eq!(latest["nodes"]["n1"]["outputSizes"]["output_0"], json!([1, 3, 512, 512]));
    assert_eq!(body["node_averages"]["KSampler"]["count"], 1);
    assert_eq!(body["workflow_averages"]["count"], 1);
    assert_eq!(body["history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn active_workflow_is_current() {
    let app = test_app();
    post_empty(&app, "/profilerx/workflows/live/start").await;
    let (_, body) = get_json(&app, "/profilerx/stats").await;
    assert_eq!(body["current"]["live"]["status"], "active");
}

// ---------------------------------------------------------------------------
// Ingestion edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ending_unknown_workflow_is_404() {
    let app = test_app();
    let (status, body) = post_empty(&app, "/profilerx/workflows/ghost/end").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn unknown_node_events_are_accepted_no_ops() {
    let app = test_app();
    let (status, _) = post_json(
        &app,
        "/profilerx/workflows/ghost/nodes/n/end",
        json!({ "cache_hit": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_json(
        &app,
        "/profilerx/workflows/ghost/nodes/n/error",
        json!({ "message": "boom" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_node_values_are_rejected() {
    let app = test_app();
    post_empty(&app, "/profilerx/workflows/p/start").await;
    let (status, body) = post_json(
        &app,
        "/profilerx/workflows/p/nodes/n/start",
        json!({ "node_type": "T", "inputs": 42 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn abort_closes_workflow() {
    let app = test_app();
    post_empty(&app, "/profilerx/workflows/p/start").await;
    post_json(
        &app,
        "/profilerx/workflows/p/nodes/n/start",
        json!({ "node_type": "VAEDecode" }),
    )
    .await;
    post_json(
        &app,
        "/profilerx/workflows/p/nodes/n/error",
        json!({ "message": "CUDA out of memory" }),
    )
    .await;

    let (status, body) = post_json(
        &app,
        "/profilerx/workflows/p/abort",
        json!({ "reason": "client disconnected" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "aborted");
    assert_eq!(body["abortReason"], "client disconnected");
    assert_eq!(body["nodes"]["n"]["error"], "CUDA out of memory");

    let (status, _) = post_json(&app, "/profilerx/workflows/p/abort", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn abort_without_body_uses_default_reason() {
    let app = test_app();
    post_empty(&app, "/profilerx/workflows/p/start").await;

    let (status, body) = post_empty(&app, "/profilerx/workflows/p/abort").await;
    assert_eq!(status, StatusCode::OK, "abort failed: {:?}", body);
    assert_eq!(body["status"], "aborted");
    assert_eq!(body["abortReason"], "aborted by client");

    let (status, body) = post_json(&app, "/profilerx/workflows/q/abort", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

// ---------------------------------------------------------------------------
// Archives
// ---------------------------------------------------------------------------

#[tokio::test]
async fn archiving_empty_history_fails() {
    let app = test_app();
    let (status, body) = post_empty(&app, "/profilerx/archive").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn archive_list_load_delete_flow() {
    let app = test_app();
    run_workflow(&app, "first", false).await;

    let (status, body) = post_empty(&app, "/profilerx/archive").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let first_archive = body["archive"].as_str().unwrap().to_string();
    assert!(first_archive.starts_with("profiling_history_"));

    let (_, stats) = get_json(&app, "/profilerx/stats").await;
    assert_eq!(stats["history"], json!([]));

    run_workflow(&app, "second", true).await;

    let (status, body) = post_empty(&app, &format!("/profilerx/archive/{}/load", first_archive)).await;
    assert_eq!(status, StatusCode::OK, "load failed: {:?}", body);
    assert_eq!(body, json!({ "success": true }));

    let (_, stats) = get_json(&app, "/profilerx/stats").await;
    assert_eq!(stats["latest"]["promptId"], "first");

    let (status, list) = get_json(&app, "/profilerx/archives").await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    let second_archive = list[0]["name"].as_str().unwrap().to_string();
    assert_ne!(second_archive, first_archive);
    assert!(list[0]["size"].as_u64().unwrap() > 0);
    assert!(list[0]["created"].is_number());
    assert!(list[0]["modified"].is_number());

    let (status, body) = request_json(
        &app,
        "DELETE",
        &format!("/profilerx/archive/{}", second_archive),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, list) = get_json(&app, "/profilerx/archives").await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn loading_bad_archives_is_400_and_harmless() {
    let (app, storage) = test_app_with_storage();
    run_workflow(&app, "keep", false).await;
    storage.insert_archive_raw("broken.json", "{\"nope\": true}").unwrap();

    let (status, body) = post_empty(&app, "/profilerx/archive/broken.json/load").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = post_empty(&app, "/profilerx/archive/missing.json/load").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stats) = get_json(&app, "/profilerx/stats").await;
    assert_eq!(stats["latest"]["promptId"], "keep");
    assert_eq!(storage.list_archives().unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_missing_archive_is_400() {
    let app = test_app();
    let (status, body) = request_json(&app, "DELETE", "/profilerx/archive/nothing.json", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = request_json(&app, "DELETE", "/profilerx/archive/notes.txt", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Method statistics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn method_stats_reflect_tracer() {
    let adapter = HostAdapter::with_parts(
        &ProfilerConfig::default().with_tracing(true),
        Arc::new(InMemoryStore::new()),
        Arc::new(NullSampler),
        Arc::new(SystemClock),
    );
    adapter.tracer().trace("execute", Some("PromptExecutor"), || ());
    let app = build_router(AppState::with_adapter(adapter.clone()));

    let (status, body) = get_json(&app, "/profilerx/methods").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["PromptExecutor.execute"]["total_calls"], 1);

    adapter.tracer().disable();
    let (_, body) = get_json(&app, "/profilerx/methods").await;
    assert_eq!(body, json!({}));
}

// ---------------------------------------------------------------------------
// File-backed state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_backed_state_persists_and_recovers() {
    let dir = TempDir::new().unwrap();
    let config = ProfilerConfig::default().with_data_dir(dir.path());

    let app = build_router(AppState::new(&config).unwrap());
    run_workflow(&app, "durable", false).await;
    assert!(dir.path().join("profiling_history.json").is_file());

    let (status, body) = post_empty(&app, "/profilerx/archive").await;
    assert_eq!(status, StatusCode::OK);
    let archive = body["archive"].as_str().unwrap().to_string();
    assert!(dir.path().join("archives").join(&archive).is_file());
    run_workflow(&app, "after", false).await;
    drop(app);

    let reopened = build_router(AppState::new(&config).unwrap());
    let (_, stats) = get_json(&reopened, "/profilerx/stats").await;
    assert_eq!(stats["history"].as_array().unwrap().len(), 1);
    assert_eq!(stats["latest"]["promptId"], "after");
    let (_, list) = get_json(&reopened, "/profilerx/archives").await;
    assert_eq!(list[0]["name"], archive.as_str());
}
