//! Binary entrypoint for the ProfilerX HTTP server.
//!
//! Reads the engine configuration from `PROFILERX_*` environment variables
//! (see `profilerx_engine::config`) plus:
//! - `PROFILERX_PORT`: listen port (default: "8189")
//! - `PROFILERX_LOG`: tracing filter (default: "profilerx=info,tower_http=info")

use std::process;

use tracing_subscriber::EnvFilter;

use profilerx_engine::ProfilerConfig;
use profilerx_server::router::build_router;
use profilerx_server::state::AppState;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_env("PROFILERX_LOG")
        .unwrap_or_else(|_| EnvFilter::new("profilerx=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let port = std::env::var("PROFILERX_PORT").unwrap_or_else(|_| "8189".to_string());

    let config = match ProfilerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            process::exit(2);
        }
    };
    let state = match AppState::new(&config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize profiler");
            process::exit(1);
        }
    };

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!(data_dir = %config.data_dir.display(), "profilerx server starting on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind {}", addr);
            process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server stopped");
        process::exit(1);
    }
}
