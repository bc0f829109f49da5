mod error;
mod handlers;

pub use error::ApiError;

use agentlens_index::TraceIndex;
use agentlens_resolver::Resolver;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Heartbeat cadence on /api/stream
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Cap on concurrent resolver invocations so a burst of stop/open calls
/// does not fork an unbounded number of lsof/ps subprocesses
const RESOLVER_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<TraceIndex>,
    pub resolver: Arc<Resolver>,
    pub resolver_gate: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(index: Arc<TraceIndex>, resolver: Arc<Resolver>) -> Self {
        Self {
            index,
            resolver,
            resolver_gate: Arc::new(tokio::sync::Semaphore::new(RESOLVER_CONCURRENCY)),
        }
    }
}

/// The versionless local-only API surface.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/healthz", get(handlers::healthz))
        .route("/api/overview", get(handlers::overview))
        .route("/api/perf", get(handlers::perf))
        .route("/api/traces", get(handlers::traces))
        .route("/api/trace/{id}", get(handlers::trace_page))
        .route("/api/trace/{id}/stop", post(handlers::stop_trace))
        .route("/api/trace/{id}/open", post(handlers::open_trace))
        .route("/api/trace/{id}/input", post(handlers::input_trace))
        .route(
            "/api/config",
            get(handlers::get_config).post(handlers::post_config),
        )
        .route("/api/stream", get(handlers::stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodic heartbeat frames for stream subscribers. Runs until the
/// index shuts down.
pub async fn run_heartbeat(index: Arc<TraceIndex>) {
    let mut shutdown = index.shutdown_signal();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                index.heartbeat().await;
            }
            _ = shutdown.changed() => break,
        }
    }
}
