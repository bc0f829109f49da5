use agentlens_resolver::{InputStatus, OpenStatus, StopStatus};
use agentlens_types::{Agent, Config};
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ApiError;
use crate::AppState;

const TRACES_DEFAULT_LIMIT: usize = 50;
const TRACES_LIMIT_CAP: usize = 5000;
const INPUT_TEXT_MAX_CHARS: usize = 2000;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub async fn overview(State(state): State<AppState>) -> Json<Value> {
    let overview = state.index.overview().await;
    Json(json!({ "overview": overview }))
}

pub async fn perf(State(state): State<AppState>) -> Json<Value> {
    let perf = state.index.performance_stats().await;
    Json(json!({ "perf": perf }))
}

#[derive(Debug, Deserialize)]
pub struct TracesQuery {
    agent: Option<String>,
    limit: Option<usize>,
}

pub async fn traces(
    State(state): State<AppState>,
    Query(query): Query<TracesQuery>,
) -> Result<Json<Value>, ApiError> {
    let agent = match &query.agent {
        Some(raw) => Some(
            raw.parse::<Agent>()
                .map_err(|e| ApiError::bad_request(e))?,
        ),
        None => None,
    };
    let limit = query
        .limit
        .unwrap_or(TRACES_DEFAULT_LIMIT)
        .min(TRACES_LIMIT_CAP);
    let traces = state.index.get_summaries(agent, limit).await;
    Ok(Json(json!({ "traces": traces })))
}

#[derive(Debug, Deserialize)]
pub struct TracePageQuery {
    limit: Option<usize>,
    before: Option<u64>,
    include_meta: Option<bool>,
}

pub async fn trace_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TracePageQuery>,
) -> Result<Json<Value>, ApiError> {
    let trace_id = state.index.resolve_id(&id).await?;
    let config = state.index.config().await;
    let include_meta = query
        .include_meta
        .unwrap_or(config.trace_inspector.include_meta_default);
    let limit = query.limit.unwrap_or(config.scan.recent_event_window);
    let page = state
        .index
        .get_trace_page(&trace_id, limit, query.before, include_meta)
        .await?;
    Ok(Json(serde_json::to_value(&page).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct StopQuery {
    force: Option<bool>,
}

pub async fn stop_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StopQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let trace_id = state.index.resolve_id(&id).await?;
    let (summary, session_cwd) = state.index.resolver_view(&trace_id).await?;
    let force = query.force.unwrap_or(false);

    let _permit = state.resolver_gate.acquire().await;
    let resolver = state.resolver.clone();
    let report = tokio::task::spawn_blocking(move || {
        let pids = resolver.resolve_pids(&summary, &session_cwd);
        resolver.stop(&pids, force)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    match report.status {
        StopStatus::Terminated => {
            // Force idle until newer file activity outruns this moment
            state.index.set_manual_stop(&trace_id, now_ms());
            Ok(Json(json!({ "ok": true, "result": report })))
        }
        StopStatus::NotRunning => Err(ApiError::conflict("not_running")),
        StopStatus::Failed => Err(ApiError::internal(report.reason)),
    }
}

pub async fn open_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let trace_id = state.index.resolve_id(&id).await?;
    let (summary, session_cwd) = state.index.resolver_view(&trace_id).await?;

    let _permit = state.resolver_gate.acquire().await;
    let resolver = state.resolver.clone();
    let report = tokio::task::spawn_blocking(move || {
        let pids = resolver.resolve_pids(&summary, &session_cwd);
        resolver.open(&pids)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    match report.status {
        OpenStatus::FocusedPane | OpenStatus::GhosttyActivated => {
            Ok(Json(json!({ "ok": true, "result": report })))
        }
        OpenStatus::NotResolvable => Err(ApiError::conflict("not_resolvable")),
        OpenStatus::Failed => Err(ApiError::internal(report.reason)),
    }
}

#[derive(Debug, Deserialize)]
pub struct InputBody {
    text: String,
    #[serde(default)]
    submit: bool,
}

pub async fn input_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<InputBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.text.is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }
    if body.text.chars().count() > INPUT_TEXT_MAX_CHARS {
        return Err(ApiError::bad_request(format!(
            "text exceeds {} chars",
            INPUT_TEXT_MAX_CHARS
        )));
    }

    let trace_id = state.index.resolve_id(&id).await?;
    let (summary, session_cwd) = state.index.resolver_view(&trace_id).await?;

    let _permit = state.resolver_gate.acquire().await;
    let resolver = state.resolver.clone();
    let report = tokio::task::spawn_blocking(move || {
        let pids = resolver.resolve_pids(&summary, &session_cwd);
        resolver.send_input(&pids, &body.text, body.submit)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    match report.status {
        InputStatus::SentTmux => Ok(Json(json!({ "ok": true, "result": report }))),
        InputStatus::NotResolvable => Err(ApiError::conflict("not_resolvable")),
        InputStatus::Failed => Err(ApiError::internal(report.reason)),
    }
}

pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let config = state.index.config().await;
    Json(json!({ "config": config }))
}

/// Merge-write: the posted object is deep-merged over the current
/// configuration, then the whole result is validated and swapped in.
pub async fn post_config(
    State(state): State<AppState>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let current = state.index.config().await;
    let mut merged = serde_json::to_value(&current)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    deep_merge(&mut merged, patch);
    let next: Config = serde_json::from_value(merged)
        .map_err(|e| ApiError::bad_request(format!("invalid config: {}", e)))?;
    state
        .index
        .update_config(next.clone())
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "ok": true, "config": next })))
}

fn deep_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// `GET /api/stream`: snapshot first, typed envelopes after, heartbeats
/// while idle. Dropping the connection drops the subscriber queue.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscriber_id, rx) = state.index.subscribe().await;
    tracing::debug!(subscriber = %subscriber_id, "stream opened");

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let envelope = rx.recv().await?;
        let event = Event::default()
            .event(envelope.kind.as_str())
            .data(serde_json::to_string(&envelope).unwrap_or_default());
        Some((Ok::<_, Infallible>(event), rx))
    });

    Sse::new(stream)
}
