use agentlens_index::TraceIndex;
use agentlens_resolver::Resolver;
use agentlens_server::{build_router, AppState};
use agentlens_types::{Config, LogType, SessionLogDirectory};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn write_codex_fixture(dir: &Path) {
    let content = concat!(
        r#"{"timestamp":"2026-01-05T10:00:00Z","type":"session_meta","payload":{"id":"sess-1","cwd":"/tmp/project"}}"#,
        "\n",
        r#"{"timestamp":"2026-01-05T10:00:01Z","type":"response_item","payload":{"type":"function_call","name":"run_command","call_id":"call_1","arguments":"{\"command\":\"echo hi\"}"}}"#,
        "\n",
        r#"{"timestamp":"2026-01-05T10:00:02Z","type":"response_item","payload":{"type":"function_call_output","call_id":"call_1","output":"hi"}}"#,
        "\n",
    );
    std::fs::write(dir.join("rollout.jsonl"), content).unwrap();
}

async fn app_with_fixture(dir: &Path) -> (Router, Arc<TraceIndex>) {
    let config = Config {
        session_log_directories: vec![SessionLogDirectory::Typed {
            directory: dir.to_string_lossy().into_owned(),
            log_type: LogType::Codex,
        }],
        ..Default::default()
    };
    let index = Arc::new(TraceIndex::new(config).unwrap());
    index.refresh_once(true).await;
    let state = AppState::new(index.clone(), Arc::new(Resolver::system()));
    (build_router(state), index)
}

#[tokio::test]
async fn test_healthz() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _index) = app_with_fixture(dir.path()).await;

    let response = app
        .oneshot(Request::get("/api/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);
}

#[tokio::test]
async fn test_traces_listing_and_agent_filter() {
    let dir = tempfile::tempdir().unwrap();
    write_codex_fixture(dir.path());
    let (app, _index) = app_with_fixture(dir.path()).await;

    let response = app
        .clone()
        .oneshot(Request::get("/api/traces").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["traces"].as_array().unwrap().len(), 1);
    assert_eq!(body["traces"][0]["agent"], "codex");
    assert_eq!(body["traces"][0]["session_id"], "sess-1");

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/traces?agent=claude")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["traces"].as_array().unwrap().len(), 0);

    let response = app
        .oneshot(
            Request::get("/api/traces?agent=martian")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trace_page_by_trace_and_session_id() {
    let dir = tempfile::tempdir().unwrap();
    write_codex_fixture(dir.path());
    let (app, index) = app_with_fixture(dir.path()).await;
    let trace_id = index.get_summaries(None, 1).await[0].id.clone();

    for id in [trace_id.as_str(), "sess-1"] {
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/trace/{}?include_meta=true", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "id {}", id);
        let body = body_json(response).await;
        assert_eq!(body["summary"]["session_id"], "sess-1");
        assert_eq!(body["events"].as_array().unwrap().len(), 3);
        assert_eq!(body["toc"].as_array().unwrap().len(), 3);
    }
}

#[tokio::test]
async fn test_unknown_trace_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _index) = app_with_fixture(dir.path()).await;

    let response = app
        .oneshot(
            Request::get("/api/trace/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["ok"], false);
    assert!(body["error"].as_str().unwrap().contains("unknown trace"));
}

#[tokio::test]
async fn test_input_validation() {
    let dir = tempfile::tempdir().unwrap();
    write_codex_fixture(dir.path());
    let (app, index) = app_with_fixture(dir.path()).await;
    let trace_id = index.get_summaries(None, 1).await[0].id.clone();

    // Empty text
    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/api/trace/{}/input", trace_id))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"text": ""}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Oversized text
    let long = "x".repeat(2001);
    let response = app
        .oneshot(
            Request::post(format!("/api/trace/{}/input", trace_id))
                .header("content-type", "application/json")
                .body(Body::from(format!(r#"{{"text": "{}"}}"#, long)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_overview_and_perf() {
    let dir = tempfile::tempdir().unwrap();
    write_codex_fixture(dir.path());
    let (app, _index) = app_with_fixture(dir.path()).await;

    let response = app
        .clone()
        .oneshot(Request::get("/api/overview").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["overview"]["trace_count"], 1);
    assert_eq!(body["overview"]["event_count"], 3);

    let response = app
        .oneshot(Request::get("/api/perf").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["perf"]["refresh_count"], 1);
    assert_eq!(body["perf"]["tracked_files"], 1);
}

#[tokio::test]
async fn test_config_roundtrip_and_merge() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _index) = app_with_fixture(dir.path()).await;

    let response = app
        .clone()
        .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["config"]["scan"]["interval_seconds"], 5);

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/config")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"scan": {"interval_seconds": 42}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["config"]["scan"]["interval_seconds"], 42);
    // Untouched sections survive the merge
    assert_eq!(body["config"]["redaction"]["always_on"], true);
}
