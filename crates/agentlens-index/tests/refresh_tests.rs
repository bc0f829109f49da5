use agentlens_index::TraceIndex;
use agentlens_types::{
    Agent, Config, EnvelopeKind, EventKind, LogType, SessionLogDirectory,
};
use std::io::Write;
use std::path::Path;

fn config_for(dir: &Path, log_type: LogType) -> Config {
    Config {
        session_log_directories: vec![SessionLogDirectory::Typed {
            directory: dir.to_string_lossy().into_owned(),
            log_type,
        }],
        ..Default::default()
    }
}

fn write_codex_basic(path: &Path) {
    let content = concat!(
        r#"{"timestamp":"2026-01-05T10:00:00Z","type":"session_meta","payload":{"id":"sess-1","cwd":"/tmp/project"}}"#,
        "\n",
        r#"{"timestamp":"2026-01-05T10:00:01Z","type":"response_item","payload":{"type":"function_call","id":"fc_1","name":"run_command","call_id":"call_1","arguments":"{\"command\":\"echo hi\"}"}}"#,
        "\n",
        r#"{"timestamp":"2026-01-05T10:00:02Z","type":"response_item","payload":{"type":"function_call_output","call_id":"call_1","output":"hi"}}"#,
        "\n",
    );
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_codex_basic_summary_and_linkage() {
    let dir = tempfile::tempdir().unwrap();
    write_codex_basic(&dir.path().join("rollout.jsonl"));

    let index = TraceIndex::new(config_for(dir.path(), LogType::Codex)).unwrap();
    index.refresh_once(true).await;

    let summaries = index.get_summaries(None, 50).await;
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.agent, Agent::Codex);
    assert_eq!(summary.session_id, "sess-1");
    assert_eq!(summary.event_count, 3);
    assert_eq!(summary.tool_use_count, 1);
    assert_eq!(summary.tool_result_count, 1);
    assert_eq!(summary.unmatched_tool_uses, 0);
    assert_eq!(summary.unmatched_tool_results, 0);
    assert_eq!(summary.event_kind_counts.sum(), summary.event_count);

    let page = index
        .get_trace_page(&summary.id, 50, None, true)
        .await
        .unwrap();
    let tool_use = page
        .events
        .iter()
        .find(|e| e.event_kind == EventKind::ToolUse)
        .unwrap();
    assert_eq!(tool_use.tool_name, "run_command");
    assert_eq!(tool_use.tool_call_id, "call_1");
    assert_eq!(tool_use.tool_type, "bash");
    assert!(tool_use.tool_args_text.contains("echo hi"));

    let tool_result = page
        .events
        .iter()
        .find(|e| e.event_kind == EventKind::ToolResult)
        .unwrap();
    assert_eq!(tool_result.tool_call_id, "call_1");
    assert_eq!(tool_result.tool_result_text, "hi");

    let toc_row = page
        .toc
        .iter()
        .find(|r| r.event_kind == EventKind::ToolUse)
        .unwrap();
    assert_eq!(toc_row.label, "Tool: run_command");
}

#[tokio::test]
async fn test_resolve_by_session_id() {
    let dir = tempfile::tempdir().unwrap();
    write_codex_basic(&dir.path().join("rollout.jsonl"));

    let index = TraceIndex::new(config_for(dir.path(), LogType::Codex)).unwrap();
    index.refresh_once(true).await;

    let summaries = index.get_summaries(None, 50).await;
    let trace_id = summaries[0].id.clone();

    assert_eq!(index.resolve_id(&trace_id).await.unwrap(), trace_id);
    assert_eq!(index.resolve_id("sess-1").await.unwrap(), trace_id);
    assert!(index.resolve_id("missing").await.is_err());
}

#[tokio::test]
async fn test_incremental_append_counts_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.jsonl");
    let head = concat!(
        r#"{"type":"session","id":"pi-1","cwd":"/w","timestamp":"2026-03-01T09:00:00Z"}"#,
        "\n",
        r#"{"type":"message","timestamp":"2026-03-01T09:00:01Z","message":{"role":"user","content":[{"type":"text","text":"go"}]}}"#,
        "\n",
        r#"{"type":"message","timestamp":"2026-03-01T09:00:10Z","message":{"role":"assistant","model":"pi-fast","content":[{"type":"text","text":"ok"}],"usage":{"input":4030,"output":43,"total":4073,"cost":{"total":0.021225}}}}"#,
        "\n",
    );
    std::fs::write(&path, head).unwrap();

    let index = TraceIndex::new(config_for(dir.path(), LogType::Pi)).unwrap();
    index.refresh_once(true).await;

    let before = index.performance_stats().await;
    assert_eq!(before.incremental_append_count, 0);
    assert_eq!(before.tracked_files, 1);

    // Live append of a second assistant message
    let appended = concat!(
        r#"{"type":"message","timestamp":"2026-03-01T09:01:00Z","message":{"role":"assistant","model":"pi-fast","content":[{"type":"text","text":"done"}],"usage":{"input":1,"output":33,"cacheWrite":4180,"total":4214,"cost":{"total":0.026955}}}}"#,
        "\n",
    );
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(appended.as_bytes()).unwrap();
    drop(file);

    index.refresh_once(false).await;

    let perf = index.performance_stats().await;
    assert!(perf.incremental_append_count >= 1);

    let summaries = index.get_summaries(None, 50).await;
    let summary = &summaries[0];
    assert_eq!(summary.token_totals.total_tokens, 8287);
    let cost = summary.cost_estimate_usd.unwrap();
    assert!((cost - 0.04818).abs() < 1e-6, "cost {}", cost);
}

#[tokio::test]
async fn test_trace_removed_when_file_disappears() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rollout.jsonl");
    write_codex_basic(&path);

    let index = TraceIndex::new(config_for(dir.path(), LogType::Codex)).unwrap();
    index.refresh_once(true).await;
    assert_eq!(index.get_summaries(None, 50).await.len(), 1);

    std::fs::remove_file(&path).unwrap();
    index.refresh_once(true).await;
    assert_eq!(index.get_summaries(None, 50).await.len(), 0);
    assert_eq!(index.overview().await.trace_count, 0);
}

#[tokio::test]
async fn test_stream_snapshot_then_updates() {
    let dir = tempfile::tempdir().unwrap();
    let index = TraceIndex::new(config_for(dir.path(), LogType::Codex)).unwrap();
    index.refresh_once(true).await;

    let (_id, mut rx) = index.subscribe().await;
    let first = rx.recv().await.unwrap();
    assert_eq!(first.kind, EnvelopeKind::Snapshot);

    write_codex_basic(&dir.path().join("rollout.jsonl"));
    index.refresh_once(true).await;

    let second = rx.recv().await.unwrap();
    assert_eq!(second.kind, EnvelopeKind::TraceAdded);
    // Overview follows the trace envelopes of the batch
    let third = rx.recv().await.unwrap();
    assert_eq!(third.kind, EnvelopeKind::OverviewUpdated);
}

#[tokio::test]
async fn test_page_excludes_meta_and_pages_backwards() {
    let dir = tempfile::tempdir().unwrap();
    write_codex_basic(&dir.path().join("rollout.jsonl"));

    let index = TraceIndex::new(config_for(dir.path(), LogType::Codex)).unwrap();
    index.refresh_once(true).await;
    let trace_id = index.get_summaries(None, 1).await[0].id.clone();

    // session_meta is the only meta event in the fixture
    let without_meta = index
        .get_trace_page(&trace_id, 50, None, false)
        .await
        .unwrap();
    assert_eq!(without_meta.events.len(), 2);
    assert!(without_meta.events.iter().all(|e| e.event_kind != EventKind::Meta));
    assert_eq!(without_meta.toc.len(), 2);

    // Page of one: newest event only, cursor points at it
    let page = index
        .get_trace_page(&trace_id, 1, None, true)
        .await
        .unwrap();
    assert_eq!(page.events.len(), 1);
    assert_eq!(page.events[0].index, 2);
    let cursor = page.next_before.unwrap();

    let older = index
        .get_trace_page(&trace_id, 10, Some(cursor), true)
        .await
        .unwrap();
    assert_eq!(older.events.len(), 2);
    assert!(older.events.iter().all(|e| (e.index as u64) < cursor));
    assert!(older.next_before.is_none());
}

#[tokio::test]
async fn test_overview_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    write_codex_basic(&dir.path().join("a.jsonl"));
    write_codex_basic(&dir.path().join("b.jsonl"));

    let index = TraceIndex::new(config_for(dir.path(), LogType::Codex)).unwrap();
    index.refresh_once(true).await;

    let overview = index.overview().await;
    assert_eq!(overview.trace_count, 2);
    // Both files carry the same embedded session id
    assert_eq!(overview.session_count, 1);
    assert_eq!(overview.event_count, 6);
    assert_eq!(overview.tool_use_count, 2);
    assert_eq!(overview.by_agent.get("codex"), Some(&2));
}

#[tokio::test]
async fn test_unparseable_file_still_listed() {
    let dir = tempfile::tempdir().unwrap();
    // Claims the gemini path shape but holds broken JSON
    let chats = dir.path().join("chats");
    std::fs::create_dir_all(&chats).unwrap();
    std::fs::write(chats.join("session-xyz.json"), "{ broken").unwrap();

    let index = TraceIndex::new(config_for(dir.path(), LogType::Gemini)).unwrap();
    index.refresh_once(true).await;

    let summaries = index.get_summaries(None, 50).await;
    assert_eq!(summaries.len(), 1);
    assert!(!summaries[0].parseable);
    assert!(!summaries[0].parse_error.is_empty());
    assert_eq!(summaries[0].event_count, 0);
}

#[tokio::test]
async fn test_backdated_mtime_forces_full_reparse() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rollout.jsonl");
    write_codex_basic(&path);

    let index = TraceIndex::new(config_for(dir.path(), LogType::Codex)).unwrap();
    index.refresh_once(true).await;

    // Same size, mtime pushed into the past: not an append
    let old = filetime::FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(&path, old).unwrap();

    index.refresh_once(false).await;
    let perf = index.performance_stats().await;
    assert!(perf.full_reparse_count >= 1);
    assert_eq!(perf.incremental_append_count, 0);
}

#[tokio::test]
async fn test_shrunk_file_forces_full_reparse() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rollout.jsonl");
    write_codex_basic(&path);

    let index = TraceIndex::new(config_for(dir.path(), LogType::Codex)).unwrap();
    index.refresh_once(true).await;
    assert_eq!(index.get_summaries(None, 1).await[0].event_count, 3);

    // Truncate to one record
    let line = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .to_string();
    std::fs::write(&path, format!("{}\n", line)).unwrap();

    index.refresh_once(false).await;
    let perf = index.performance_stats().await;
    assert!(perf.full_reparse_count >= 1);
    assert_eq!(index.get_summaries(None, 1).await[0].event_count, 1);
}
