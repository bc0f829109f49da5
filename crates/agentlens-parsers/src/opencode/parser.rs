use agentlens_types::{Agent, EventKind, TokenTotals, UsageSample};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::builder::{EventBuilder, EventDraft};
use crate::opencode::schema::*;
use crate::redact::Redactor;
use crate::tool_mapping::normalize_tool_type;
use crate::traits::{ParseOutcome, ResumeState, TraceParser};
use crate::{Error, Result};

fn tokens_to_totals(t: &OpencodeTokens) -> TokenTotals {
    let input = t.input + t.cache.read + t.cache.write;
    TokenTotals {
        input_tokens: input,
        cached_read_tokens: t.cache.read,
        cached_create_tokens: t.cache.write,
        output_tokens: t.output,
        reasoning_output_tokens: t.reasoning,
        total_tokens: input + t.output + t.reasoning,
    }
}

fn time_ms(time: &Option<OpencodeTime>) -> Option<i64> {
    // OpenCode stamps are unix epoch, sometimes seconds, sometimes ms
    time.and_then(|t| t.created).map(|v| {
        if v < 100_000_000_000.0 {
            (v * 1000.0) as i64
        } else {
            v as i64
        }
    })
}

fn value_text(value: &Option<Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Sorted .json entries of a directory, by file name.
fn sorted_json_entries(dir: &Path) -> Vec<PathBuf> {
    let Ok(read) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut entries: Vec<PathBuf> = read
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
        .collect();
    entries.sort();
    entries
}

/// OpenCode storage parser (`~/.local/share/opencode/storage/`).
///
/// A trace here is a directory-shaped record: the session json plus one
/// file per message under `message/<sessionId>/` plus one file per part
/// under `part/<msgId>/`. Messages are ordered by their created time,
/// then by file order; parts follow file order within a message. The
/// composite is reassembled from scratch on every parse.
pub struct OpencodeParser {
    redactor: Arc<Redactor>,
}

impl OpencodeParser {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self { redactor }
    }

    /// Walk up from the session json to the `storage` root.
    fn storage_root(path: &Path) -> Option<PathBuf> {
        path.ancestors()
            .find(|a| a.file_name().map(|n| n == "storage").unwrap_or(false))
            .map(|a| a.to_path_buf())
    }
}

impl TraceParser for OpencodeParser {
    fn id(&self) -> &'static str {
        "opencode"
    }

    fn agent(&self) -> Agent {
        Agent::Opencode
    }

    fn matches_path(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        s.contains("/opencode/storage/")
            && (s.contains("/session/") || s.contains("/session_diff/"))
            && s.ends_with(".json")
    }

    fn probe_first_line(&self, _line: &str) -> bool {
        // Only the storage path shape identifies OpenCode; the session
        // json has no distinctive first-line marker
        false
    }

    fn incremental(&self) -> bool {
        false
    }

    fn parse(
        &self,
        path: &Path,
        trace_id: &str,
        _prior: Option<&ResumeState>,
    ) -> Result<ParseOutcome> {
        let bytes = std::fs::read(path)?;
        let session: OpencodeSession = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Parse(format!("opencode session json: {}", e)))?;

        let session_id = session
            .id
            .clone()
            .or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        let session_cwd = session.directory.clone().unwrap_or_default();

        let mut builder = EventBuilder::new(trace_id, 0, Default::default(), &self.redactor);
        builder.carry_mut().session_id = session_id.clone();
        builder.carry_mut().session_cwd = session_cwd.clone();
        let mut events = Vec::new();
        let mut error_count: u64 = 0;
        let mut offset: u64 = 0;

        let storage = Self::storage_root(path);
        let mut messages: Vec<(OpencodeMessage, PathBuf)> = Vec::new();
        if let Some(storage) = &storage {
            let message_dir = storage.join("message").join(&session_id);
            for entry in sorted_json_entries(&message_dir) {
                match std::fs::read(&entry)
                    .ok()
                    .and_then(|b| serde_json::from_slice::<OpencodeMessage>(&b).ok())
                {
                    Some(message) => messages.push((message, entry)),
                    None => error_count += 1,
                }
            }
        }

        // File order breaks created-time ties, keeping the sort stable
        messages.sort_by(|a, b| {
            let ta = time_ms(&a.0.time);
            let tb = time_ms(&b.0.time);
            ta.cmp(&tb).then_with(|| a.1.cmp(&b.1))
        });

        for (message, _message_path) in &messages {
            let timestamp = time_ms(&message.time);
            let is_user = message.role == "user";
            let mut last_event_id = String::new();
            let mut emitted = 0usize;

            let part_dir = storage
                .as_ref()
                .map(|s| s.join("part").join(&message.id));
            let part_files = part_dir
                .as_deref()
                .map(sorted_json_entries)
                .unwrap_or_default();

            for part_path in &part_files {
                let part = match std::fs::read(part_path)
                    .ok()
                    .and_then(|b| serde_json::from_slice::<OpencodePart>(&b).ok())
                {
                    Some(p) => p,
                    None => {
                        error_count += 1;
                        continue;
                    }
                };
                let part_id = part
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("p{}", offset));
                let raw = std::fs::read(part_path)
                    .ok()
                    .and_then(|b| serde_json::from_slice::<Value>(&b).ok())
                    .unwrap_or(Value::Null);

                match part.part_type.as_str() {
                    "text" => {
                        let text = part.text.clone().unwrap_or_default();
                        last_event_id = builder.push(
                            &mut events,
                            EventDraft {
                                event_id: format!("{}-{}", message.id, part_id),
                                offset,
                                timestamp_ms: timestamp,
                                event_kind: if is_user {
                                    EventKind::User
                                } else {
                                    EventKind::Assistant
                                },
                                raw_type: "part/text".to_string(),
                                role: message.role.clone(),
                                text_blocks: if text.is_empty() { vec![] } else { vec![text] },
                                raw,
                                ..Default::default()
                            },
                        );
                        emitted += 1;
                        offset += 1;
                    }
                    "reasoning" => {
                        let text = part.text.clone().unwrap_or_default();
                        last_event_id = builder.push(
                            &mut events,
                            EventDraft {
                                event_id: format!("{}-{}", message.id, part_id),
                                offset,
                                timestamp_ms: timestamp,
                                event_kind: EventKind::Reasoning,
                                raw_type: "part/reasoning".to_string(),
                                role: "assistant".to_string(),
                                text_blocks: if text.is_empty() { vec![] } else { vec![text] },
                                raw,
                                ..Default::default()
                            },
                        );
                        emitted += 1;
                        offset += 1;
                    }
                    "tool" => {
                        let name = part.tool.clone().unwrap_or_default();
                        let call_id = part
                            .call_id
                            .clone()
                            .unwrap_or_else(|| format!("oc-{}", part_id));
                        let (args, output, status) = match &part.state {
                            Some(state) => (
                                value_text(&state.input),
                                value_text(&state.output),
                                state.status.clone().unwrap_or_default(),
                            ),
                            None => (String::new(), String::new(), String::new()),
                        };
                        let failed = status == "error";

                        last_event_id = builder.push(
                            &mut events,
                            EventDraft {
                                event_id: format!("{}-{}-use", message.id, part_id),
                                offset,
                                timestamp_ms: timestamp,
                                event_kind: EventKind::ToolUse,
                                raw_type: "part/tool".to_string(),
                                role: "assistant".to_string(),
                                tool_call_id: call_id.clone(),
                                tool_name: name.clone(),
                                tool_type: normalize_tool_type(&name),
                                tool_args_text: args,
                                function_name: name.clone(),
                                raw: raw.clone(),
                                ..Default::default()
                            },
                        );
                        emitted += 1;
                        offset += 1;

                        // A settled call carries its result in the same part
                        if status == "completed" || failed {
                            last_event_id = builder.push(
                                &mut events,
                                EventDraft {
                                    event_id: format!("{}-{}-result", message.id, part_id),
                                    offset,
                                    timestamp_ms: timestamp,
                                    event_kind: EventKind::ToolResult,
                                    raw_type: "part/tool".to_string(),
                                    tool_call_id: call_id,
                                    tool_result_text: output,
                                    has_error: failed,
                                    raw,
                                    ..Default::default()
                                },
                            );
                            emitted += 1;
                            offset += 1;
                        }
                    }
                    // step-start, step-finish, snapshots: bookkeeping only
                    _ => {}
                }
            }

            if let Some(tokens) = &message.tokens {
                let model = message.model_id.clone().unwrap_or_default();
                let sample = UsageSample {
                    model,
                    tokens: tokens_to_totals(tokens),
                    precomputed_cost_usd: message.cost.filter(|c| *c > 0.0),
                    dedup_key: String::new(),
                };
                if emitted > 0 {
                    if let Some(event) =
                        events.iter_mut().rev().find(|e| e.event_id == last_event_id)
                    {
                        event.usage = Some(sample);
                    }
                } else {
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id: format!("{}-usage", message.id),
                            offset,
                            timestamp_ms: timestamp,
                            event_kind: EventKind::Meta,
                            raw_type: "message/usage".to_string(),
                            usage: Some(sample),
                            raw: Value::Null,
                            ..Default::default()
                        },
                    );
                    offset += 1;
                }
            }
        }

        let event_count = builder.next_index() as u64;
        let carry = builder.into_carry();
        let parse_error = if error_count > 0 {
            "malformed_records".to_string()
        } else {
            String::new()
        };

        Ok(ParseOutcome {
            session_id,
            session_cwd,
            events,
            appended: false,
            error_count,
            parseable: true,
            parse_error,
            resume: ResumeState {
                offset,
                prefix_sha256: String::new(),
                event_count,
                carry,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> OpencodeParser {
        OpencodeParser::new(Arc::new(Redactor::standard()))
    }

    /// Build a minimal storage tree:
    /// storage/session/default/<id>.json, message/<id>/, part/<msgId>/
    fn build_store(dir: &Path) -> PathBuf {
        let storage = dir.join("opencode").join("storage");
        let session_dir = storage.join("session").join("default");
        std::fs::create_dir_all(&session_dir).unwrap();
        let session_path = session_dir.join("ses_1.json");
        std::fs::write(
            &session_path,
            r#"{"id":"ses_1","title":"demo","directory":"/work/demo","time":{"created":1760000000}}"#,
        )
        .unwrap();

        let message_dir = storage.join("message").join("ses_1");
        std::fs::create_dir_all(&message_dir).unwrap();
        std::fs::write(
            message_dir.join("msg_1.json"),
            r#"{"id":"msg_1","sessionID":"ses_1","role":"user","time":{"created":1760000001}}"#,
        )
        .unwrap();
        std::fs::write(
            message_dir.join("msg_2.json"),
            r#"{"id":"msg_2","sessionID":"ses_1","role":"assistant","time":{"created":1760000002},"modelID":"claude-sonnet-4-5","cost":0.012,"tokens":{"input":100,"output":20,"reasoning":0,"cache":{"read":40,"write":0}}}"#,
        )
        .unwrap();

        let part1 = storage.join("part").join("msg_1");
        std::fs::create_dir_all(&part1).unwrap();
        std::fs::write(
            part1.join("prt_1.json"),
            r#"{"id":"prt_1","messageID":"msg_1","type":"text","text":"run the tests"}"#,
        )
        .unwrap();

        let part2 = storage.join("part").join("msg_2");
        std::fs::create_dir_all(&part2).unwrap();
        std::fs::write(
            part2.join("prt_2.json"),
            r#"{"id":"prt_2","messageID":"msg_2","type":"tool","tool":"bash","callID":"call_9","state":{"status":"completed","input":{"command":"cargo test"},"output":"ok"}}"#,
        )
        .unwrap();
        std::fs::write(
            part2.join("prt_3.json"),
            r#"{"id":"prt_3","messageID":"msg_2","type":"text","text":"all green"}"#,
        )
        .unwrap();

        session_path
    }

    #[test]
    fn test_directory_shaped_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let session_path = build_store(dir.path());
        let outcome = parser().parse(&session_path, "t1", None).unwrap();

        assert_eq!(outcome.session_id, "ses_1");
        assert_eq!(outcome.session_cwd, "/work/demo");

        let kinds: Vec<_> = outcome.events.iter().map(|e| e.event_kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::User,
                EventKind::ToolUse,
                EventKind::ToolResult,
                EventKind::Assistant,
            ]
        );

        let tool_use = &outcome.events[1];
        let tool_result = &outcome.events[2];
        assert_eq!(tool_use.tool_call_id, "call_9");
        assert_eq!(tool_use.tool_type, "bash");
        assert_eq!(tool_result.tool_result_text, "ok");
        assert_eq!(tool_result.parent_event_id, tool_use.event_id);
    }

    #[test]
    fn test_usage_attached_with_precomputed_cost() {
        let dir = tempfile::tempdir().unwrap();
        let session_path = build_store(dir.path());
        let outcome = parser().parse(&session_path, "t1", None).unwrap();

        let usage = outcome
            .events
            .iter()
            .filter_map(|e| e.usage.as_ref())
            .next()
            .expect("assistant usage");
        assert_eq!(usage.model, "claude-sonnet-4-5");
        assert_eq!(usage.tokens.input_tokens, 140);
        assert_eq!(usage.tokens.cached_read_tokens, 40);
        assert_eq!(usage.precomputed_cost_usd, Some(0.012));
    }

    #[test]
    fn test_placeholder_without_messages() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("opencode").join("storage");
        let diff_dir = storage.join("session_diff");
        std::fs::create_dir_all(&diff_dir).unwrap();
        let diff_path = diff_dir.join("ses_9.json");
        std::fs::write(&diff_path, r#"{"id":"ses_9"}"#).unwrap();

        let outcome = parser().parse(&diff_path, "t9", None).unwrap();
        assert_eq!(outcome.session_id, "ses_9");
        assert!(outcome.events.is_empty());
        assert!(outcome.parseable);
    }
}
