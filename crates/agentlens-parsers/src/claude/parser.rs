use agentlens_types::{
    time::timestamp_ms_from_str, Agent, EventKind, TokenTotals, UsageSample,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::builder::{EventBuilder, EventDraft};
use crate::claude::schema::*;
use crate::io::read_jsonl;
use crate::redact::Redactor;
use crate::tool_mapping::normalize_tool_type;
use crate::traits::{ParseOutcome, ResumeState, TraceParser};
use crate::Result;

fn ts_ms(value: &Option<String>) -> Option<i64> {
    value.as_deref().and_then(timestamp_ms_from_str)
}

/// Flatten a tool_result content value (string, or block list) to text.
fn tool_result_text(content: &Option<Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

/// Map Claude usage counters into the common shape.
///
/// Claude's `input_tokens` counts only fresh input; the common shape's
/// `input_tokens` is the whole input dimension, so cached reads/creates
/// are folded back in before the cost layer subtracts them again.
fn usage_to_totals(u: &ClaudeUsage) -> TokenTotals {
    let input = u.input_tokens + u.cache_read_input_tokens + u.cache_creation_input_tokens;
    TokenTotals {
        input_tokens: input,
        cached_read_tokens: u.cache_read_input_tokens,
        cached_create_tokens: u.cache_creation_input_tokens,
        output_tokens: u.output_tokens,
        reasoning_output_tokens: 0,
        total_tokens: input + u.output_tokens,
    }
}

/// Claude Code session parser (`~/.claude/projects/**/*.jsonl`).
///
/// One record fans out into one event per content block. Usage counters
/// live on assistant records and are deduplicated downstream by the
/// (request_id, message.id) pair to absorb retransmissions.
pub struct ClaudeParser {
    redactor: Arc<Redactor>,
}

impl ClaudeParser {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self { redactor }
    }
}

impl TraceParser for ClaudeParser {
    fn id(&self) -> &'static str {
        "claude"
    }

    fn agent(&self) -> Agent {
        Agent::Claude
    }

    fn matches_path(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        s.contains("/.claude/projects/") && s.ends_with(".jsonl")
    }

    fn probe_first_line(&self, line: &str) -> bool {
        let Ok(v) = serde_json::from_str::<Value>(line) else {
            return false;
        };
        let has_claude_type = matches!(
            v.get("type").and_then(|t| t.as_str()),
            Some("user") | Some("assistant") | Some("system") | Some("summary")
        );
        has_claude_type && (v.get("sessionId").is_some() || v.get("message").is_some())
    }

    fn parse(
        &self,
        path: &Path,
        trace_id: &str,
        prior: Option<&ResumeState>,
    ) -> Result<ParseOutcome> {
        let chunk = read_jsonl(path, prior)?;

        let (start_index, carry) = match prior {
            Some(state) if chunk.appended => (state.event_count as usize, state.carry.clone()),
            _ => (0, Default::default()),
        };

        let mut builder = EventBuilder::new(trace_id, start_index, carry, &self.redactor);
        let mut events = Vec::new();
        let mut error_count: u64 = 0;
        let mut consumed: u64 = prior
            .filter(|_| chunk.appended)
            .map(|s| s.offset)
            .unwrap_or(0);

        for line in &chunk.lines {
            let trimmed = line.text.trim();
            if trimmed.is_empty() {
                if line.terminated {
                    consumed = line.end;
                    continue;
                }
                break;
            }

            let value: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) if !line.terminated => break,
                Err(_) => {
                    error_count += 1;
                    consumed = line.end;
                    continue;
                }
            };
            consumed = line.end;

            let record: ClaudeRecord = match serde_json::from_value(value.clone()) {
                Ok(r) => r,
                Err(_) => ClaudeRecord::Unknown,
            };

            let fallback_id = format!("e{}", line.start);
            match record {
                ClaudeRecord::User(user) => {
                    if let Some(session_id) = &user.session_id {
                        if builder.carry().session_id.is_empty() {
                            builder.carry_mut().session_id = session_id.clone();
                        }
                    }
                    if let Some(cwd) = &user.cwd {
                        if builder.carry().session_cwd.is_empty() {
                            builder.carry_mut().session_cwd = cwd.clone();
                        }
                    }

                    let base_id = user.uuid.clone().unwrap_or(fallback_id);
                    let timestamp = ts_ms(&user.timestamp);
                    let parent_tool_use = user.parent_tool_use_id.clone().unwrap_or_default();

                    let blocks = match &user.message.content {
                        ContentField::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
                        ContentField::Blocks(blocks) => {
                            // Re-borrowing the parsed blocks; drafts clone out of them
                            blocks
                                .iter()
                                .map(|b| clone_block(b))
                                .collect()
                        }
                    };

                    for (idx, block) in blocks.iter().enumerate() {
                        let event_id = format!("{}-{}", base_id, idx);
                        match block {
                            ContentBlock::Text { text } => {
                                let kind = if user.is_meta {
                                    EventKind::Meta
                                } else {
                                    EventKind::User
                                };
                                builder.push(
                                    &mut events,
                                    EventDraft {
                                        event_id,
                                        offset: line.start,
                                        timestamp_ms: timestamp,
                                        event_kind: kind,
                                        raw_type: "user/text".to_string(),
                                        role: "user".to_string(),
                                        text_blocks: vec![text.clone()],
                                        parent_tool_use_id: parent_tool_use.clone(),
                                        raw: value.clone(),
                                        ..Default::default()
                                    },
                                );
                            }
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                is_error,
                            } => {
                                builder.push(
                                    &mut events,
                                    EventDraft {
                                        event_id,
                                        offset: line.start,
                                        timestamp_ms: timestamp,
                                        event_kind: EventKind::ToolResult,
                                        raw_type: "user/tool_result".to_string(),
                                        tool_call_id: tool_use_id.clone(),
                                        tool_result_text: tool_result_text(content),
                                        has_error: is_error.unwrap_or(false),
                                        parent_tool_use_id: parent_tool_use.clone(),
                                        raw: value.clone(),
                                        ..Default::default()
                                    },
                                );
                            }
                            // Images carry no indexable text
                            ContentBlock::Image {} => {}
                            ContentBlock::Thinking { .. }
                            | ContentBlock::ToolUse { .. }
                            | ContentBlock::Unknown => {}
                        }
                    }
                }

                ClaudeRecord::Assistant(asst) => {
                    if let Some(session_id) = &asst.session_id {
                        if builder.carry().session_id.is_empty() {
                            builder.carry_mut().session_id = session_id.clone();
                        }
                    }
                    if let Some(cwd) = &asst.cwd {
                        if builder.carry().session_cwd.is_empty() {
                            builder.carry_mut().session_cwd = cwd.clone();
                        }
                    }

                    let base_id = asst.uuid.clone().unwrap_or(fallback_id);
                    let timestamp = ts_ms(&asst.timestamp);
                    let mut emitted_in_record = 0usize;
                    let mut last_event_id = String::new();

                    for (idx, block) in asst.message.content.iter().enumerate() {
                        let event_id = format!("{}-{}", base_id, idx);
                        match block {
                            ContentBlock::Text { text } => {
                                last_event_id = builder.push(
                                    &mut events,
                                    EventDraft {
                                        event_id,
                                        offset: line.start,
                                        timestamp_ms: timestamp,
                                        event_kind: EventKind::Assistant,
                                        raw_type: "assistant/text".to_string(),
                                        role: "assistant".to_string(),
                                        text_blocks: vec![text.clone()],
                                        raw: value.clone(),
                                        ..Default::default()
                                    },
                                );
                                emitted_in_record += 1;
                            }
                            ContentBlock::Thinking { thinking } => {
                                last_event_id = builder.push(
                                    &mut events,
                                    EventDraft {
                                        event_id,
                                        offset: line.start,
                                        timestamp_ms: timestamp,
                                        event_kind: EventKind::Reasoning,
                                        raw_type: "assistant/thinking".to_string(),
                                        role: "assistant".to_string(),
                                        text_blocks: vec![thinking.clone()],
                                        raw: value.clone(),
                                        ..Default::default()
                                    },
                                );
                                emitted_in_record += 1;
                            }
                            ContentBlock::ToolUse { id, name, input } => {
                                let args = if input.is_null() {
                                    String::new()
                                } else {
                                    input.to_string()
                                };
                                last_event_id = builder.push(
                                    &mut events,
                                    EventDraft {
                                        event_id,
                                        offset: line.start,
                                        timestamp_ms: timestamp,
                                        event_kind: EventKind::ToolUse,
                                        raw_type: "assistant/tool_use".to_string(),
                                        role: "assistant".to_string(),
                                        tool_call_id: id.clone(),
                                        tool_name: name.clone(),
                                        tool_type: normalize_tool_type(name),
                                        tool_args_text: args,
                                        function_name: name.clone(),
                                        raw: value.clone(),
                                        ..Default::default()
                                    },
                                );
                                emitted_in_record += 1;
                            }
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                is_error,
                            } => {
                                last_event_id = builder.push(
                                    &mut events,
                                    EventDraft {
                                        event_id,
                                        offset: line.start,
                                        timestamp_ms: timestamp,
                                        event_kind: EventKind::ToolResult,
                                        raw_type: "assistant/tool_result".to_string(),
                                        tool_call_id: tool_use_id.clone(),
                                        tool_result_text: tool_result_text(content),
                                        has_error: is_error.unwrap_or(false),
                                        raw: value.clone(),
                                        ..Default::default()
                                    },
                                );
                                emitted_in_record += 1;
                            }
                            ContentBlock::Image {} | ContentBlock::Unknown => {}
                        }
                    }

                    // Usage rides on the record; attach it to the last event
                    // the record produced, or a sidecar meta event when the
                    // content was empty.
                    if let Some(usage) = &asst.message.usage {
                        let dedup_key = match (&asst.request_id, &asst.message.id) {
                            (Some(req), Some(msg)) => format!("{}/{}", req, msg),
                            _ => String::new(),
                        };
                        let sample = UsageSample {
                            model: asst.message.model.clone().unwrap_or_default(),
                            tokens: usage_to_totals(usage),
                            precomputed_cost_usd: None,
                            dedup_key,
                        };
                        if emitted_in_record > 0 {
                            if let Some(event) =
                                events.iter_mut().rev().find(|e| e.event_id == last_event_id)
                            {
                                event.usage = Some(sample);
                            }
                        } else {
                            builder.push(
                                &mut events,
                                EventDraft {
                                    event_id: format!("{}-usage", base_id),
                                    offset: line.start,
                                    timestamp_ms: timestamp,
                                    event_kind: EventKind::Meta,
                                    raw_type: "assistant/usage".to_string(),
                                    usage: Some(sample),
                                    raw: value.clone(),
                                    ..Default::default()
                                },
                            );
                        }
                    }
                }

                ClaudeRecord::System(system) => {
                    let base_id = system.uuid.clone().unwrap_or(fallback_id);
                    let text = system.content.clone().unwrap_or_default();
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id: base_id,
                            offset: line.start,
                            timestamp_ms: ts_ms(&system.timestamp),
                            event_kind: EventKind::System,
                            raw_type: format!(
                                "system/{}",
                                system.subtype.as_deref().unwrap_or("message")
                            ),
                            text_blocks: if text.is_empty() { vec![] } else { vec![text] },
                            raw: value,
                            ..Default::default()
                        },
                    );
                }

                ClaudeRecord::Summary(summary) => {
                    let base_id = summary
                        .leaf_uuid
                        .clone()
                        .map(|u| format!("{}-summary", u))
                        .unwrap_or(fallback_id);
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id: base_id,
                            offset: line.start,
                            timestamp_ms: None,
                            event_kind: EventKind::Meta,
                            raw_type: "summary".to_string(),
                            text_blocks: vec![summary.summary.clone()],
                            raw: value,
                            ..Default::default()
                        },
                    );
                }

                ClaudeRecord::Unknown => {
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id: fallback_id,
                            offset: line.start,
                            timestamp_ms: None,
                            event_kind: EventKind::Meta,
                            raw_type: value
                                .get("type")
                                .and_then(|t| t.as_str())
                                .unwrap_or("unknown")
                                .to_string(),
                            raw: value,
                            ..Default::default()
                        },
                    );
                }
            }
        }

        let event_count = builder.next_index() as u64;
        let carry = builder.into_carry();
        let parse_error = if error_count > 0 {
            "malformed_lines".to_string()
        } else {
            String::new()
        };

        Ok(ParseOutcome {
            session_id: carry.session_id.clone(),
            session_cwd: carry.session_cwd.clone(),
            events,
            appended: chunk.appended,
            error_count,
            parseable: true,
            parse_error,
            resume: ResumeState {
                offset: consumed,
                prefix_sha256: chunk.prefix_hash(consumed),
                event_count,
                carry,
            },
        })
    }
}

fn clone_block(block: &ContentBlock) -> ContentBlock {
    match block {
        ContentBlock::Text { text } => ContentBlock::Text { text: text.clone() },
        ContentBlock::Thinking { thinking } => ContentBlock::Thinking {
            thinking: thinking.clone(),
        },
        ContentBlock::ToolUse { id, name, input } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
        ContentBlock::Image {} => ContentBlock::Image {},
        ContentBlock::Unknown => ContentBlock::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parser() -> ClaudeParser {
        ClaudeParser::new(Arc::new(Redactor::standard()))
    }

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_user_and_assistant_blocks() {
        let content = concat!(
            r#"{"type":"user","uuid":"u1","sessionId":"sess-c","timestamp":"2026-01-05T10:00:00Z","cwd":"/work/app","message":{"role":"user","content":"fix the bug"}}"#,
            "\n",
            r#"{"type":"assistant","uuid":"a1","sessionId":"sess-c","timestamp":"2026-01-05T10:00:05Z","requestId":"req_1","message":{"id":"msg_1","model":"claude-sonnet-4-5","role":"assistant","content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"on it"}],"usage":{"input_tokens":100,"output_tokens":50,"cache_read_input_tokens":10,"cache_creation_input_tokens":0}}}"#,
            "\n",
        );
        let f = write_temp(content);
        let outcome = parser().parse(f.path(), "t1", None).unwrap();

        assert_eq!(outcome.session_id, "sess-c");
        assert_eq!(outcome.session_cwd, "/work/app");
        assert_eq!(outcome.events.len(), 3);
        assert_eq!(outcome.events[0].event_kind, EventKind::User);
        assert_eq!(outcome.events[1].event_kind, EventKind::Reasoning);
        assert_eq!(outcome.events[2].event_kind, EventKind::Assistant);

        let usage = outcome.events[2].usage.as_ref().unwrap();
        assert_eq!(usage.model, "claude-sonnet-4-5");
        assert_eq!(usage.dedup_key, "req_1/msg_1");
        // input dimension includes cached reads
        assert_eq!(usage.tokens.input_tokens, 110);
        assert_eq!(usage.tokens.cached_read_tokens, 10);
        assert_eq!(usage.tokens.total_tokens, 160);
    }

    #[test]
    fn test_tool_use_result_pairing() {
        let content = concat!(
            r#"{"type":"assistant","uuid":"a1","sessionId":"s","message":{"id":"m1","role":"assistant","content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls"}}]}}"#,
            "\n",
            r#"{"type":"user","uuid":"u2","sessionId":"s","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"file.txt","is_error":false}]}}"#,
            "\n",
        );
        let f = write_temp(content);
        let outcome = parser().parse(f.path(), "t1", None).unwrap();

        assert_eq!(outcome.events.len(), 2);
        let tool_use = &outcome.events[0];
        let tool_result = &outcome.events[1];
        assert_eq!(tool_use.event_kind, EventKind::ToolUse);
        assert_eq!(tool_use.tool_type, "bash");
        assert!(tool_use.tool_args_text.contains("ls"));
        assert_eq!(tool_result.tool_call_id, "toolu_1");
        assert_eq!(tool_result.tool_result_text, "file.txt");
        assert_eq!(tool_result.parent_event_id, tool_use.event_id);
        assert_eq!(tool_result.tool_name, "Bash");
    }

    #[test]
    fn test_duplicate_usage_shares_dedup_key() {
        let line = r#"{"type":"assistant","uuid":"a1","sessionId":"s","requestId":"req_1","message":{"id":"msg_1","role":"assistant","content":[{"type":"text","text":"x"}],"usage":{"input_tokens":100,"output_tokens":50,"cache_read_input_tokens":300,"cache_creation_input_tokens":600}}}"#;
        let content = format!("{}\n{}\n", line, line.replace("\"uuid\":\"a1\"", "\"uuid\":\"a2\""));
        let f = write_temp(&content);
        let outcome = parser().parse(f.path(), "t1", None).unwrap();

        let samples: Vec<_> = outcome
            .events
            .iter()
            .filter_map(|e| e.usage.as_ref())
            .collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].dedup_key, samples[1].dedup_key);
        assert_eq!(samples[0].dedup_key, "req_1/msg_1");
    }

    #[test]
    fn test_meta_user_record_is_meta_kind() {
        let content = r#"{"type":"user","uuid":"u1","sessionId":"s","isMeta":true,"message":{"role":"user","content":"Caveat: local commands"}}
"#;
        let f = write_temp(content);
        let outcome = parser().parse(f.path(), "t1", None).unwrap();
        assert_eq!(outcome.events[0].event_kind, EventKind::Meta);
    }

    #[test]
    fn test_empty_assistant_content_gets_usage_sidecar() {
        let content = r#"{"type":"assistant","uuid":"a1","sessionId":"s","requestId":"r1","message":{"id":"m1","model":"claude-sonnet-4-5","role":"assistant","content":[],"usage":{"input_tokens":7,"output_tokens":3,"cache_read_input_tokens":0,"cache_creation_input_tokens":0}}}
"#;
        let f = write_temp(content);
        let outcome = parser().parse(f.path(), "t1", None).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].event_kind, EventKind::Meta);
        assert!(outcome.events[0].usage.is_some());
    }

    #[test]
    fn test_secret_in_tool_result_is_redacted() {
        let content = r#"{"type":"user","uuid":"u1","sessionId":"s","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"API_KEY=sk-abcdefgh1234"}]}}
"#;
        let f = write_temp(content);
        let outcome = parser().parse(f.path(), "t1", None).unwrap();
        assert!(!outcome.events[0].tool_result_text.contains("sk-abcdefgh1234"));
        assert!(outcome.events[0].tool_result_text.contains("[REDACTED]"));
    }
}
