use agentlens_types::{
    time::timestamp_ms_from_value, Agent, EventKind, TokenTotals, UsageSample,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::builder::{EventBuilder, EventDraft};
use crate::gemini::schema::*;
use crate::redact::Redactor;
use crate::tool_mapping::normalize_tool_type;
use crate::traits::{ParseOutcome, ResumeState, TraceParser};
use crate::{Error, Result};

fn tokens_to_totals(t: &GeminiTokens) -> TokenTotals {
    let total = if t.total > 0 {
        t.total
    } else {
        t.input + t.output + t.thoughts + t.tool
    };
    TokenTotals {
        input_tokens: t.input,
        cached_read_tokens: t.cached,
        cached_create_tokens: 0,
        output_tokens: t.output + t.tool,
        reasoning_output_tokens: t.thoughts,
        total_tokens: total,
    }
}

/// Gemini CLI chat parser (`~/.gemini/tmp/<hash>/chats/session-*.json`).
///
/// One JSON object per file; assistant messages embed completed tool calls
/// with their responses, so each unfolds into tool_use + tool_result pairs.
/// The file is rewritten in place on every turn, so parsing is always full.
pub struct GeminiParser {
    redactor: Arc<Redactor>,
}

impl GeminiParser {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self { redactor }
    }
}

impl TraceParser for GeminiParser {
    fn id(&self) -> &'static str {
        "gemini"
    }

    fn agent(&self) -> Agent {
        Agent::Gemini
    }

    fn matches_path(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        s.contains("/.gemini/tmp/")
            && s.contains("/chats/")
            && s.ends_with(".json")
            && path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with("session-"))
                .unwrap_or(false)
    }

    fn probe_first_line(&self, line: &str) -> bool {
        // Single-object JSON; cheap check for the session field names
        line.contains("\"sessionId\"") || line.contains("\"projectHash\"")
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
        let text = String::from_utf8_lossy(&bytes);

        let session: GeminiSession = serde_json::from_str(&text)
            .map_err(|e| Error::Parse(format!("gemini session json: {}", e)))?;

        let session_id = session.session_id.clone().unwrap_or_default();
        let session_start = session
            .start_time
            .as_ref()
            .and_then(timestamp_ms_from_value);

        let mut builder = EventBuilder::new(trace_id, 0, Default::default(), &self.redactor);
        builder.carry_mut().session_id = session_id.clone();
        let mut events = Vec::new();
        let mut call_seq: u64 = 0;

        for (msg_index, message) in session.messages.iter().enumerate() {
            let offset = msg_index as u64;
            let timestamp = message
                .timestamp
                .as_ref()
                .and_then(timestamp_ms_from_value)
                .or(if msg_index == 0 { session_start } else { None });

            let role = message
                .role
                .clone()
                .or(message.msg_type.clone())
                .unwrap_or_default();
            let is_user = role == "user";
            let text = message_text(message);

            let raw = serde_json::json!({
                "role": role.clone(),
                "text": text.clone(),
                "model": message.model.clone(),
                "id": message.id.clone(),
            });

            if !text.is_empty() || message.tool_calls.is_empty() {
                let usage = message.tokens.as_ref().map(|t| UsageSample {
                    model: message.model.clone().unwrap_or_default(),
                    tokens: tokens_to_totals(t),
                    precomputed_cost_usd: None,
                    dedup_key: String::new(),
                });
                builder.push(
                    &mut events,
                    EventDraft {
                        event_id: format!("m{}", msg_index),
                        offset,
                        timestamp_ms: timestamp,
                        event_kind: if is_user {
                            EventKind::User
                        } else {
                            EventKind::Assistant
                        },
                        raw_type: "message".to_string(),
                        role: if is_user { "user" } else { "assistant" }.to_string(),
                        text_blocks: if text.is_empty() { vec![] } else { vec![text] },
                        usage,
                        raw,
                        ..Default::default()
                    },
                );
            }

            for (call_index, call) in message.tool_calls.iter().enumerate() {
                call_seq += 1;
                let call_id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("gem-call-{}", call_seq));
                let args = call
                    .args
                    .as_ref()
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                let failed = call
                    .status
                    .as_deref()
                    .map(|s| s.eq_ignore_ascii_case("error") || s.eq_ignore_ascii_case("failed"))
                    .unwrap_or(false);

                builder.push(
                    &mut events,
                    EventDraft {
                        event_id: format!("m{}-call{}", msg_index, call_index),
                        offset,
                        timestamp_ms: timestamp,
                        event_kind: EventKind::ToolUse,
                        raw_type: "tool_call".to_string(),
                        role: "assistant".to_string(),
                        tool_call_id: call_id.clone(),
                        tool_name: call.name.clone(),
                        tool_type: normalize_tool_type(&call.name),
                        tool_args_text: args,
                        function_name: call.name.clone(),
                        raw: serde_json::json!({ "name": call.name.clone(), "args": call.args.clone() }),
                        ..Default::default()
                    },
                );

                if let Some(result) = &call.result {
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id: format!("m{}-result{}", msg_index, call_index),
                            offset,
                            timestamp_ms: timestamp,
                            event_kind: EventKind::ToolResult,
                            raw_type: "tool_result".to_string(),
                            tool_call_id: call_id,
                            tool_result_text: tool_result_text(result),
                            has_error: failed,
                            raw: result.clone(),
                            ..Default::default()
                        },
                    );
                }
            }
        }

        let event_count = builder.next_index() as u64;
        let carry = builder.into_carry();

        Ok(ParseOutcome {
            session_id,
            session_cwd: String::new(),
            events,
            appended: false,
            error_count: 0,
            parseable: true,
            parse_error: String::new(),
            resume: ResumeState {
                offset: session.messages.len() as u64,
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
    use std::io::Write;

    fn parser() -> GeminiParser {
        GeminiParser::new(Arc::new(Redactor::standard()))
    }

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    const SESSION: &str = r#"{
        "sessionId": "gem-1",
        "projectHash": "abc123",
        "startTime": "2026-02-01T08:00:00Z",
        "lastUpdated": "2026-02-01T08:05:00Z",
        "messages": [
            { "role": "user", "content": "list the files", "timestamp": "2026-02-01T08:00:00Z" },
            {
                "role": "model",
                "content": "Here they are.",
                "model": "gemini-2.5-pro",
                "timestamp": "2026-02-01T08:00:10Z",
                "tokens": { "input": 500, "output": 40, "cached": 100, "thoughts": 20, "tool": 5, "total": 565 },
                "toolCalls": [
                    {
                        "id": "call-a",
                        "name": "list_directory",
                        "args": { "path": "." },
                        "result": { "functionResponse": { "response": { "output": "a.rs\nb.rs" } } }
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_session_unfolds_messages_and_tools() {
        let f = write_temp(SESSION);
        let outcome = parser().parse(f.path(), "t1", None).unwrap();

        assert_eq!(outcome.session_id, "gem-1");
        let kinds: Vec<_> = outcome.events.iter().map(|e| e.event_kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::User,
                EventKind::Assistant,
                EventKind::ToolUse,
                EventKind::ToolResult,
            ]
        );

        let tool_result = &outcome.events[3];
        assert_eq!(tool_result.tool_call_id, "call-a");
        assert_eq!(tool_result.tool_result_text, "a.rs\nb.rs");
        assert_eq!(tool_result.parent_event_id, outcome.events[2].event_id);
    }

    #[test]
    fn test_token_mapping() {
        let f = write_temp(SESSION);
        let outcome = parser().parse(f.path(), "t1", None).unwrap();
        let usage = outcome.events[1].usage.as_ref().unwrap();
        assert_eq!(usage.model, "gemini-2.5-pro");
        assert_eq!(usage.tokens.input_tokens, 500);
        assert_eq!(usage.tokens.cached_read_tokens, 100);
        assert_eq!(usage.tokens.reasoning_output_tokens, 20);
        assert_eq!(usage.tokens.total_tokens, 565);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let f = write_temp("{ not json");
        let err = parser().parse(f.path(), "t1", None);
        assert!(err.is_err());
    }

    #[test]
    fn test_empty_messages_is_parseable() {
        let f = write_temp(r#"{"sessionId": "gem-2", "messages": []}"#);
        let outcome = parser().parse(f.path(), "t1", None).unwrap();
        assert!(outcome.parseable);
        assert!(outcome.events.is_empty());
    }
}
