use agentlens_types::{
    time::timestamp_ms_from_value, Agent, EventKind, TokenTotals, UsageSample,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::builder::{EventBuilder, EventDraft};
use crate::io::read_jsonl;
use crate::pi::schema::*;
use crate::redact::Redactor;
use crate::tool_mapping::normalize_tool_type;
use crate::traits::{ParseOutcome, ResumeState, TraceParser};
use crate::Result;

/// Pi splits the input dimension into fresh/cacheRead/cacheWrite; the
/// common shape's `input_tokens` covers all three.
fn usage_to_totals(u: &PiUsage) -> TokenTotals {
    let input = u.input + u.cache_read + u.cache_write;
    let total = if u.total > 0 { u.total } else { input + u.output };
    TokenTotals {
        input_tokens: input,
        cached_read_tokens: u.cache_read,
        cached_create_tokens: u.cache_write,
        output_tokens: u.output,
        reasoning_output_tokens: 0,
        total_tokens: total,
    }
}

fn block_text(content: &Option<Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

/// Pi agent session parser (`~/.pi/agent/sessions/*.jsonl`).
///
/// Content blocks use camelCase tags (`toolCall`, `toolResult`); usage may
/// carry a pre-computed `cost.total`, which wins over rate-card math.
pub struct PiParser {
    redactor: Arc<Redactor>,
}

impl PiParser {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self { redactor }
    }
}

impl TraceParser for PiParser {
    fn id(&self) -> &'static str {
        "pi"
    }

    fn agent(&self) -> Agent {
        Agent::Pi
    }

    fn matches_path(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        s.contains("/.pi/agent/sessions/") && s.ends_with(".jsonl")
    }

    fn probe_first_line(&self, line: &str) -> bool {
        let Ok(v) = serde_json::from_str::<Value>(line) else {
            return false;
        };
        matches!(
            v.get("type").and_then(|t| t.as_str()),
            Some("session") | Some("message")
        )
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

            let record: PiRecord = match serde_json::from_value(value.clone()) {
                Ok(r) => r,
                Err(_) => PiRecord::Unknown,
            };

            let base_id = format!("e{}", line.start);
            match record {
                PiRecord::Session(session) => {
                    if let Some(id) = &session.id {
                        builder.carry_mut().session_id = id.clone();
                    }
                    if let Some(cwd) = &session.cwd {
                        builder.carry_mut().session_cwd = cwd.clone();
                    }
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id: base_id,
                            offset: line.start,
                            timestamp_ms: session
                                .timestamp
                                .as_ref()
                                .and_then(timestamp_ms_from_value),
                            event_kind: EventKind::Meta,
                            raw_type: "session".to_string(),
                            text_blocks: session.cwd.clone().map(|c| vec![c]).unwrap_or_default(),
                            raw: value,
                            ..Default::default()
                        },
                    );
                }

                PiRecord::Message(record) => {
                    let timestamp = record
                        .timestamp
                        .as_ref()
                        .and_then(timestamp_ms_from_value);
                    let message = &record.message;
                    let is_user = message.role == "user";
                    let mut last_event_id = String::new();
                    let mut emitted = 0usize;

                    let blocks: Vec<&PiContent> = match &message.content {
                        PiContentField::Text(_) => Vec::new(),
                        PiContentField::Blocks(blocks) => blocks.iter().collect(),
                    };

                    if let PiContentField::Text(text) = &message.content {
                        last_event_id = builder.push(
                            &mut events,
                            EventDraft {
                                event_id: format!("{}-0", base_id),
                                offset: line.start,
                                timestamp_ms: timestamp,
                                event_kind: if is_user {
                                    EventKind::User
                                } else {
                                    EventKind::Assistant
                                },
                                raw_type: "message/text".to_string(),
                                role: message.role.clone(),
                                text_blocks: vec![text.clone()],
                                raw: value.clone(),
                                ..Default::default()
                            },
                        );
                        emitted += 1;
                    }

                    for (idx, block) in blocks.iter().enumerate() {
                        let event_id = format!("{}-{}", base_id, idx);
                        match block {
                            PiContent::Text { text } => {
                                last_event_id = builder.push(
                                    &mut events,
                                    EventDraft {
                                        event_id,
                                        offset: line.start,
                                        timestamp_ms: timestamp,
                                        event_kind: if is_user {
                                            EventKind::User
                                        } else {
                                            EventKind::Assistant
                                        },
                                        raw_type: "message/text".to_string(),
                                        role: message.role.clone(),
                                        text_blocks: vec![text.clone()],
                                        raw: value.clone(),
                                        ..Default::default()
                                    },
                                );
                                emitted += 1;
                            }
                            PiContent::Thinking { thinking } => {
                                last_event_id = builder.push(
                                    &mut events,
                                    EventDraft {
                                        event_id,
                                        offset: line.start,
                                        timestamp_ms: timestamp,
                                        event_kind: EventKind::Reasoning,
                                        raw_type: "message/thinking".to_string(),
                                        role: "assistant".to_string(),
                                        text_blocks: vec![thinking.clone()],
                                        raw: value.clone(),
                                        ..Default::default()
                                    },
                                );
                                emitted += 1;
                            }
                            PiContent::ToolCall {
                                id,
                                name,
                                arguments,
                            } => {
                                let args = if arguments.is_null() {
                                    String::new()
                                } else {
                                    arguments.to_string()
                                };
                                last_event_id = builder.push(
                                    &mut events,
                                    EventDraft {
                                        event_id,
                                        offset: line.start,
                                        timestamp_ms: timestamp,
                                        event_kind: EventKind::ToolUse,
                                        raw_type: "message/toolCall".to_string(),
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
                                emitted += 1;
                            }
                            PiContent::ToolResult {
                                tool_call_id,
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
                                        raw_type: "message/toolResult".to_string(),
                                        tool_call_id: tool_call_id.clone(),
                                        tool_result_text: block_text(content),
                                        has_error: is_error.unwrap_or(false),
                                        raw: value.clone(),
                                        ..Default::default()
                                    },
                                );
                                emitted += 1;
                            }
                            PiContent::Unknown => {}
                        }
                    }

                    if let Some(usage) = &message.usage {
                        let sample = UsageSample {
                            model: message.model.clone().unwrap_or_default(),
                            tokens: usage_to_totals(usage),
                            precomputed_cost_usd: usage.cost.as_ref().map(|c| c.total),
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
                                    event_id: format!("{}-usage", base_id),
                                    offset: line.start,
                                    timestamp_ms: timestamp,
                                    event_kind: EventKind::Meta,
                                    raw_type: "message/usage".to_string(),
                                    usage: Some(sample),
                                    raw: value.clone(),
                                    ..Default::default()
                                },
                            );
                        }
                    }
                }

                PiRecord::Unknown => {
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id: base_id,
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
