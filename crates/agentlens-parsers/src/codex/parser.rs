use agentlens_types::{
    time::timestamp_ms_from_value, Agent, EventKind, TokenTotals, UsageSample,
};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use crate::builder::{EventBuilder, EventDraft};
use crate::codex::schema::*;
use crate::io::read_jsonl;
use crate::redact::Redactor;
use crate::tool_mapping::{normalize_tool_type, web_action_tool_type};
use crate::traits::{ParseOutcome, ResumeState, TraceParser};
use crate::Result;

/// Regex for extracting exit codes from Codex tool output
/// Example: "Exit code: 0" or "Exit Code: 0" (case-insensitive)
static EXIT_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Exit Code:\s*(\d+)").unwrap());

fn extract_exit_code(output: &str) -> Option<i32> {
    EXIT_CODE_REGEX
        .captures(output)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn record_timestamp_ms(value: &Option<Value>) -> Option<i64> {
    value.as_ref().and_then(timestamp_ms_from_value)
}

fn usage_to_totals(u: &CodexTokenUsage) -> TokenTotals {
    let total = if u.total > 0 {
        u.total
    } else {
        u.input + u.output
    };
    TokenTotals {
        input_tokens: u.input,
        cached_read_tokens: u.cached_input,
        cached_create_tokens: 0,
        output_tokens: u.output,
        reasoning_output_tokens: u.reasoning_output,
        total_tokens: total,
    }
}

/// Codex CLI session parser (`~/.codex/sessions/**/*.jsonl`).
///
/// Every well-formed record maps to exactly one event. Token counters only
/// exist in `event_msg` records; each delta is attributed to the model the
/// last `turn_context` announced.
pub struct CodexParser {
    redactor: Arc<Redactor>,
}

impl CodexParser {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self { redactor }
    }
}

impl TraceParser for CodexParser {
    fn id(&self) -> &'static str {
        "codex"
    }

    fn agent(&self) -> Agent {
        Agent::Codex
    }

    fn matches_path(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        s.contains("/.codex/sessions/") && s.ends_with(".jsonl")
    }

    fn probe_first_line(&self, line: &str) -> bool {
        let Ok(v) = serde_json::from_str::<Value>(line) else {
            return false;
        };
        matches!(
            v.get("type").and_then(|t| t.as_str()),
            Some("session_meta") | Some("response_item") | Some("event_msg")
                | Some("turn_context")
        ) && v.get("payload").is_some()
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
                Err(_) if !line.terminated => break, // mid-append, retry next pass
                Err(_) => {
                    error_count += 1;
                    consumed = line.end;
                    continue;
                }
            };
            consumed = line.end;

            let record: CodexRecord = match serde_json::from_value(value.clone()) {
                Ok(r) => r,
                Err(_) => CodexRecord::Unknown,
            };

            let event_id = format!("e{}", line.start);
            match record {
                CodexRecord::SessionMeta(meta) => {
                    builder.carry_mut().session_id = meta.payload.id.clone();
                    if let Some(cwd) = &meta.payload.cwd {
                        builder.carry_mut().session_cwd = cwd.clone();
                    }
                    let text = meta
                        .payload
                        .cwd
                        .clone()
                        .or(meta.payload.originator.clone())
                        .unwrap_or_default();
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id,
                            offset: line.start,
                            timestamp_ms: record_timestamp_ms(&meta.timestamp),
                            event_kind: EventKind::Meta,
                            raw_type: "session_meta".to_string(),
                            text_blocks: if text.is_empty() { vec![] } else { vec![text] },
                            raw: value,
                            ..Default::default()
                        },
                    );
                }

                CodexRecord::TurnContext(turn) => {
                    builder.carry_mut().active_model = turn.payload.model.clone();
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id,
                            offset: line.start,
                            timestamp_ms: record_timestamp_ms(&turn.timestamp),
                            event_kind: EventKind::Meta,
                            raw_type: "turn_context".to_string(),
                            text_blocks: vec![turn.payload.model.clone()],
                            raw: value,
                            ..Default::default()
                        },
                    );
                }

                CodexRecord::ResponseItem(item) => {
                    let ts = record_timestamp_ms(&item.timestamp);
                    match item.payload {
                        ResponseItemPayload::Message(message) => {
                            let text: Vec<String> = message
                                .content
                                .iter()
                                .filter_map(|c| match c {
                                    MessageContent::InputText { text }
                                    | MessageContent::OutputText { text } => {
                                        Some(text.clone())
                                    }
                                    MessageContent::Unknown => None,
                                })
                                .collect();
                            let (kind, role) = if message.role == "user" {
                                (EventKind::User, "user")
                            } else if message.role == "assistant" {
                                (EventKind::Assistant, "assistant")
                            } else {
                                (EventKind::System, "")
                            };
                            builder.push(
                                &mut events,
                                EventDraft {
                                    event_id,
                                    offset: line.start,
                                    timestamp_ms: ts,
                                    event_kind: kind,
                                    raw_type: "response_item/message".to_string(),
                                    role: role.to_string(),
                                    text_blocks: text,
                                    raw: value,
                                    ..Default::default()
                                },
                            );
                        }

                        ResponseItemPayload::Reasoning(reasoning) => {
                            let summary = reasoning
                                .summary
                                .iter()
                                .filter_map(|s| match s {
                                    SummaryText::SummaryText { text } => Some(text.as_str()),
                                    SummaryText::Unknown => None,
                                })
                                .collect::<Vec<_>>()
                                .join("\n");
                            let text = reasoning.content.clone().unwrap_or(summary);
                            builder.push(
                                &mut events,
                                EventDraft {
                                    event_id,
                                    offset: line.start,
                                    timestamp_ms: ts,
                                    event_kind: EventKind::Reasoning,
                                    raw_type: "response_item/reasoning".to_string(),
                                    role: "assistant".to_string(),
                                    text_blocks: if text.is_empty() { vec![] } else { vec![text] },
                                    raw: value,
                                    ..Default::default()
                                },
                            );
                        }

                        ResponseItemPayload::FunctionCall(call) => {
                            builder.push(
                                &mut events,
                                EventDraft {
                                    event_id,
                                    offset: line.start,
                                    timestamp_ms: ts,
                                    event_kind: EventKind::ToolUse,
                                    raw_type: "response_item/function_call".to_string(),
                                    role: "assistant".to_string(),
                                    tool_call_id: call.call_id.clone(),
                                    tool_name: call.name.clone(),
                                    tool_type: normalize_tool_type(&call.name),
                                    tool_args_text: call.arguments.clone(),
                                    function_name: call.name.clone(),
                                    raw: value,
                                    ..Default::default()
                                },
                            );
                        }

                        ResponseItemPayload::FunctionCallOutput(output) => {
                            let text = output.output.to_text();
                            let exit_code = extract_exit_code(&text);
                            builder.push(
                                &mut events,
                                EventDraft {
                                    event_id,
                                    offset: line.start,
                                    timestamp_ms: ts,
                                    event_kind: EventKind::ToolResult,
                                    raw_type: "response_item/function_call_output"
                                        .to_string(),
                                    tool_call_id: output.call_id.clone(),
                                    tool_result_text: text,
                                    has_error: exit_code.map(|c| c != 0).unwrap_or(false),
                                    raw: value,
                                    ..Default::default()
                                },
                            );
                        }

                        ResponseItemPayload::WebSearchCall(web) => {
                            let (tool_type, args) = match &web.action {
                                Some(action) => (
                                    web_action_tool_type(&action.action_type),
                                    action
                                        .query
                                        .clone()
                                        .or(action.url.clone())
                                        .or(action.pattern.clone())
                                        .unwrap_or_default(),
                                ),
                                None => ("web:search".to_string(), String::new()),
                            };
                            builder.push(
                                &mut events,
                                EventDraft {
                                    event_id,
                                    offset: line.start,
                                    timestamp_ms: ts,
                                    event_kind: EventKind::ToolUse,
                                    raw_type: "response_item/web_search_call".to_string(),
                                    role: "assistant".to_string(),
                                    tool_name: "web_search".to_string(),
                                    tool_type,
                                    tool_args_text: args,
                                    raw: value,
                                    ..Default::default()
                                },
                            );
                        }

                        ResponseItemPayload::Unknown => {
                            builder.push(
                                &mut events,
                                EventDraft {
                                    event_id,
                                    offset: line.start,
                                    timestamp_ms: ts,
                                    event_kind: EventKind::Meta,
                                    raw_type: "response_item".to_string(),
                                    raw: value,
                                    ..Default::default()
                                },
                            );
                        }
                    }
                }

                CodexRecord::EventMsg(event_msg) => {
                    let ts = record_timestamp_ms(&event_msg.timestamp);
                    match event_msg.payload {
                        EventMsgPayload::TokenCount(token_count) => {
                            let delta = token_delta(&token_count, builder.carry_mut());
                            let Some(delta) = delta else {
                                // Duplicate notification, already counted
                                continue;
                            };
                            let model = builder.carry().active_model.clone();
                            builder.push(
                                &mut events,
                                EventDraft {
                                    event_id,
                                    offset: line.start,
                                    timestamp_ms: ts,
                                    event_kind: EventKind::Meta,
                                    raw_type: "event_msg/token_count".to_string(),
                                    usage: Some(UsageSample {
                                        model,
                                        tokens: delta,
                                        precomputed_cost_usd: None,
                                        dedup_key: String::new(),
                                    }),
                                    raw: value,
                                    ..Default::default()
                                },
                            );
                        }
                        EventMsgPayload::Unknown => {
                            builder.push(
                                &mut events,
                                EventDraft {
                                    event_id,
                                    offset: line.start,
                                    timestamp_ms: ts,
                                    event_kind: EventKind::Meta,
                                    raw_type: "event_msg".to_string(),
                                    raw: value,
                                    ..Default::default()
                                },
                            );
                        }
                    }
                }

                CodexRecord::Unknown => {
                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id,
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

/// Work out the per-turn token delta for one token_count record.
/// Returns None when the record repeats the previous notification.
fn token_delta(
    payload: &TokenCountPayload,
    carry: &mut crate::traits::ParserCarry,
) -> Option<TokenTotals> {
    // Preferred: explicit per-turn delta
    let last = payload
        .info
        .as_ref()
        .map(|i| i.last_token_usage)
        .or(payload.last);

    if let Some(last) = last {
        let totals = usage_to_totals(&last);
        if carry.last_token_totals == Some(totals) {
            return None;
        }
        carry.last_token_totals = Some(totals);
        if let Some(info) = &payload.info {
            carry.cumulative_tokens = Some(usage_to_totals(&info.total_token_usage));
        }
        return Some(totals);
    }

    // Fallback: cumulative totals only; emit the increase since last time
    let cumulative = payload
        .info
        .as_ref()
        .map(|i| i.total_token_usage)
        .or(payload.total)?;
    let cumulative = usage_to_totals(&cumulative);
    let prior = carry.cumulative_tokens.unwrap_or_default();
    if cumulative == prior {
        return None;
    }
    let delta = TokenTotals {
        input_tokens: cumulative.input_tokens.saturating_sub(prior.input_tokens),
        cached_read_tokens: cumulative
            .cached_read_tokens
            .saturating_sub(prior.cached_read_tokens),
        cached_create_tokens: cumulative
            .cached_create_tokens
            .saturating_sub(prior.cached_create_tokens),
        output_tokens: cumulative.output_tokens.saturating_sub(prior.output_tokens),
        reasoning_output_tokens: cumulative
            .reasoning_output_tokens
            .saturating_sub(prior.reasoning_output_tokens),
        total_tokens: cumulative.total_tokens.saturating_sub(prior.total_tokens),
    };
    carry.cumulative_tokens = Some(cumulative);
    Some(delta)
}
