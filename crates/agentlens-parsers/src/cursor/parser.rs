use agentlens_types::{Agent, EventKind, TokenTotals, UsageSample};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::builder::{EventBuilder, EventDraft};
use crate::io::read_jsonl;
use crate::redact::Redactor;
use crate::tool_mapping::normalize_tool_type;
use crate::traits::{ParseOutcome, ResumeState, TraceParser};
use crate::Result;

/// Coarse token estimate used when a transcript carries no usage counters
const CHARS_PER_TOKEN: usize = 4;

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count().div_ceil(CHARS_PER_TOKEN)) as u64
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Directive {
    User,
    Assistant,
    Thinking,
    ToolCall,
    ToolResult,
}

/// Split a line into its directive and any same-line remainder.
fn parse_directive(line: &str) -> Option<(Directive, String)> {
    if let Some(rest) = line.strip_prefix("user:") {
        return Some((Directive::User, rest.trim().to_string()));
    }
    if let Some(rest) = line.strip_prefix("assistant:") {
        return Some((Directive::Assistant, rest.trim().to_string()));
    }
    if let Some(rest) = line.strip_prefix("[Thinking]") {
        return Some((Directive::Thinking, rest.trim().to_string()));
    }
    if let Some(rest) = line.strip_prefix("[Tool call]") {
        return Some((Directive::ToolCall, rest.trim().to_string()));
    }
    if let Some(rest) = line.strip_prefix("[Tool result]") {
        return Some((Directive::ToolResult, rest.trim().to_string()));
    }
    None
}

struct Group {
    directive: Directive,
    /// Tool name for call/result directives, first-line text otherwise
    head: String,
    body: Vec<String>,
    offset: u64,
}

/// Cursor agent-transcript parser
/// (`~/.cursor/projects/<key>/agent-transcripts/<session>.txt`).
///
/// The format is plain text with directive lines. Groups become events;
/// tool call/result pairs get synthetic call ids matched by name, most
/// recent first. Token totals are estimated at ~4 chars/token since the
/// transcript carries no counters. The whole file is reparsed on change;
/// a group may still be growing at the tail, so append resume would split
/// events mid-group.
pub struct CursorParser {
    redactor: Arc<Redactor>,
}

impl CursorParser {
    pub fn new(redactor: Arc<Redactor>) -> Self {
        Self { redactor }
    }
}

impl TraceParser for CursorParser {
    fn id(&self) -> &'static str {
        "cursor"
    }

    fn agent(&self) -> Agent {
        Agent::Cursor
    }

    fn matches_path(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        s.contains("/.cursor/projects/")
            && s.contains("/agent-transcripts/")
            && s.ends_with(".txt")
    }

    fn probe_first_line(&self, line: &str) -> bool {
        parse_directive(line).is_some()
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
        let chunk = read_jsonl(path, None)?;

        // Session id is the file stem; Cursor does not embed one
        let session_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut groups: Vec<Group> = Vec::new();
        for line in &chunk.lines {
            match parse_directive(&line.text) {
                Some((directive, rest)) => {
                    groups.push(Group {
                        directive,
                        head: rest,
                        body: Vec::new(),
                        offset: line.start,
                    });
                }
                None => {
                    if let Some(group) = groups.last_mut() {
                        group.body.push(line.text.clone());
                    }
                    // Text before the first directive is preamble; dropped
                }
            }
        }

        let mut builder = EventBuilder::new(trace_id, 0, Default::default(), &self.redactor);
        let mut events = Vec::new();
        let mut call_seq: u64 = 0;
        // Tool name -> open synthetic call ids, most recent last
        let mut open_calls: HashMap<String, Vec<String>> = HashMap::new();

        for group in &groups {
            let event_id = format!("e{}", group.offset);
            let body_text = group.body.join("\n").trim().to_string();
            match group.directive {
                Directive::User | Directive::Assistant | Directive::Thinking => {
                    let mut text = String::new();
                    if !group.head.is_empty() {
                        text.push_str(&group.head);
                    }
                    if !body_text.is_empty() {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(&body_text);
                    }

                    let (kind, role, raw_type) = match group.directive {
                        Directive::User => (EventKind::User, "user", "user"),
                        Directive::Assistant => (EventKind::Assistant, "assistant", "assistant"),
                        _ => (EventKind::Reasoning, "assistant", "thinking"),
                    };

                    let tokens = estimate_tokens(&text);
                    let usage = if tokens > 0 {
                        let totals = if kind == EventKind::User {
                            TokenTotals {
                                input_tokens: tokens,
                                total_tokens: tokens,
                                ..Default::default()
                            }
                        } else {
                            TokenTotals {
                                output_tokens: tokens,
                                total_tokens: tokens,
                                ..Default::default()
                            }
                        };
                        Some(UsageSample {
                            model: String::new(),
                            tokens: totals,
                            precomputed_cost_usd: None,
                            dedup_key: String::new(),
                        })
                    } else {
                        None
                    };

                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id,
                            offset: group.offset,
                            timestamp_ms: None,
                            event_kind: kind,
                            raw_type: raw_type.to_string(),
                            role: role.to_string(),
                            text_blocks: if text.is_empty() { vec![] } else { vec![text.clone()] },
                            usage,
                            raw: json!({ "directive": raw_type, "text": text }),
                            ..Default::default()
                        },
                    );
                }

                Directive::ToolCall => {
                    let name = group.head.clone();
                    call_seq += 1;
                    let call_id = format!("cursor-call-{}", call_seq);
                    open_calls.entry(name.clone()).or_default().push(call_id.clone());

                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id,
                            offset: group.offset,
                            timestamp_ms: None,
                            event_kind: EventKind::ToolUse,
                            raw_type: "tool_call".to_string(),
                            role: "assistant".to_string(),
                            tool_call_id: call_id,
                            tool_name: name.clone(),
                            tool_type: normalize_tool_type(&name),
                            tool_args_text: body_text.clone(),
                            function_name: name.clone(),
                            raw: json!({ "directive": "tool_call", "name": name, "args": body_text }),
                            ..Default::default()
                        },
                    );
                }

                Directive::ToolResult => {
                    let name = group.head.clone();
                    let call_id = open_calls
                        .get_mut(&name)
                        .and_then(|stack| stack.pop())
                        .unwrap_or_default();

                    builder.push(
                        &mut events,
                        EventDraft {
                            event_id,
                            offset: group.offset,
                            timestamp_ms: None,
                            event_kind: EventKind::ToolResult,
                            raw_type: "tool_result".to_string(),
                            tool_call_id: call_id,
                            tool_name: name.clone(),
                            tool_result_text: body_text.clone(),
                            raw: json!({ "directive": "tool_result", "name": name, "output": body_text }),
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
                offset: chunk.file_len,
                prefix_sha256: chunk.prefix_hash(chunk.file_len),
                event_count,
                carry,
            },
        })
    }
}
