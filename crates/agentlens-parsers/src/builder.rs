use agentlens_types::{one_line_preview, EventKind, NormalizedEvent, UsageSample, PREVIEW_MAX_CHARS};
use serde_json::Value;

use crate::redact::Redactor;
use crate::tool_mapping::toc_label;
use crate::traits::ParserCarry;

/// Raw material for one normalized event, before the builder fills in
/// ordering, linkage, preview, search text, and redaction.
#[derive(Debug, Default)]
pub struct EventDraft {
    /// Parser-chosen id, unique within the trace (offset- or uuid-based)
    pub event_id: String,
    /// Byte or record position the event came from
    pub offset: u64,
    pub timestamp_ms: Option<i64>,
    pub event_kind: EventKind,
    pub raw_type: String,
    pub role: String,
    pub text_blocks: Vec<String>,
    pub tool_call_id: String,
    pub tool_name: String,
    pub tool_type: String,
    pub tool_args_text: String,
    pub tool_result_text: String,
    pub parent_tool_use_id: String,
    pub function_name: String,
    pub has_error: bool,
    pub usage: Option<UsageSample>,
    pub raw: Value,
}

/// Converts parser drafts into finished events.
///
/// Maintains the event index, the parent chain, and the provider
/// tool-call-id relation so a tool_result can point back at its tool_use.
/// The relation lives in `ParserCarry` and therefore survives incremental
/// append boundaries.
pub struct EventBuilder<'r> {
    trace_id: String,
    next_index: usize,
    redactor: &'r Redactor,
    carry: ParserCarry,
}

impl<'r> EventBuilder<'r> {
    pub fn new(
        trace_id: &str,
        start_index: usize,
        carry: ParserCarry,
        redactor: &'r Redactor,
    ) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            next_index: start_index,
            redactor,
            carry,
        }
    }

    /// Finish a draft and push it. Returns the event id.
    pub fn push(&mut self, events: &mut Vec<NormalizedEvent>, mut draft: EventDraft) -> String {
        // Redaction happens here so no parser can leak an unmasked field
        for block in draft.text_blocks.iter_mut() {
            *block = self.redactor.redact_str(block);
        }
        draft.tool_args_text = self.redactor.redact_str(&draft.tool_args_text);
        draft.tool_result_text = self.redactor.redact_str(&draft.tool_result_text);
        self.redactor.redact_value(&mut draft.raw);

        let preview_source = draft
            .text_blocks
            .iter()
            .find(|b| !b.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| {
                if !draft.tool_args_text.is_empty() {
                    draft.tool_args_text.clone()
                } else if !draft.tool_result_text.is_empty() {
                    draft.tool_result_text.clone()
                } else {
                    String::new()
                }
            });
        let preview = one_line_preview(&preview_source, PREVIEW_MAX_CHARS);

        let label = toc_label(draft.event_kind, &draft.tool_name, &draft.raw_type);

        let mut search_parts: Vec<&str> = Vec::new();
        search_parts.push(&preview);
        for block in &draft.text_blocks {
            search_parts.push(block);
        }
        search_parts.push(&draft.tool_name);
        search_parts.push(&draft.tool_args_text);
        search_parts.push(&draft.tool_result_text);
        let search_text = search_parts
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        // Tool relation bookkeeping
        let mut parent_event_id = self.carry.last_event_id.clone();
        match draft.event_kind {
            EventKind::ToolUse if !draft.tool_call_id.is_empty() => {
                self.carry
                    .tool_use_events
                    .insert(draft.tool_call_id.clone(), draft.event_id.clone());
                if !draft.tool_name.is_empty() {
                    self.carry
                        .tool_names
                        .insert(draft.tool_call_id.clone(), draft.tool_name.clone());
                }
            }
            EventKind::ToolResult if !draft.tool_call_id.is_empty() => {
                if let Some(use_id) = self.carry.tool_use_events.get(&draft.tool_call_id) {
                    parent_event_id = use_id.clone();
                }
                if draft.tool_name.is_empty() {
                    if let Some(name) = self.carry.tool_names.get(&draft.tool_call_id) {
                        draft.tool_name = name.clone();
                    }
                }
            }
            _ => {}
        }

        // Result rows relabel once the tool name is known
        let label = if draft.event_kind == EventKind::ToolResult {
            toc_label(draft.event_kind, &draft.tool_name, &draft.raw_type)
        } else {
            label
        };

        let event = NormalizedEvent {
            event_id: draft.event_id.clone(),
            trace_id: self.trace_id.clone(),
            index: self.next_index,
            offset: draft.offset,
            timestamp_ms: draft.timestamp_ms,
            event_kind: draft.event_kind,
            raw_type: draft.raw_type,
            role: draft.role,
            preview,
            text_blocks: draft.text_blocks,
            tool_call_id: draft.tool_call_id,
            tool_name: draft.tool_name,
            tool_type: draft.tool_type,
            tool_args_text: draft.tool_args_text,
            tool_result_text: draft.tool_result_text,
            parent_tool_use_id: draft.parent_tool_use_id,
            function_name: draft.function_name,
            parent_event_id,
            toc_label: label,
            has_error: draft.has_error,
            search_text,
            usage: draft.usage,
            raw: draft.raw,
        };

        self.next_index += 1;
        self.carry.last_event_id = event.event_id.clone();
        events.push(event);
        self.carry.last_event_id.clone()
    }

    /// Name recorded for a provider tool call id, if the tool_use was seen.
    pub fn tool_name_for(&self, call_id: &str) -> Option<&str> {
        self.carry.tool_names.get(call_id).map(|s| s.as_str())
    }

    pub fn carry(&self) -> &ParserCarry {
        &self.carry
    }

    pub fn carry_mut(&mut self) -> &mut ParserCarry {
        &mut self.carry
    }

    pub fn into_carry(self) -> ParserCarry {
        self.carry
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }
}
