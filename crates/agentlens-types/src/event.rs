use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EventKind;

// NOTE: Schema Design Goals
//
// 1. Normalization: every transcript format collapses into this one flat
//    record. Provider quirks (Codex async token notifications, Claude
//    content-block fan-out, OpenCode part files) are resolved at parse time,
//    not query time.
//
// 2. Ordering: events are ordered by discovery position (byte/record offset
//    within the trace), never by timestamp. Timestamps may be absent or
//    non-monotonic in the wild.
//
// 3. Tool linkage is a relation, not a pointer: a tool_result names the
//    tool_call_id of a prior tool_use. Unmatched ends are counted on the
//    summary and the events are kept.

/// One normalized transcript event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Stable within a trace; parser-supplied or derived from offset+type
    pub event_id: String,
    /// Trace the event belongs to (hash of the transcript path)
    pub trace_id: String,
    /// 0-based rank within the trace's event sequence
    pub index: usize,
    /// Monotonic byte or record position, used for incremental resume
    pub offset: u64,
    /// Milliseconds since epoch; None when the source record carries no time
    pub timestamp_ms: Option<i64>,
    pub event_kind: EventKind,
    /// Parser-native type string (e.g. "response_item/function_call")
    pub raw_type: String,
    /// "user", "assistant", or ""
    #[serde(default)]
    pub role: String,
    /// One-line summary, capped at ~200 chars
    pub preview: String,
    /// Ordered text fragments belonging to the event
    #[serde(default)]
    pub text_blocks: Vec<String>,

    // Tool linkage
    #[serde(default)]
    pub tool_call_id: String,
    #[serde(default)]
    pub tool_name: String,
    /// Normalized category: "bash", "read", "edit", "web:search", ...
    #[serde(default)]
    pub tool_type: String,
    #[serde(default)]
    pub tool_args_text: String,
    #[serde(default)]
    pub tool_result_text: String,
    #[serde(default)]
    pub parent_tool_use_id: String,
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub parent_event_id: String,

    /// Display string for the table-of-contents row
    pub toc_label: String,
    #[serde(default)]
    pub has_error: bool,
    /// Lowercased concatenation used for substring filtering
    #[serde(default)]
    pub search_text: String,
    /// Usage counters carried by this event, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSample>,
    /// Redacted original record, preserved for UI inspection
    pub raw: Value,
}

impl NormalizedEvent {
    pub fn is_meta(&self) -> bool {
        self.event_kind == EventKind::Meta
    }
}

/// Token counters in the common shape every parser maps into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub cached_read_tokens: u64,
    pub cached_create_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenTotals {
    pub fn is_empty(&self) -> bool {
        *self == TokenTotals::default()
    }

    /// Fold another usage sample into the running totals.
    pub fn add(&mut self, other: &TokenTotals) {
        self.input_tokens += other.input_tokens;
        self.cached_read_tokens += other.cached_read_tokens;
        self.cached_create_tokens += other.cached_create_tokens;
        self.output_tokens += other.output_tokens;
        self.reasoning_output_tokens += other.reasoning_output_tokens;
        self.total_tokens += other.total_tokens;
    }

    /// Input tokens billable at the full input rate.
    /// Cached reads/creates are never billed as fresh input.
    pub fn non_cached_input(&self) -> u64 {
        self.input_tokens
            .saturating_sub(self.cached_read_tokens)
            .saturating_sub(self.cached_create_tokens)
    }
}

/// Per-event usage sample attributed to a model, as emitted by parsers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    /// Model the sample belongs to; empty when the source does not say
    #[serde(default)]
    pub model: String,
    pub tokens: TokenTotals,
    /// Pre-computed cost in USD when the source supplies one (Pi)
    #[serde(default)]
    pub precomputed_cost_usd: Option<f64>,
    /// Retransmission guard: samples sharing a non-empty key count once
    /// (Claude pairs request_id with message.id)
    #[serde(default)]
    pub dedup_key: String,
}
