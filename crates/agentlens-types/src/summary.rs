use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Agent, EventKind, NormalizedEvent, TokenTotals};

/// Derived liveness of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Running,
    WaitingInput,
    Idle,
}

/// How the activity profile was binned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityBinsMode {
    Time,
    EventIndex,
}

/// Memory-management label for a trace's event array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidentTier {
    Hot,
    Warm,
    Cold,
}

/// Fixed bin count of the activity profile
pub const ACTIVITY_BIN_COUNT: usize = 12;

/// Per-EventKind counters (closed set, so a struct rather than a map)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventKindCounts {
    pub system: u64,
    pub user: u64,
    pub assistant: u64,
    pub tool_use: u64,
    pub tool_result: u64,
    pub reasoning: u64,
    pub meta: u64,
}

impl EventKindCounts {
    pub fn increment(&mut self, kind: EventKind) {
        match kind {
            EventKind::System => self.system += 1,
            EventKind::User => self.user += 1,
            EventKind::Assistant => self.assistant += 1,
            EventKind::ToolUse => self.tool_use += 1,
            EventKind::ToolResult => self.tool_result += 1,
            EventKind::Reasoning => self.reasoning += 1,
            EventKind::Meta => self.meta += 1,
        }
    }

    pub fn get(&self, kind: EventKind) -> u64 {
        match kind {
            EventKind::System => self.system,
            EventKind::User => self.user,
            EventKind::Assistant => self.assistant,
            EventKind::ToolUse => self.tool_use,
            EventKind::ToolResult => self.tool_result,
            EventKind::Reasoning => self.reasoning,
            EventKind::Meta => self.meta,
        }
    }

    pub fn sum(&self) -> u64 {
        self.system
            + self.user
            + self.assistant
            + self.tool_use
            + self.tool_result
            + self.reasoning
            + self.meta
    }

    pub fn merge(&mut self, other: &EventKindCounts) {
        self.system += other.system;
        self.user += other.user;
        self.assistant += other.assistant;
        self.tool_use += other.tool_use;
        self.tool_result += other.tool_result;
        self.reasoning += other.reasoning;
        self.meta += other.meta;
    }
}

/// One entry of the per-model token breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTokenShare {
    pub model: String,
    pub tokens: u64,
    pub percent: f64,
}

/// Everything the UI needs to render one trace row.
/// One per discovered transcript; rebuilt or folded on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    // Identity
    pub id: String,
    pub path: String,
    pub source_profile: String,
    pub parser: String,
    pub agent: Agent,
    #[serde(default)]
    pub session_id: String,

    // File state
    pub size_bytes: u64,
    pub mtime_ms: i64,
    pub parseable: bool,
    #[serde(default)]
    pub parse_error: String,

    // Event stats
    pub first_event_ts: Option<i64>,
    pub last_event_ts: Option<i64>,
    pub event_count: u64,
    pub error_count: u64,
    pub tool_use_count: u64,
    pub tool_result_count: u64,
    pub unmatched_tool_uses: u64,
    pub unmatched_tool_results: u64,
    pub event_kind_counts: EventKindCounts,

    // Liveness
    pub activity_status: ActivityStatus,
    #[serde(default)]
    pub activity_reason: String,

    // Activity profile
    pub activity_bins: Vec<f64>,
    pub activity_bins_mode: ActivityBinsMode,
    pub activity_window_minutes: f64,
    pub activity_bin_minutes: f64,
    pub activity_bin_count: usize,

    // Metrics
    pub token_totals: TokenTotals,
    pub model_token_shares_top: Vec<ModelTokenShare>,
    pub model_token_shares_estimated: bool,
    pub context_window_pct: Option<f64>,
    pub cost_estimate_usd: Option<f64>,

    // Residency
    pub resident_tier: ResidentTier,
    pub is_materialized: bool,
}

impl TraceSummary {
    /// Skeleton for a freshly discovered trace before any parse succeeded.
    pub fn placeholder(
        id: String,
        path: String,
        source_profile: String,
        parser: String,
        agent: Agent,
    ) -> Self {
        Self {
            id,
            path,
            source_profile,
            parser,
            agent,
            session_id: String::new(),
            size_bytes: 0,
            mtime_ms: 0,
            parseable: false,
            parse_error: String::new(),
            first_event_ts: None,
            last_event_ts: None,
            event_count: 0,
            error_count: 0,
            tool_use_count: 0,
            tool_result_count: 0,
            unmatched_tool_uses: 0,
            unmatched_tool_results: 0,
            event_kind_counts: EventKindCounts::default(),
            activity_status: ActivityStatus::Idle,
            activity_reason: String::new(),
            activity_bins: vec![0.0; ACTIVITY_BIN_COUNT],
            activity_bins_mode: ActivityBinsMode::EventIndex,
            activity_window_minutes: 0.0,
            activity_bin_minutes: 0.0,
            activity_bin_count: ACTIVITY_BIN_COUNT,
            token_totals: TokenTotals::default(),
            model_token_shares_top: Vec::new(),
            model_token_shares_estimated: false,
            context_window_pct: None,
            cost_estimate_usd: None,
            resident_tier: ResidentTier::Cold,
            is_materialized: false,
        }
    }

    /// Timestamp the liveness derivation ages against.
    pub fn updated_ms(&self) -> i64 {
        self.last_event_ts.unwrap_or(0).max(self.mtime_ms)
    }
}

/// Compact table-of-contents row, one per event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocRow {
    pub event_id: String,
    pub index: usize,
    pub timestamp_ms: Option<i64>,
    pub event_kind: EventKind,
    pub label: String,
    pub color_key: String,
    #[serde(default)]
    pub tool_type: String,
}

impl TocRow {
    pub fn from_event(event: &NormalizedEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            index: event.index,
            timestamp_ms: event.timestamp_ms,
            event_kind: event.event_kind,
            label: event.toc_label.clone(),
            color_key: event.event_kind.as_str().to_string(),
            tool_type: event.tool_type.clone(),
        }
    }
}

/// Paged detail view of one trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracePage {
    pub summary: TraceSummary,
    pub events: Vec<NormalizedEvent>,
    pub toc: Vec<TocRow>,
    /// Cursor for older events; None when the page reaches the start
    pub next_before: Option<u64>,
    /// Newest served offset
    pub live_cursor: u64,
}

/// Aggregates across all indexed traces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverviewStats {
    pub trace_count: u64,
    pub session_count: u64,
    pub event_count: u64,
    pub error_count: u64,
    pub tool_use_count: u64,
    pub tool_result_count: u64,
    pub by_agent: BTreeMap<String, u64>,
    pub by_event_kind: EventKindCounts,
    pub updated_at_ms: i64,
}
