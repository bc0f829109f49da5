use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{NormalizedEvent, OverviewStats, TraceSummary};

/// Typed frame kinds pushed to stream subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Snapshot,
    TraceAdded,
    TraceUpdated,
    TraceRemoved,
    EventsAppended,
    OverviewUpdated,
    Heartbeat,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Snapshot => "snapshot",
            EnvelopeKind::TraceAdded => "trace_added",
            EnvelopeKind::TraceUpdated => "trace_updated",
            EnvelopeKind::TraceRemoved => "trace_removed",
            EnvelopeKind::EventsAppended => "events_appended",
            EnvelopeKind::OverviewUpdated => "overview_updated",
            EnvelopeKind::Heartbeat => "heartbeat",
        }
    }
}

/// One frame on a subscriber stream.
/// `version` is the broker's per-subscriber monotonic sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub version: u64,
    pub payload: Value,
}

/// First frame on every new subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub traces: Vec<TraceSummary>,
    pub overview: OverviewStats,
}

/// Suffix of events appended to a trace since the last envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsAppendedPayload {
    pub trace_id: String,
    pub summary: TraceSummary,
    pub events: Vec<NormalizedEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRemovedPayload {
    pub trace_id: String,
}
