use agentlens_engine::TraceAccumulator;
use agentlens_parsers::{ParserRegistry, Redactor, ResumeState, TraceParser};
use agentlens_types::{
    Agent, Config, NormalizedEvent, OverviewStats, SnapshotPayload, TocRow, TracePage,
    TraceSummary, UpdateEnvelope,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use uuid::Uuid;

use crate::broker::Broker;
use crate::discovery::Candidate;
use crate::{Error, Result};

/// Counters exposed at /api/perf
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PerformanceStats {
    pub refresh_count: u64,
    pub incremental_append_count: u64,
    pub full_reparse_count: u64,
    pub tracked_files: u64,
}

/// Cheap change signature for a directory-shaped trace: file count, byte
/// sum, and newest mtime across the session's message and part subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct CompositeFingerprint {
    pub files: u64,
    pub bytes: u64,
    pub newest_mtime_ms: i64,
}

/// Everything the index holds for one trace
pub(crate) struct TraceEntry {
    pub summary: TraceSummary,
    pub acc: TraceAccumulator,
    pub resume: Option<ResumeState>,
    pub events: Option<Vec<NormalizedEvent>>,
    pub parser: Arc<dyn TraceParser>,
    pub candidate: Candidate,
    /// Working directory announced by the session, for the resolver
    pub session_cwd: String,
    /// Parse errors accumulated across incremental passes
    pub error_total: u64,
    pub composite: Option<CompositeFingerprint>,
}

pub(crate) struct IndexState {
    pub entries: HashMap<String, TraceEntry>,
    pub overview: OverviewStats,
    pub perf: PerformanceStats,
    pub candidates_cache: Vec<Candidate>,
}

impl IndexState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            overview: OverviewStats::default(),
            perf: PerformanceStats::default(),
            candidates_cache: Vec::new(),
        }
    }
}

/// The one trace index of the process.
///
/// The refresh loop is the single writer of `state`; queries take the read
/// side and clone out what they return. Stop actions record their override
/// in `manual_stops`, which the next derivation pass folds in.
pub struct TraceIndex {
    pub(crate) state: RwLock<IndexState>,
    pub(crate) broker: Mutex<Broker>,
    pub(crate) config: RwLock<Config>,
    pub(crate) registry: RwLock<ParserRegistry>,
    pub(crate) manual_stops: std::sync::Mutex<HashMap<String, i64>>,
    /// Last broker flush, for batch debouncing
    pub(crate) last_flush: Mutex<Option<std::time::Instant>>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
}

impl TraceIndex {
    pub fn new(config: Config) -> Result<Self> {
        let redactor = Arc::new(
            Redactor::from_config(&config.redaction).map_err(Error::Parser)?,
        );
        let registry = ParserRegistry::new(redactor);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            state: RwLock::new(IndexState::new()),
            broker: Mutex::new(Broker::new()),
            config: RwLock::new(config),
            registry: RwLock::new(registry),
            manual_stops: std::sync::Mutex::new(HashMap::new()),
            last_flush: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Signal the refresh loop to stop and subscribers to drain.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Watch side of the shutdown flag, for sibling tasks.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Swap in a new configuration. The next refresh pass picks it up;
    /// redaction pattern changes apply to parses from then on.
    pub async fn update_config(&self, config: Config) -> Result<()> {
        let redactor = Arc::new(
            Redactor::from_config(&config.redaction).map_err(Error::Parser)?,
        );
        *self.registry.write().await = ParserRegistry::new(redactor);
        *self.config.write().await = config;
        Ok(())
    }

    /// Summaries ordered by mtime descending, path ascending on ties.
    pub async fn get_summaries(&self, agent: Option<Agent>, limit: usize) -> Vec<TraceSummary> {
        let state = self.state.read().await;
        let mut summaries: Vec<TraceSummary> = state
            .entries
            .values()
            .map(|e| &e.summary)
            .filter(|s| agent.map(|a| s.agent == a).unwrap_or(true))
            .cloned()
            .collect();
        summaries.sort_by(|a, b| {
            b.mtime_ms
                .cmp(&a.mtime_ms)
                .then_with(|| a.path.cmp(&b.path))
        });
        summaries.truncate(limit);
        summaries
    }

    /// Accept a trace id or a parser-extracted session id.
    pub async fn resolve_id(&self, opaque: &str) -> Result<String> {
        let state = self.state.read().await;
        if state.entries.contains_key(opaque) {
            return Ok(opaque.to_string());
        }
        state
            .entries
            .values()
            .find(|e| !e.summary.session_id.is_empty() && e.summary.session_id == opaque)
            .map(|e| e.summary.id.clone())
            .ok_or_else(|| Error::UnknownTrace(opaque.to_string()))
    }

    /// Paged detail view: the most recent `limit` events with index older
    /// than `before` (exclusive). Traces without resident events are read
    /// back from disk for the request and not cached, so the refresh loop
    /// stays the only writer.
    pub async fn get_trace_page(
        &self,
        trace_id: &str,
        limit: usize,
        before: Option<u64>,
        include_meta: bool,
    ) -> Result<TracePage> {
        let (summary, resident, parser, path) = {
            let state = self.state.read().await;
            let entry = state
                .entries
                .get(trace_id)
                .ok_or_else(|| Error::UnknownTrace(trace_id.to_string()))?;
            (
                entry.summary.clone(),
                entry.events.clone(),
                entry.parser.clone(),
                entry.candidate.path.clone(),
            )
        };

        let events: Vec<NormalizedEvent> = match resident {
            Some(events) => events,
            None => parser.parse(&path, trace_id, None).map(|o| o.events)?,
        };

        let live_cursor = events.iter().map(|e| e.offset).max().unwrap_or(0);

        let visible: Vec<&NormalizedEvent> = events
            .iter()
            .filter(|e| include_meta || !e.is_meta())
            .filter(|e| before.map(|b| (e.index as u64) < b).unwrap_or(true))
            .collect();

        let start = visible.len().saturating_sub(limit);
        let page: Vec<NormalizedEvent> = visible[start..].iter().map(|e| (*e).clone()).collect();
        let has_older = start > 0;
        let next_before = if has_older {
            page.first().map(|e| e.index as u64)
        } else {
            None
        };
        let toc = page.iter().map(TocRow::from_event).collect();

        Ok(TracePage {
            summary,
            events: page,
            toc,
            next_before,
            live_cursor,
        })
    }

    pub async fn overview(&self) -> OverviewStats {
        self.state.read().await.overview.clone()
    }

    pub async fn performance_stats(&self) -> PerformanceStats {
        self.state.read().await.perf
    }

    /// Open a stream: snapshot first, typed envelopes after.
    pub async fn subscribe(&self) -> (Uuid, mpsc::Receiver<UpdateEnvelope>) {
        let snapshot = {
            let state = self.state.read().await;
            let mut traces: Vec<TraceSummary> = state
                .entries
                .values()
                .map(|e| e.summary.clone())
                .collect();
            traces.sort_by(|a, b| {
                b.mtime_ms
                    .cmp(&a.mtime_ms)
                    .then_with(|| a.path.cmp(&b.path))
            });
            SnapshotPayload {
                traces,
                overview: state.overview.clone(),
            }
        };
        let payload = serde_json::to_value(&snapshot).unwrap_or_default();
        self.broker.lock().await.subscribe(payload)
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        self.broker.lock().await.unsubscribe(id);
    }

    /// Push a heartbeat frame to every subscriber.
    pub async fn heartbeat(&self) {
        self.broker.lock().await.heartbeat();
    }

    /// Record a manual stop override; liveness is forced idle until the
    /// trace sees a newer file event.
    pub fn set_manual_stop(&self, trace_id: &str, at_ms: i64) {
        if let Ok(mut stops) = self.manual_stops.lock() {
            stops.insert(trace_id.to_string(), at_ms);
        }
    }

    pub(crate) fn manual_stop_for(&self, trace_id: &str) -> Option<i64> {
        self.manual_stops
            .lock()
            .ok()
            .and_then(|stops| stops.get(trace_id).copied())
    }

    /// Summary plus the session's announced cwd, for the resolver.
    pub async fn resolver_view(&self, trace_id: &str) -> Result<(TraceSummary, String)> {
        let state = self.state.read().await;
        let entry = state
            .entries
            .get(trace_id)
            .ok_or_else(|| Error::UnknownTrace(trace_id.to_string()))?;
        Ok((entry.summary.clone(), entry.session_cwd.clone()))
    }
}
