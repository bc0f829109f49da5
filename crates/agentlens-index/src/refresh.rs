use agentlens_engine::{activity_status, finalize_summary, TraceAccumulator};
use agentlens_parsers::{ParseOutcome, ResumeState, TraceParser};
use agentlens_types::{
    trace_id_for_path, EnvelopeKind, EventsAppendedPayload, OverviewStats, ScanMode,
    TraceRemovedPayload, TraceSummary,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::broker::OutboundUpdate;
use crate::discovery::{discover, Candidate};
use crate::index::{CompositeFingerprint, TraceEntry, TraceIndex};
use crate::residency::apply_residency;

#[derive(Debug, Clone, Copy)]
struct FileMeta {
    size_bytes: u64,
    mtime_ms: i64,
}

fn stat(path: &Path) -> Option<FileMeta> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Some(FileMeta {
        size_bytes: meta.len(),
        mtime_ms,
    })
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Walk the message/ and part/ subtrees belonging to one OpenCode session.
/// A size change on the session json alone is not enough; new message or
/// part files must also trigger a reparse.
fn composite_fingerprint(session_path: &Path, session_id: &str) -> CompositeFingerprint {
    let mut fp = CompositeFingerprint::default();
    let Some(storage) = session_path
        .ancestors()
        .find(|a| a.file_name().map(|n| n == "storage").unwrap_or(false))
    else {
        return fp;
    };

    let mut dirs = vec![storage.join("message").join(session_id)];
    // Part dirs are keyed by message id; collect them from the messages
    if let Ok(read) = std::fs::read_dir(storage.join("message").join(session_id)) {
        for entry in read.filter_map(|e| e.ok()) {
            if let Some(stem) = entry.path().file_stem() {
                dirs.push(storage.join("part").join(stem));
            }
        }
    }

    for dir in dirs {
        let Ok(read) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in read.filter_map(|e| e.ok()) {
            if let Ok(meta) = entry.metadata() {
                fp.files += 1;
                fp.bytes += meta.len();
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                fp.newest_mtime_ms = fp.newest_mtime_ms.max(mtime);
            }
        }
    }
    fp
}

/// Parse work prepared outside the state lock
enum Work {
    Added {
        trace_id: String,
        candidate: Candidate,
        parser: Arc<dyn TraceParser>,
        outcome: Result<ParseOutcome, agentlens_parsers::Error>,
        file: FileMeta,
        composite: Option<CompositeFingerprint>,
    },
    FullReparse {
        trace_id: String,
        outcome: Result<ParseOutcome, agentlens_parsers::Error>,
        file: FileMeta,
        composite: Option<CompositeFingerprint>,
    },
    Appended {
        trace_id: String,
        outcome: ParseOutcome,
        file: FileMeta,
    },
}

/// Snapshot of an entry taken for classification, so the parse phase can
/// run without holding the state lock
struct Known {
    size_bytes: u64,
    mtime_ms: i64,
    resume: Option<ResumeState>,
    parser: Arc<dyn TraceParser>,
    composite: Option<CompositeFingerprint>,
}

impl TraceIndex {
    /// One refresh pass. Returns the number of emitted updates.
    pub async fn refresh_once(&self, full_rescan: bool) -> usize {
        let config = self.config.read().await.clone();

        // Phase 1: candidate list (cached between full rescans)
        let candidates: Vec<Candidate> = if full_rescan {
            let found = discover(&config);
            self.state.write().await.candidates_cache = found.clone();
            found
        } else {
            let cached = self.state.read().await.candidates_cache.clone();
            if cached.is_empty() {
                let found = discover(&config);
                self.state.write().await.candidates_cache = found.clone();
                found
            } else {
                cached
            }
        };

        // Phase 2: classification snapshot
        let known: HashMap<String, Known> = {
            let state = self.state.read().await;
            state
                .entries
                .iter()
                .map(|(id, e)| {
                    (
                        id.clone(),
                        Known {
                            size_bytes: e.summary.size_bytes,
                            mtime_ms: e.summary.mtime_ms,
                            resume: e.resume.clone(),
                            parser: e.parser.clone(),
                            composite: e.composite,
                        },
                    )
                })
                .collect()
        };

        // Phase 3: stat, classify, parse (no state lock held)
        let mut work: Vec<Work> = Vec::new();
        let mut alive: HashSet<String> = HashSet::new();

        for candidate in &candidates {
            let trace_id = trace_id_for_path(&candidate.path);
            let Some(file) = stat(&candidate.path) else {
                continue; // unreadable now; treated as gone below
            };
            alive.insert(trace_id.clone());

            match known.get(&trace_id) {
                None => {
                    let parser = {
                        let registry = self.registry.read().await;
                        registry.select(
                            &candidate.path,
                            candidate.declared_log_type,
                            candidate.agent_hint,
                        )
                    };
                    let Some(parser) = parser else {
                        continue; // nothing claims this file
                    };
                    let outcome = parser.parse(&candidate.path, &trace_id, None);
                    let composite = composite_for(&parser, &candidate.path, &outcome);
                    work.push(Work::Added {
                        trace_id,
                        candidate: candidate.clone(),
                        parser,
                        outcome,
                        file,
                        composite,
                    });
                }
                Some(prior) => {
                    let is_composite = prior.composite.is_some()
                        || prior.parser.id() == "opencode";
                    if is_composite {
                        let session_id = prior
                            .resume
                            .as_ref()
                            .map(|r| r.carry.session_id.clone())
                            .unwrap_or_default();
                        let fp = composite_fingerprint(&candidate.path, &session_id);
                        let session_unchanged = file.size_bytes == prior.size_bytes
                            && file.mtime_ms == prior.mtime_ms;
                        if session_unchanged && Some(fp) == prior.composite {
                            continue;
                        }
                        let outcome = prior.parser.parse(&candidate.path, &trace_id, None);
                        work.push(Work::FullReparse {
                            trace_id,
                            outcome,
                            file,
                            composite: Some(fp),
                        });
                        continue;
                    }

                    let unchanged = file.size_bytes == prior.size_bytes
                        && file.mtime_ms == prior.mtime_ms;
                    if unchanged {
                        continue;
                    }

                    let grown = file.size_bytes > prior.size_bytes
                        && file.mtime_ms >= prior.mtime_ms;
                    if grown && prior.parser.incremental() && prior.resume.is_some() {
                        match prior
                            .parser
                            .parse(&candidate.path, &trace_id, prior.resume.as_ref())
                        {
                            Ok(outcome) if outcome.appended => {
                                work.push(Work::Appended {
                                    trace_id,
                                    outcome,
                                    file,
                                });
                            }
                            outcome => {
                                // Prefix changed under us: the parser fell
                                // back to a full pass on its own
                                work.push(Work::FullReparse {
                                    trace_id,
                                    outcome,
                                    file,
                                    composite: None,
                                });
                            }
                        }
                    } else {
                        // Shrunk or backdated: full reparse
                        let outcome = prior.parser.parse(&candidate.path, &trace_id, None);
                        work.push(Work::FullReparse {
                            trace_id,
                            outcome,
                            file,
                            composite: None,
                        });
                    }
                }
            }
        }

        let gone: Vec<String> = known
            .keys()
            .filter(|id| !alive.contains(*id))
            .cloned()
            .collect();

        // Phase 4: apply under the write lock
        let now = now_ms();
        let mut batch: Vec<OutboundUpdate> = Vec::new();
        {
            let mut state = self.state.write().await;

            for item in work {
                match item {
                    Work::Added {
                        trace_id,
                        candidate,
                        parser,
                        outcome,
                        file,
                        composite,
                    } => {
                        let entry = self.build_entry(
                            trace_id.clone(),
                            candidate,
                            parser,
                            outcome,
                            file,
                            composite,
                            &config,
                            now,
                        );
                        push_summary_update(
                            &mut batch,
                            EnvelopeKind::TraceAdded,
                            &entry.summary,
                        );
                        state.entries.insert(trace_id, entry);
                    }

                    Work::FullReparse {
                        trace_id,
                        outcome,
                        file,
                        composite,
                    } => {
                        state.perf.full_reparse_count += 1;
                        let Some(entry) = state.entries.get_mut(&trace_id) else {
                            continue;
                        };
                        let before = entry.summary.clone();
                        let manual_stop = self.manual_stop_for(&trace_id);
                        rebuild_entry(entry, outcome, file, composite, &config, now, manual_stop);
                        if !material_eq(&before, &entry.summary) {
                            push_summary_update(
                                &mut batch,
                                EnvelopeKind::TraceUpdated,
                                &entry.summary,
                            );
                        }
                    }

                    Work::Appended {
                        trace_id,
                        outcome,
                        file,
                    } => {
                        state.perf.incremental_append_count += 1;
                        let Some(entry) = state.entries.get_mut(&trace_id) else {
                            continue;
                        };
                        entry.acc.fold_all(&outcome.events);
                        entry.error_total += outcome.error_count;
                        if !outcome.session_id.is_empty() {
                            entry.summary.session_id = outcome.session_id.clone();
                        }
                        if !outcome.session_cwd.is_empty() {
                            entry.session_cwd = outcome.session_cwd.clone();
                        }
                        entry.summary.size_bytes = file.size_bytes;
                        entry.summary.mtime_ms = file.mtime_ms;
                        entry.summary.error_count = entry.error_total;
                        entry.summary.parseable = true;
                        entry.summary.parse_error = outcome.parse_error.clone();
                        finalize_summary(
                            &mut entry.summary,
                            &entry.acc,
                            &config,
                            now,
                            self.manual_stop_for(&trace_id),
                        );
                        if let Some(events) = &mut entry.events {
                            events.extend(outcome.events.iter().cloned());
                        }
                        entry.resume = Some(outcome.resume.clone());

                        // A grown file can end mid-record; with no complete
                        // new events there is nothing to announce yet
                        if !outcome.events.is_empty() {
                            let payload = EventsAppendedPayload {
                                trace_id: trace_id.clone(),
                                summary: entry.summary.clone(),
                                events: outcome.events,
                            };
                            batch.push(OutboundUpdate::new(
                                EnvelopeKind::EventsAppended,
                                trace_id,
                                serde_json::to_value(&payload).unwrap_or_default(),
                            ));
                        }
                    }
                }
            }

            for trace_id in gone {
                if state.entries.remove(&trace_id).is_some() {
                    let payload = TraceRemovedPayload {
                        trace_id: trace_id.clone(),
                    };
                    batch.push(OutboundUpdate::new(
                        EnvelopeKind::TraceRemoved,
                        trace_id,
                        serde_json::to_value(&payload).unwrap_or_default(),
                    ));
                }
            }

            // Liveness decays with wall-clock time even when files do not
            // change, so sweep statuses every pass
            let updated_ids: BTreeSet<String> =
                batch.iter().map(|u| u.trace_id.clone()).collect();
            for (trace_id, entry) in state.entries.iter_mut() {
                if updated_ids.contains(trace_id) {
                    continue;
                }
                let (status, reason) = activity_status(
                    entry.summary.updated_ms(),
                    now,
                    &config.scan,
                    self.manual_stop_for(trace_id),
                );
                if status != entry.summary.activity_status {
                    entry.summary.activity_status = status;
                    entry.summary.activity_reason = reason;
                    push_summary_update(
                        &mut batch,
                        EnvelopeKind::TraceUpdated,
                        &entry.summary,
                    );
                }
            }

            apply_residency(&mut state.entries, &config.retention);

            let overview = overview_from_entries(&state.entries, now);
            if overview_changed(&state.overview, &overview) {
                batch.push(OutboundUpdate::new(
                    EnvelopeKind::OverviewUpdated,
                    "",
                    serde_json::to_value(&overview).unwrap_or_default(),
                ));
            }
            state.overview = overview;

            state.perf.refresh_count += 1;
            state.perf.tracked_files = state.entries.len() as u64;
        }

        let emitted = batch.len();
        if emitted > 0 {
            // Batches flush at most once per debounce window so subscribers
            // see one consistent burst instead of a trickle
            let debounce = Duration::from_millis(config.scan.batch_debounce_ms);
            {
                let mut last_flush = self.last_flush.lock().await;
                if let Some(last) = *last_flush {
                    let since = last.elapsed();
                    if since < debounce {
                        tokio::time::sleep(debounce - since).await;
                    }
                }
                *last_flush = Some(Instant::now());
            }
            tracing::debug!(updates = emitted, "refresh pass emitted updates");
            self.broker.lock().await.publish(&batch);
        }
        emitted
    }

    /// Build a fresh entry for a newly discovered trace.
    #[allow(clippy::too_many_arguments)]
    fn build_entry(
        &self,
        trace_id: String,
        candidate: Candidate,
        parser: Arc<dyn TraceParser>,
        outcome: Result<ParseOutcome, agentlens_parsers::Error>,
        file: FileMeta,
        composite: Option<CompositeFingerprint>,
        config: &agentlens_types::Config,
        now: i64,
    ) -> TraceEntry {
        let mut summary = TraceSummary::placeholder(
            trace_id.clone(),
            candidate.path.to_string_lossy().into_owned(),
            candidate.profile.clone(),
            parser.id().to_string(),
            parser.agent(),
        );
        summary.size_bytes = file.size_bytes;
        summary.mtime_ms = file.mtime_ms;

        let mut entry = TraceEntry {
            summary,
            acc: TraceAccumulator::default(),
            resume: None,
            events: None,
            parser,
            candidate,
            session_cwd: String::new(),
            error_total: 0,
            composite,
        };
        rebuild_entry(
            &mut entry,
            outcome,
            file,
            composite,
            config,
            now,
            self.manual_stop_for(&trace_id),
        );
        entry
    }
}

/// Replace an entry's parsed state with a full parse outcome (or record
/// why the file could not be read).
fn rebuild_entry(
    entry: &mut TraceEntry,
    outcome: Result<ParseOutcome, agentlens_parsers::Error>,
    file: FileMeta,
    composite: Option<CompositeFingerprint>,
    config: &agentlens_types::Config,
    now: i64,
    manual_stop: Option<i64>,
) {
    entry.summary.size_bytes = file.size_bytes;
    entry.summary.mtime_ms = file.mtime_ms;
    if composite.is_some() {
        entry.composite = composite;
    }

    match outcome {
        Ok(outcome) => {
            let mut acc = TraceAccumulator::default();
            acc.fold_all(&outcome.events);
            entry.acc = acc;
            entry.error_total = outcome.error_count;
            entry.summary.session_id = outcome.session_id.clone();
            entry.summary.parseable = outcome.parseable;
            entry.summary.parse_error = outcome.parse_error.clone();
            entry.summary.error_count = entry.error_total;
            if !outcome.session_cwd.is_empty() {
                entry.session_cwd = outcome.session_cwd.clone();
            }
            finalize_summary(&mut entry.summary, &entry.acc, config, now, manual_stop);
            entry.events = Some(outcome.events);
            entry.resume = Some(outcome.resume);
        }
        Err(err) => {
            tracing::warn!(path = %entry.summary.path, error = %err, "trace unreadable");
            entry.summary.parseable = false;
            entry.summary.parse_error = err.to_string();
            entry.events = None;
            entry.resume = None;
        }
    }
}

fn composite_for(
    parser: &Arc<dyn TraceParser>,
    path: &Path,
    outcome: &Result<ParseOutcome, agentlens_parsers::Error>,
) -> Option<CompositeFingerprint> {
    if parser.id() != "opencode" {
        return None;
    }
    let session_id = outcome
        .as_ref()
        .map(|o| o.session_id.clone())
        .unwrap_or_default();
    Some(composite_fingerprint(path, &session_id))
}

fn push_summary_update(
    batch: &mut Vec<OutboundUpdate>,
    kind: EnvelopeKind,
    summary: &TraceSummary,
) {
    batch.push(OutboundUpdate::new(
        kind,
        summary.id.clone(),
        serde_json::to_value(summary).unwrap_or_default(),
    ));
}

/// Summary equality ignoring residency bookkeeping, which changes on every
/// eviction sweep and is not worth an envelope on its own.
fn material_eq(a: &TraceSummary, b: &TraceSummary) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.resident_tier = b.resident_tier;
    a.is_materialized = b.is_materialized;
    a == b
}

fn overview_from_entries(
    entries: &HashMap<String, TraceEntry>,
    now: i64,
) -> OverviewStats {
    let mut overview = OverviewStats {
        updated_at_ms: now,
        ..Default::default()
    };
    let mut sessions: HashSet<&str> = HashSet::new();

    for entry in entries.values() {
        let s = &entry.summary;
        overview.trace_count += 1;
        if !s.session_id.is_empty() {
            sessions.insert(s.session_id.as_str());
        }
        overview.event_count += s.event_count;
        overview.error_count += s.error_count;
        overview.tool_use_count += s.tool_use_count;
        overview.tool_result_count += s.tool_result_count;
        *overview
            .by_agent
            .entry(s.agent.as_str().to_string())
            .or_insert(0) += 1;
        overview.by_event_kind.merge(&s.event_kind_counts);
    }
    overview.session_count = sessions.len() as u64;
    overview
}

/// Everything but the clock matters for the change check.
fn overview_changed(a: &OverviewStats, b: &OverviewStats) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.updated_at_ms = 0;
    b.updated_at_ms = 0;
    a != b
}

impl TraceIndex {
    /// Refresh loop: fixed cadence, or an adaptive duty cycle that tightens
    /// after any change and decays while quiet. A full rediscovery runs at
    /// its own slower cadence regardless.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut adaptive_interval_ms = {
            let config = self.config.read().await;
            config.scan.interval_min_ms.max(100)
        };
        let mut last_full: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let config = self.config.read().await.clone();

            let full_due = match last_full {
                None => true,
                Some(t) => {
                    t.elapsed() >= Duration::from_millis(config.scan.full_rescan_interval_ms)
                }
            };
            if full_due {
                last_full = Some(Instant::now());
            }

            let changes = self.refresh_once(full_due).await;

            let sleep_ms = match config.scan.mode {
                ScanMode::Fixed => config.scan.interval_seconds.max(1) * 1000,
                ScanMode::Adaptive => {
                    if changes > 0 {
                        adaptive_interval_ms = config.scan.interval_min_ms.max(100);
                    } else {
                        adaptive_interval_ms = (adaptive_interval_ms * 2)
                            .min(config.scan.interval_max_ms.max(adaptive_interval_ms));
                    }
                    adaptive_interval_ms
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("refresh loop stopped");
    }
}
