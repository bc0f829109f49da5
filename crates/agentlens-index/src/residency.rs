use agentlens_types::{DetailLoadMode, ResidentTier, RetentionConfig, RetentionStrategy};
use std::collections::HashMap;

use crate::index::TraceEntry;

/// Apply the residency policy after a refresh pass.
///
/// The most recently updated traces stay hot with their event arrays
/// resident (capped); the next band goes warm; the rest go cold and drop
/// their arrays. Detail reads rebuild evicted arrays from disk on demand.
pub(crate) fn apply_residency(
    entries: &mut HashMap<String, TraceEntry>,
    retention: &RetentionConfig,
) {
    if retention.strategy == RetentionStrategy::FullMemory {
        for entry in entries.values_mut() {
            entry.summary.resident_tier = ResidentTier::Hot;
            entry.summary.is_materialized = entry.events.is_some();
        }
        return;
    }

    let mut ranked: Vec<(String, i64)> = entries
        .iter()
        .map(|(id, e)| (id.clone(), e.summary.updated_ms()))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    for (rank, (id, _)) in ranked.iter().enumerate() {
        let Some(entry) = entries.get_mut(id) else {
            continue;
        };
        let tier = if rank < retention.hot_trace_count {
            ResidentTier::Hot
        } else if rank < retention.hot_trace_count + retention.warm_trace_count {
            ResidentTier::Warm
        } else {
            ResidentTier::Cold
        };

        let cap = match tier {
            ResidentTier::Hot => retention.max_resident_events_per_hot_trace,
            // Eager detail loading keeps warm traces materialized so a
            // detail read never goes back to disk for them
            ResidentTier::Warm => match retention.detail_load_mode {
                DetailLoadMode::LazyFromDisk => retention.max_resident_events_per_warm_trace,
                DetailLoadMode::Eager => retention
                    .max_resident_events_per_warm_trace
                    .max(retention.max_resident_events_per_hot_trace),
            },
            ResidentTier::Cold => 0,
        };

        match &mut entry.events {
            Some(events) if cap == 0 => {
                events.clear();
                entry.events = None;
            }
            Some(events) if events.len() > cap => {
                // Keep the newest events
                let drop = events.len() - cap;
                events.drain(..drop);
            }
            _ => {}
        }

        entry.summary.resident_tier = tier;
        entry.summary.is_materialized = entry.events.is_some();
    }
}
