use agentlens_types::{EventKind, EventKindCounts, NormalizedEvent, TokenTotals};
use std::collections::{BTreeMap, HashSet};

/// Running per-trace statistics, folded event by event.
///
/// Incremental appends fold only the suffix into an existing accumulator;
/// a full reparse starts from `TraceAccumulator::default()`. Everything a
/// summary derives from events lives here, so derivation after an append
/// is O(new events), not O(all events).
#[derive(Debug, Clone, Default)]
pub struct TraceAccumulator {
    pub event_count: u64,
    pub kind_counts: EventKindCounts,
    pub first_event_ts: Option<i64>,
    pub last_event_ts: Option<i64>,

    /// Distinct (tool_type, tool_call_id) keys; empty call ids fall back
    /// to the event id so retries of the same call count once
    tool_use_keys: HashSet<(String, String)>,
    tool_result_keys: HashSet<(String, String)>,
    /// tool_use call ids not yet answered by a tool_result
    open_tool_uses: HashSet<String>,
    pub unmatched_tool_results: u64,

    /// Token totals per model; the empty key collects unattributed usage
    pub per_model: BTreeMap<String, TokenTotals>,
    /// Same, restricted to samples without a pre-computed cost (these are
    /// the ones the rate card applies to)
    pub per_model_billable: BTreeMap<String, TokenTotals>,
    pub token_totals: TokenTotals,
    /// Sum of parser-supplied per-message costs
    pub precomputed_cost_usd: f64,
    pub has_precomputed_cost: bool,
    /// Usage dedup keys already counted (Claude retransmissions)
    usage_keys_seen: HashSet<String>,
    /// Model seen on the most recent usage sample
    pub current_model: String,

    /// Event timestamps in fold order, for the activity profile
    pub timestamps: Vec<i64>,
}

impl TraceAccumulator {
    pub fn fold(&mut self, event: &NormalizedEvent) {
        self.event_count += 1;
        self.kind_counts.increment(event.event_kind);

        if let Some(ts) = event.timestamp_ms {
            if self.first_event_ts.map(|f| ts < f).unwrap_or(true) {
                self.first_event_ts = Some(ts);
            }
            if self.last_event_ts.map(|l| ts > l).unwrap_or(true) {
                self.last_event_ts = Some(ts);
            }
            self.timestamps.push(ts);
        }

        match event.event_kind {
            EventKind::ToolUse => {
                let key = tool_key(event);
                self.tool_use_keys.insert(key);
                if !event.tool_call_id.is_empty() {
                    self.open_tool_uses.insert(event.tool_call_id.clone());
                } else {
                    // Call id missing: can never be matched
                    self.open_tool_uses.insert(format!("!{}", event.event_id));
                }
            }
            EventKind::ToolResult => {
                let key = tool_key(event);
                self.tool_result_keys.insert(key);
                if event.tool_call_id.is_empty()
                    || !self.open_tool_uses.remove(&event.tool_call_id)
                {
                    self.unmatched_tool_results += 1;
                }
            }
            _ => {}
        }

        if let Some(usage) = &event.usage {
            if !usage.dedup_key.is_empty() {
                if !self.usage_keys_seen.insert(usage.dedup_key.clone()) {
                    return; // retransmission, already counted
                }
            }

            self.token_totals.add(&usage.tokens);
            self.per_model
                .entry(usage.model.clone())
                .or_default()
                .add(&usage.tokens);
            if !usage.model.is_empty() {
                self.current_model = usage.model.clone();
            }

            match usage.precomputed_cost_usd {
                Some(cost) => {
                    self.precomputed_cost_usd += cost;
                    self.has_precomputed_cost = true;
                }
                None => {
                    self.per_model_billable
                        .entry(usage.model.clone())
                        .or_default()
                        .add(&usage.tokens);
                }
            }
        }
    }

    pub fn fold_all(&mut self, events: &[NormalizedEvent]) {
        for event in events {
            self.fold(event);
        }
    }

    pub fn tool_use_count(&self) -> u64 {
        self.tool_use_keys.len() as u64
    }

    pub fn tool_result_count(&self) -> u64 {
        self.tool_result_keys.len() as u64
    }

    pub fn unmatched_tool_uses(&self) -> u64 {
        self.open_tool_uses.len() as u64
    }
}

fn tool_key(event: &NormalizedEvent) -> (String, String) {
    let id = if event.tool_call_id.is_empty() {
        event.event_id.clone()
    } else {
        event.tool_call_id.clone()
    };
    (event.tool_type.clone(), id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_types::UsageSample;
    use serde_json::Value;

    fn event(kind: EventKind, id: &str, call_id: &str, ts: Option<i64>) -> NormalizedEvent {
        NormalizedEvent {
            event_id: id.to_string(),
            trace_id: "t".to_string(),
            index: 0,
            offset: 0,
            timestamp_ms: ts,
            event_kind: kind,
            raw_type: String::new(),
            role: String::new(),
            preview: String::new(),
            text_blocks: vec![],
            tool_call_id: call_id.to_string(),
            tool_name: String::new(),
            tool_type: "bash".to_string(),
            tool_args_text: String::new(),
            tool_result_text: String::new(),
            parent_tool_use_id: String::new(),
            function_name: String::new(),
            parent_event_id: String::new(),
            toc_label: String::new(),
            has_error: false,
            search_text: String::new(),
            usage: None,
            raw: Value::Null,
        }
    }

    #[test]
    fn test_tool_matching() {
        let mut acc = TraceAccumulator::default();
        acc.fold(&event(EventKind::ToolUse, "e1", "c1", None));
        acc.fold(&event(EventKind::ToolUse, "e2", "c2", None));
        acc.fold(&event(EventKind::ToolResult, "e3", "c1", None));
        acc.fold(&event(EventKind::ToolResult, "e4", "nope", None));

        assert_eq!(acc.tool_use_count(), 2);
        assert_eq!(acc.tool_result_count(), 2);
        assert_eq!(acc.unmatched_tool_uses(), 1); // c2 still open
        assert_eq!(acc.unmatched_tool_results, 1); // "nope"
    }

    #[test]
    fn test_tool_dedup_by_type_and_call_id() {
        let mut acc = TraceAccumulator::default();
        acc.fold(&event(EventKind::ToolUse, "e1", "c1", None));
        acc.fold(&event(EventKind::ToolUse, "e2", "c1", None)); // duplicate call id
        assert_eq!(acc.tool_use_count(), 1);
    }

    #[test]
    fn test_usage_dedup_key_counts_once() {
        let mut acc = TraceAccumulator::default();
        let mut e1 = event(EventKind::Assistant, "e1", "", Some(1_000));
        e1.usage = Some(UsageSample {
            model: "m".to_string(),
            tokens: TokenTotals {
                input_tokens: 100,
                total_tokens: 100,
                ..Default::default()
            },
            precomputed_cost_usd: None,
            dedup_key: "req/msg".to_string(),
        });
        let mut e2 = event(EventKind::Assistant, "e2", "", Some(2_000));
        e2.usage = e1.usage.clone();

        acc.fold(&e1);
        acc.fold(&e2);
        assert_eq!(acc.token_totals.input_tokens, 100);
        // The retransmitted event itself still counted as an event
        assert_eq!(acc.event_count, 2);
    }

    #[test]
    fn test_first_last_timestamps() {
        let mut acc = TraceAccumulator::default();
        acc.fold(&event(EventKind::User, "e1", "", Some(5_000)));
        acc.fold(&event(EventKind::User, "e2", "", Some(2_000)));
        acc.fold(&event(EventKind::User, "e3", "", None));
        assert_eq!(acc.first_event_ts, Some(2_000));
        assert_eq!(acc.last_event_ts, Some(5_000));
        assert_eq!(acc.timestamps.len(), 2);
    }

    #[test]
    fn test_precomputed_cost_excluded_from_billable() {
        let mut acc = TraceAccumulator::default();
        let mut e1 = event(EventKind::Assistant, "e1", "", None);
        e1.usage = Some(UsageSample {
            model: "pi-fast".to_string(),
            tokens: TokenTotals {
                input_tokens: 50,
                total_tokens: 50,
                ..Default::default()
            },
            precomputed_cost_usd: Some(0.02),
            dedup_key: String::new(),
        });
        acc.fold(&e1);

        assert_eq!(acc.token_totals.input_tokens, 50);
        assert!(acc.per_model_billable.get("pi-fast").is_none());
        assert_eq!(acc.precomputed_cost_usd, 0.02);
    }
}
