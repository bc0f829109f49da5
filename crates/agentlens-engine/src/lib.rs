mod accumulate;
mod activity;
mod cost;
mod shares;

pub use accumulate::TraceAccumulator;
pub use activity::{activity_bins, activity_status, ActivityProfile};
pub use cost::{cost_for_totals, estimate_cost};
pub use shares::model_token_shares;

use agentlens_types::{Config, TraceSummary};

/// Context-window usage as a percentage, against the dominant model's
/// configured window. None when no tokens were counted.
pub fn context_window_pct(acc: &TraceAccumulator, config: &Config) -> Option<f64> {
    if acc.token_totals.total_tokens == 0 {
        return None;
    }
    // The dominant window is the one the current model talks into
    let window = config.models.context_window_for(&acc.current_model);
    if window == 0 {
        return None;
    }
    Some(acc.token_totals.total_tokens as f64 / window as f64 * 100.0)
}

/// Write every event-derived field of a summary from the accumulator.
///
/// File state, identity, and residency are owned by the index; this fills
/// in the rest. Called after each fold, full or incremental.
pub fn finalize_summary(
    summary: &mut TraceSummary,
    acc: &TraceAccumulator,
    config: &Config,
    now_ms: i64,
    manual_stop_at_ms: Option<i64>,
) {
    summary.first_event_ts = acc.first_event_ts;
    summary.last_event_ts = acc.last_event_ts;
    summary.event_count = acc.event_count;
    summary.tool_use_count = acc.tool_use_count();
    summary.tool_result_count = acc.tool_result_count();
    summary.unmatched_tool_uses = acc.unmatched_tool_uses();
    summary.unmatched_tool_results = acc.unmatched_tool_results;
    summary.event_kind_counts = acc.kind_counts;

    let profile = activity_bins(&acc.timestamps, acc.event_count);
    summary.activity_bin_count = profile.bins.len();
    summary.activity_bins = profile.bins;
    summary.activity_bins_mode = profile.mode;
    summary.activity_window_minutes = profile.window_minutes;
    summary.activity_bin_minutes = profile.bin_minutes;

    let (status, reason) = activity_status(
        summary.updated_ms(),
        now_ms,
        &config.scan,
        manual_stop_at_ms,
    );
    summary.activity_status = status;
    summary.activity_reason = reason;

    summary.token_totals = acc.token_totals;
    let (shares, estimated) =
        model_token_shares(&acc.per_model, config.trace_inspector.top_model_count);
    summary.model_token_shares_top = shares;
    summary.model_token_shares_estimated = estimated;
    summary.context_window_pct = context_window_pct(acc, config);
    summary.cost_estimate_usd = estimate_cost(
        &acc.per_model_billable,
        acc.precomputed_cost_usd,
        acc.has_precomputed_cost,
        config,
    );
}
