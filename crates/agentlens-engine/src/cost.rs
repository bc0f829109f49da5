use agentlens_types::{Config, ModelRate, TokenTotals, UnknownModelPolicy};
use std::collections::BTreeMap;

/// USD cost of one model's billable totals under a rate card.
///
/// Cached tokens are never billed at the full input rate:
/// `non_cached_input = max(input - cached_read - cached_create, 0)`.
pub fn cost_for_totals(totals: &TokenTotals, rate: &ModelRate) -> f64 {
    let non_cached = totals.non_cached_input() as f64;
    (non_cached * rate.input_per_1m_usd
        + totals.cached_read_tokens as f64 * rate.cached_read_per_1m_usd
        + totals.cached_create_tokens as f64 * rate.cached_create_per_1m_usd
        + totals.output_tokens as f64 * rate.output_per_1m_usd
        + totals.reasoning_output_tokens as f64 * rate.reasoning_output_per_1m_usd)
        / 1e6
}

/// Aggregate cost estimate across models.
///
/// Pre-computed per-message costs (already summed by the accumulator) are
/// added as-is; rate cards apply only to the remaining billable totals.
/// Returns None when cost is disabled, nothing is billable, or the
/// unknown-model policy says a partial estimate would mislead.
pub fn estimate_cost(
    per_model_billable: &BTreeMap<String, TokenTotals>,
    precomputed_usd: f64,
    has_precomputed: bool,
    config: &Config,
) -> Option<f64> {
    if !config.cost.enabled {
        return None;
    }

    let mut total = 0.0;
    let mut any_billed = has_precomputed;
    total += precomputed_usd;

    for (model, totals) in per_model_billable {
        if totals.is_empty() {
            continue;
        }
        match config.rate_for(model) {
            Some(rate) => {
                total += cost_for_totals(totals, rate);
                any_billed = true;
            }
            None => match config.cost.unknown_model_policy {
                UnknownModelPolicy::NA => return None,
                UnknownModelPolicy::Ignore => {}
                UnknownModelPolicy::EstimateWithDefault => {
                    // The fallback is a rate card named "default"; without
                    // one this degrades to Ignore
                    if let Some(rate) = config.rate_for("default") {
                        total += cost_for_totals(totals, rate);
                        any_billed = true;
                    }
                }
            },
        }
    }

    if any_billed { Some(total) } else { None }
}
