use agentlens_types::{ModelTokenShare, TokenTotals};
use std::collections::BTreeMap;

/// Per-model token breakdown for the summary, top `k` by tokens.
///
/// Usage without a model name (the empty key) is apportioned across the
/// observed models in proportion to their measured totals, and the result
/// is flagged as estimated. When nothing names a model, no shares are
/// reported at all.
pub fn model_token_shares(
    per_model: &BTreeMap<String, TokenTotals>,
    k: usize,
) -> (Vec<ModelTokenShare>, bool) {
    let unattributed = per_model
        .get("")
        .map(|t| t.total_tokens)
        .unwrap_or(0);

    let mut named: Vec<(String, u64)> = per_model
        .iter()
        .filter(|(model, totals)| !model.is_empty() && totals.total_tokens > 0)
        .map(|(model, totals)| (model.clone(), totals.total_tokens))
        .collect();

    if named.is_empty() {
        return (Vec::new(), false);
    }

    let named_sum: u64 = named.iter().map(|(_, t)| t).sum();
    let estimated = unattributed > 0;
    if estimated && named_sum > 0 {
        for (_, tokens) in named.iter_mut() {
            let extra = (unattributed as f64 * (*tokens as f64 / named_sum as f64)).round() as u64;
            *tokens += extra;
        }
    }

    // Tokens descending, model ascending on ties
    named.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    named.truncate(k.max(1));

    let shown_sum: u64 = named.iter().map(|(_, t)| t).sum();
    let shares = named
        .into_iter()
        .map(|(model, tokens)| ModelTokenShare {
            model,
            tokens,
            percent: if shown_sum > 0 {
                tokens as f64 / shown_sum as f64 * 100.0
            } else {
                0.0
            },
        })
        .collect();

    (shares, estimated)
}
