use crate::domain::offset::{Filters, OffsetKey, Weights};
use crate::domain::scored::ScoredSecurity;
use crate::domain::security::SecurityRecord;
use std::collections::BTreeMap;

/// Liquidity filter, weighted-sum scoring and a descending stable sort.
///
/// Equal scores keep their incoming (reference snapshot) order. The full ranking is returned;
/// truncating to `show_count` is left to callers.
pub fn score_and_filter(
    scored: Vec<ScoredSecurity>,
    weights: &Weights,
    filters: &Filters,
) -> Vec<ScoredSecurity> {
    let mut out: Vec<ScoredSecurity> = scored
        .into_iter()
        .filter(|s| passes_liquidity(&s.record, filters))
        .map(|mut s| {
            s.momentum_score = momentum_score(&s.returns, weights);
            s
        })
        .collect();

    // total_cmp keeps the order total when extreme weights overflow a score to NaN.
    out.sort_by(|a, b| b.momentum_score.total_cmp(&a.momentum_score));

    out
}

/// Thresholds apply to reference-date volume and trading value only.
pub fn passes_liquidity(record: &SecurityRecord, filters: &Filters) -> bool {
    record.volume >= filters.min_volume_shares()
        && record.trading_value >= filters.min_trading_value()
}

/// Plain weighted sum of lookback returns; no normalization.
pub fn momentum_score(returns: &BTreeMap<OffsetKey, f64>, weights: &Weights) -> f64 {
    OffsetKey::LOOKBACKS
        .iter()
        .map(|&k| returns.get(&k).copied().unwrap_or(0.0) * weights.weight_for(k))
        .sum()
}
