use crate::domain::offset::OffsetKey;
use crate::domain::security::SecurityRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A reference-date record with its per-offset returns and aggregate score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSecurity {
    #[serde(flatten)]
    pub record: SecurityRecord,
    /// Percentage return per lookback offset. Always holds all five lookbacks.
    pub returns: BTreeMap<OffsetKey, f64>,
    /// Lookbacks where the ISIN had no price. Their entry in `returns` is exactly 0.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub missing_offsets: BTreeSet<OffsetKey>,
    pub momentum_score: f64,
}

impl ScoredSecurity {
    pub fn return_for(&self, key: OffsetKey) -> f64 {
        self.returns.get(&key).copied().unwrap_or(0.0)
    }
}

/// First `show_count` rows of a ranking.
pub fn top(ranked: &[ScoredSecurity], show_count: usize) -> &[ScoredSecurity] {
    &ranked[..show_count.min(ranked.len())]
}
