use crate::domain::offset::OffsetKey;
use crate::domain::scored::ScoredSecurity;
use crate::domain::security::{SecurityRecord, Snapshot};
use crate::momentum::error::MomentumError;
use crate::momentum::schedule::ResolvedSnapshots;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Joins every reference record against the lookback snapshots by ISIN.
///
/// A missing ISIN (new listing, or an unresolved snapshot) yields a return of exactly 0 and is
/// recorded in `missing_offsets`. Scores are left at 0. Output keeps reference order.
pub fn compute_returns(
    reference: &Snapshot,
    others: &ResolvedSnapshots,
) -> Result<Vec<ScoredSecurity>, MomentumError> {
    let indexes: Vec<(OffsetKey, HashMap<&str, &SecurityRecord>)> = OffsetKey::LOOKBACKS
        .iter()
        .map(|&key| {
            let index = others
                .get(&key)
                .map(|snap| {
                    snap.records
                        .iter()
                        .map(|r| (r.isin.as_str(), r))
                        .collect::<HashMap<_, _>>()
                })
                .unwrap_or_default();
            (key, index)
        })
        .collect();

    let mut out = Vec::with_capacity(reference.records.len());
    for record in &reference.records {
        let mut returns = BTreeMap::new();
        let mut missing_offsets = BTreeSet::new();

        for (key, index) in &indexes {
            match index.get(record.isin.as_str()) {
                Some(past) => {
                    let ret = percent_change(record.close_price, past.close_price).ok_or_else(
                        || MomentumError::InvalidHistoricalPrice {
                            isin: record.isin.clone(),
                            offset: *key,
                            date: past.base_date,
                            price: past.close_price,
                        },
                    )?;
                    returns.insert(*key, ret);
                }
                None => {
                    returns.insert(*key, 0.0);
                    missing_offsets.insert(*key);
                }
            }
        }

        out.push(ScoredSecurity {
            record: record.clone(),
            returns,
            missing_offsets,
            momentum_score: 0.0,
        });
    }

    Ok(out)
}

/// `None` when the base price is zero, negative or not finite.
fn percent_change(current: f64, base: f64) -> Option<f64> {
    if !base.is_finite() || base <= 0.0 {
        return None;
    }
    Some((current - base) / base * 100.0)
}
