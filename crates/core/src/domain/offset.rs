use crate::momentum::MomentumError;
use chrono::{Months, NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shares per `Filters::min_volume` unit (만주).
pub const VOLUME_UNIT: f64 = 10_000.0;
/// KRW per `Filters::min_amount` unit (억원).
pub const AMOUNT_UNIT: f64 = 100_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetKey {
    T,
    W1,
    W2,
    M1,
    M3,
    M6,
}

impl OffsetKey {
    pub const ALL: [OffsetKey; 6] = [
        OffsetKey::T,
        OffsetKey::W1,
        OffsetKey::W2,
        OffsetKey::M1,
        OffsetKey::M3,
        OffsetKey::M6,
    ];

    /// Offsets that produce a return (everything except the reference date).
    pub const LOOKBACKS: [OffsetKey; 5] = [
        OffsetKey::W1,
        OffsetKey::W2,
        OffsetKey::M1,
        OffsetKey::M3,
        OffsetKey::M6,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OffsetKey::T => "t",
            OffsetKey::W1 => "w1",
            OffsetKey::W2 => "w2",
            OffsetKey::M1 => "m1",
            OffsetKey::M3 => "m3",
            OffsetKey::M6 => "m6",
        }
    }

    /// Calendar date this offset points at. Month steps clamp to the end of a shorter month.
    pub fn target_from(self, reference: NaiveDate) -> Option<NaiveDate> {
        match self {
            OffsetKey::T => Some(reference),
            OffsetKey::W1 => reference.checked_sub_signed(TimeDelta::weeks(1)),
            OffsetKey::W2 => reference.checked_sub_signed(TimeDelta::weeks(2)),
            OffsetKey::M1 => reference.checked_sub_months(Months::new(1)),
            OffsetKey::M3 => reference.checked_sub_months(Months::new(3)),
            OffsetKey::M6 => reference.checked_sub_months(Months::new(6)),
        }
    }
}

impl fmt::Display for OffsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetOffset {
    pub key: OffsetKey,
    pub target_date: NaiveDate,
    pub weight: f64,
}

/// Builds the six lookup targets for one run, reference date first.
pub fn target_offsets(
    reference_date: NaiveDate,
    weights: &Weights,
) -> Result<Vec<TargetOffset>, MomentumError> {
    OffsetKey::ALL
        .iter()
        .map(|&key| {
            let target_date = key.target_from(reference_date).ok_or_else(|| {
                MomentumError::InvalidInput(format!(
                    "reference date {reference_date} is out of range for offset {key}"
                ))
            })?;
            Ok(TargetOffset {
                key,
                target_date,
                weight: weights.weight_for(key),
            })
        })
        .collect()
}

/// Per-offset scoring weights. They are not normalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub w1w: f64,
    pub w2w: f64,
    pub w1m: f64,
    pub w3m: f64,
    pub w6m: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            w1w: 48.0,
            w2w: 24.0,
            w1m: 12.0,
            w3m: 4.0,
            w6m: 2.0,
        }
    }
}

impl Weights {
    pub fn weight_for(&self, key: OffsetKey) -> f64 {
        match key {
            OffsetKey::T => 0.0,
            OffsetKey::W1 => self.w1w,
            OffsetKey::W2 => self.w2w,
            OffsetKey::M1 => self.w1m,
            OffsetKey::M3 => self.w3m,
            OffsetKey::M6 => self.w6m,
        }
    }

    pub fn validate(&self) -> Result<(), MomentumError> {
        for key in OffsetKey::LOOKBACKS {
            let w = self.weight_for(key);
            if !w.is_finite() {
                return Err(MomentumError::InvalidInput(format!(
                    "weight for {key} must be a finite number (got {w})"
                )));
            }
        }
        Ok(())
    }
}

/// Liquidity thresholds and display options.
///
/// `min_volume` is in 10,000-share units and `min_amount` in 100,000,000 KRW units.
/// `compare_days` is carried for callers and not read by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub min_volume: f64,
    pub min_amount: f64,
    pub show_count: usize,
    pub compare_days: u32,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            min_volume: 10.0,
            min_amount: 10.0,
            show_count: 20,
            compare_days: 7,
        }
    }
}

impl Filters {
    pub fn min_volume_shares(&self) -> f64 {
        self.min_volume * VOLUME_UNIT
    }

    pub fn min_trading_value(&self) -> f64 {
        self.min_amount * AMOUNT_UNIT
    }

    pub fn validate(&self) -> Result<(), MomentumError> {
        for (name, v) in [("min_volume", self.min_volume), ("min_amount", self.min_amount)] {
            if !v.is_finite() || v < 0.0 {
                return Err(MomentumError::InvalidInput(format!(
                    "{name} must be a non-negative number (got {v})"
                )));
            }
        }
        Ok(())
    }
}
