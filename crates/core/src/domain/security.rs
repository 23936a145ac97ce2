use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One ETF's end-of-day state on one business date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRecord {
    pub isin: String,
    pub short_code: String,
    pub name: String,
    pub close_price: f64,
    /// Price change vs the previous business day.
    pub change: f64,
    /// Percentage change vs the previous business day.
    pub change_rate: f64,
    /// Shares traded.
    pub volume: f64,
    /// KRW traded.
    pub trading_value: f64,
    pub market_cap: f64,
    pub nav: Option<f64>,
    pub base_date: NaiveDate,
}

/// Records observed for one resolved business date.
///
/// `actual_date` is the date data was found for, which can be earlier than the date that was
/// asked for. An unresolved snapshot has no date and no records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub actual_date: Option<NaiveDate>,
    pub records: Vec<SecurityRecord>,
}

impl Snapshot {
    pub fn unresolved() -> Self {
        Self::default()
    }

    /// Builds a resolved snapshot, keeping the first record per ISIN.
    pub fn resolved(actual_date: NaiveDate, records: Vec<SecurityRecord>) -> Self {
        let mut seen = HashSet::with_capacity(records.len());
        let total = records.len();
        let records: Vec<SecurityRecord> = records
            .into_iter()
            .filter(|r| seen.insert(r.isin.clone()))
            .collect();

        if records.len() != total {
            tracing::warn!(
                %actual_date,
                dropped = total - records.len(),
                "duplicate ISINs in snapshot; keeping first occurrence"
            );
        }

        Self {
            actual_date: Some(actual_date),
            records,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.actual_date.is_some()
    }
}
