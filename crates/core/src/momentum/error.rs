use crate::domain::offset::OffsetKey;
use chrono::NaiveDate;
use thiserror::Error;

/// Conditions that stop a pipeline run. Failed fetch attempts and unresolved lookback
/// snapshots are absorbed by the resolver and never show up here.
#[derive(Debug, Error)]
pub enum MomentumError {
    #[error(
        "no market data found for reference date {reference_date} or the {attempts} days before it; \
         it may be a market holiday, or the service key may be invalid"
    )]
    ReferenceDateUnresolved {
        reference_date: NaiveDate,
        attempts: u32,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid historical price {price} for {isin} at offset {offset} ({date})")]
    InvalidHistoricalPrice {
        isin: String,
        offset: OffsetKey,
        date: NaiveDate,
        price: f64,
    },
}
