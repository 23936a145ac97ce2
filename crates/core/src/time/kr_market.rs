use crate::momentum::MomentumError;
use chrono::{DateTime, NaiveDate, Utc};

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Reference date from user input (`YYYY-MM-DD` or `YYYYMMDD`), or today's KST date.
///
/// Weekends and holidays are not rolled back here; the snapshot resolver finds the last open
/// day by stepping backward.
pub fn resolve_reference_date(
    arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> Result<NaiveDate, MomentumError> {
    match arg.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_reference_date(s),
        None => today_kst(now_utc),
    }
}

pub fn parse_reference_date(s: &str) -> Result<NaiveDate, MomentumError> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .map_err(|_| {
            MomentumError::InvalidInput(format!(
                "reference date must be YYYY-MM-DD or YYYYMMDD (got {s:?})"
            ))
        })
}

fn today_kst(now_utc: DateTime<Utc>) -> Result<NaiveDate, MomentumError> {
    let kst = chrono::FixedOffset::east_opt(KST_OFFSET_SECS)
        .ok_or_else(|| MomentumError::InvalidInput("invalid KST offset".to_string()))?;
    Ok(now_utc.with_timezone(&kst).date_naive())
}
