use crate::domain::security::SecurityRecord;
use crate::ingest::provider::SnapshotGateway;
use crate::momentum::progress::no_progress;
use crate::momentum::resolver::{ResolveContext, ResolverOptions};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A liquid record that passes the default filters.
pub(crate) fn record(isin: &str, close_price: f64, base_date: NaiveDate) -> SecurityRecord {
    SecurityRecord {
        isin: isin.to_string(),
        short_code: isin[isin.len().saturating_sub(6)..].to_string(),
        name: format!("ETF {isin}"),
        close_price,
        change: 0.0,
        change_rate: 0.0,
        volume: 1_000_000.0,
        trading_value: 10_000_000_000.0,
        market_cap: 100_000_000_000.0,
        nav: Some(close_price),
        base_date,
    }
}

/// Deterministic gateway: dates with records return them, listed failures error, listed hangs
/// never complete, everything else is empty.
#[derive(Default)]
pub(crate) struct StubGateway {
    by_date: HashMap<NaiveDate, Vec<SecurityRecord>>,
    failing: HashSet<NaiveDate>,
    hanging: HashSet<NaiveDate>,
    calls: Mutex<Vec<NaiveDate>>,
}

impl StubGateway {
    pub(crate) fn with_records(mut self, date: NaiveDate, records: Vec<SecurityRecord>) -> Self {
        self.by_date.insert(date, records);
        self
    }

    pub(crate) fn with_failure(mut self, date: NaiveDate) -> Self {
        self.failing.insert(date);
        self
    }

    pub(crate) fn with_hang(mut self, date: NaiveDate) -> Self {
        self.hanging.insert(date);
        self
    }

    pub(crate) fn calls(&self) -> Vec<NaiveDate> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SnapshotGateway for StubGateway {
    fn provider_name(&self) -> &'static str {
        "stub"
    }

    async fn fetch_snapshot(
        &self,
        _credential: &str,
        date: NaiveDate,
    ) -> Result<Vec<SecurityRecord>> {
        self.calls.lock().unwrap().push(date);

        if self.hanging.contains(&date) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.contains(&date) {
            anyhow::bail!("stub transport error for {date}");
        }
        Ok(self.by_date.get(&date).cloned().unwrap_or_default())
    }
}

pub(crate) fn context(gateway: Arc<StubGateway>) -> ResolveContext {
    ResolveContext {
        gateway,
        credential: Arc::from("test-key"),
        archive: None,
        progress: no_progress(),
        options: ResolverOptions::default(),
    }
}
