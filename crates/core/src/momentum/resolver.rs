use crate::archive::SnapshotArchive;
use crate::domain::security::{SecurityRecord, Snapshot};
use crate::ingest::provider::SnapshotGateway;
use crate::momentum::progress::ProgressSink;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Attempts per target date, counting the target itself. Each retry steps back one day.
    pub max_back_steps: u32,

    /// Deadline for a single gateway call. A timed-out call counts as a failed attempt.
    pub attempt_timeout: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_back_steps: 7,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl ResolverOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("MOMENTUM_MAX_BACK_STEPS") {
            if let Ok(n) = s.parse::<u32>() {
                out.max_back_steps = n;
            }
        }

        if let Ok(s) = std::env::var("MOMENTUM_ATTEMPT_TIMEOUT_SECS") {
            if let Ok(n) = s.parse::<u64>() {
                out.attempt_timeout = Duration::from_secs(n);
            }
        }

        out
    }
}

/// Everything one resolver task needs. Cloning only bumps reference counts.
#[derive(Clone)]
pub struct ResolveContext {
    pub gateway: Arc<dyn SnapshotGateway>,
    pub credential: Arc<str>,
    pub archive: Option<Arc<dyn SnapshotArchive>>,
    pub progress: Arc<dyn ProgressSink>,
    pub options: ResolverOptions,
}

enum AttemptOutcome {
    Found(Vec<SecurityRecord>),
    Empty,
    Failed(anyhow::Error),
    TimedOut,
}

/// Finds the latest non-empty snapshot at or before `target_date`.
///
/// Makes at most `max_back_steps` sequential attempts. Returns `Snapshot::unresolved()` when
/// all of them fail or come back empty.
pub async fn resolve_snapshot(ctx: &ResolveContext, target_date: NaiveDate) -> Snapshot {
    let max_attempts = ctx.options.max_back_steps;
    let mut candidate = target_date;

    for attempt in 1..=max_attempts {
        let ymd = candidate.format("%Y%m%d").to_string();

        match try_date(ctx, candidate).await {
            AttemptOutcome::Found(records) => {
                tracing::info!(%target_date, actual_date = %candidate, attempt, records = records.len(), "snapshot resolved");
                return Snapshot::resolved(candidate, records);
            }
            AttemptOutcome::Empty => {
                ctx.progress
                    .notify(&format!("No data for {ymd} (market closed?)"));
                tracing::debug!(%target_date, %candidate, attempt, "empty snapshot; stepping back");
            }
            AttemptOutcome::Failed(err) => {
                ctx.progress
                    .notify(&format!("⚠️ Failed to fetch for {ymd}: {err:#}"));
                tracing::warn!(%target_date, %candidate, attempt, error = %format!("{err:#}"), "snapshot fetch failed; stepping back");
            }
            AttemptOutcome::TimedOut => {
                ctx.progress.notify(&format!(
                    "⚠️ Timed out fetching {ymd} after {:?}",
                    ctx.options.attempt_timeout
                ));
                tracing::warn!(%target_date, %candidate, attempt, timeout = ?ctx.options.attempt_timeout, "snapshot fetch timed out; stepping back");
            }
        }

        candidate = match candidate.pred_opt() {
            Some(d) => d,
            None => break,
        };
    }

    ctx.progress.notify(&format!(
        "No data found within {max_attempts} days before {}",
        target_date.format("%Y%m%d")
    ));
    tracing::warn!(%target_date, max_attempts, "snapshot unresolved");
    Snapshot::unresolved()
}

async fn try_date(ctx: &ResolveContext, date: NaiveDate) -> AttemptOutcome {
    let ymd = date.format("%Y%m%d").to_string();

    if let Some(archive) = ctx.archive.as_ref() {
        if let Some(records) = archive.lookup(date).filter(|r| !r.is_empty()) {
            ctx.progress
                .notify(&format!("Using archived data for {ymd}"));
            return AttemptOutcome::Found(records);
        }
    }

    ctx.progress.notify(&format!("Fetching data for {ymd}..."));
    let fetch = ctx.gateway.fetch_snapshot(&ctx.credential, date);
    match tokio::time::timeout(ctx.options.attempt_timeout, fetch).await {
        Err(_) => AttemptOutcome::TimedOut,
        Ok(Err(err)) => AttemptOutcome::Failed(err),
        Ok(Ok(records)) if records.is_empty() => AttemptOutcome::Empty,
        Ok(Ok(records)) => AttemptOutcome::Found(records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, record, ymd, StubGateway};
    use std::sync::Mutex;

    #[tokio::test]
    async fn always_empty_gateway_makes_exactly_max_back_steps_attempts() {
        let gateway = Arc::new(StubGateway::default());
        let ctx = context(gateway.clone());

        let snap = resolve_snapshot(&ctx, ymd(2024, 1, 15)).await;

        assert!(!snap.is_resolved());
        assert!(snap.records.is_empty());
        let calls = gateway.calls();
        assert_eq!(calls.len(), 7);
        assert_eq!(calls.first().copied(), Some(ymd(2024, 1, 15)));
        assert_eq!(calls.last().copied(), Some(ymd(2024, 1, 9)));
    }

    #[tokio::test]
    async fn steps_back_over_weekend_and_failures() {
        // 2024-01-14 is a Sunday, 2024-01-13 fails, 2024-01-12 has data.
        let friday = ymd(2024, 1, 12);
        let gateway = Arc::new(
            StubGateway::default()
                .with_records(friday, vec![record("KR7000000001", 1000.0, friday)])
                .with_failure(ymd(2024, 1, 13)),
        );
        let ctx = context(gateway.clone());

        let snap = resolve_snapshot(&ctx, ymd(2024, 1, 14)).await;

        assert_eq!(snap.actual_date, Some(friday));
        assert_eq!(snap.records.len(), 1);
        assert_eq!(gateway.calls(), vec![ymd(2024, 1, 14), ymd(2024, 1, 13), friday]);
    }

    #[tokio::test]
    async fn archived_snapshot_skips_gateway() {
        struct OneDay(NaiveDate, Vec<SecurityRecord>);
        impl SnapshotArchive for OneDay {
            fn lookup(&self, date: NaiveDate) -> Option<Vec<SecurityRecord>> {
                (date == self.0).then(|| self.1.clone())
            }
        }

        let d = ymd(2024, 1, 15);
        let gateway = Arc::new(StubGateway::default());
        let mut ctx = context(gateway.clone());
        ctx.archive = Some(Arc::new(OneDay(d, vec![record("KR7000000001", 1000.0, d)])));

        let snap = resolve_snapshot(&ctx, d).await;

        assert_eq!(snap.actual_date, Some(d));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_archived_entry_falls_through_to_gateway() {
        struct EmptyDay(NaiveDate);
        impl SnapshotArchive for EmptyDay {
            fn lookup(&self, date: NaiveDate) -> Option<Vec<SecurityRecord>> {
                (date == self.0).then(Vec::new)
            }
        }

        let d = ymd(2024, 1, 15);
        let gateway = Arc::new(
            StubGateway::default().with_records(d, vec![record("KR7000000001", 1000.0, d)]),
        );
        let mut ctx = context(gateway.clone());
        ctx.archive = Some(Arc::new(EmptyDay(d)));

        let snap = resolve_snapshot(&ctx, d).await;

        assert_eq!(snap.actual_date, Some(d));
        assert_eq!(snap.records.len(), 1);
        assert_eq!(gateway.calls(), vec![d]);
    }

    #[tokio::test]
    async fn hanging_fetch_counts_as_failed_attempt() {
        let d = ymd(2024, 1, 15);
        let gateway = Arc::new(
            StubGateway::default()
                .with_records(d - chrono::TimeDelta::days(1), vec![record("KR7000000001", 1.0, d)])
                .with_hang(d),
        );
        let mut ctx = context(gateway.clone());
        ctx.options.attempt_timeout = Duration::from_millis(50);

        let snap = resolve_snapshot(&ctx, d).await;

        assert_eq!(snap.actual_date, Some(ymd(2024, 1, 14)));
        assert_eq!(gateway.calls().len(), 2);
    }

    #[tokio::test]
    async fn reports_progress_for_each_attempt() {
        let messages = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = messages.clone();
        let gateway = Arc::new(StubGateway::default().with_failure(ymd(2024, 1, 15)));
        let mut ctx = context(gateway);
        ctx.options.max_back_steps = 2;
        ctx.progress = Arc::new(move |m: &str| sink.lock().unwrap().push(m.to_string()));

        resolve_snapshot(&ctx, ymd(2024, 1, 15)).await;

        let messages = messages.lock().unwrap();
        assert!(messages.iter().any(|m| m == "Fetching data for 20240115..."));
        assert!(messages.iter().any(|m| m.starts_with("⚠️ Failed to fetch for 20240115")));
        assert!(messages.iter().any(|m| m == "No data for 20240114 (market closed?)"));
    }
}
