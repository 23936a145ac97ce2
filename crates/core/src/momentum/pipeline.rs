use crate::archive::SnapshotArchive;
use crate::domain::offset::{Filters, OffsetKey, Weights};
use crate::domain::scored::ScoredSecurity;
use crate::ingest::provider::SnapshotGateway;
use crate::momentum::error::MomentumError;
use crate::momentum::progress::{no_progress, ProgressSink};
use crate::momentum::resolver::{ResolveContext, ResolverOptions};
use crate::momentum::returns::compute_returns;
use crate::momentum::schedule::schedule;
use crate::momentum::score::score_and_filter;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct MomentumReport {
    pub reference_date: NaiveDate,
    /// Business date each offset resolved to; `None` when it stayed unresolved.
    pub resolved_dates: BTreeMap<OffsetKey, Option<NaiveDate>>,
    pub ranked: Vec<ScoredSecurity>,
}

pub struct MomentumPipeline {
    gateway: Arc<dyn SnapshotGateway>,
    archive: Option<Arc<dyn SnapshotArchive>>,
    progress: Arc<dyn ProgressSink>,
    options: ResolverOptions,
}

impl MomentumPipeline {
    pub fn new(gateway: Arc<dyn SnapshotGateway>) -> Self {
        Self {
            gateway,
            archive: None,
            progress: no_progress(),
            options: ResolverOptions::default(),
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn SnapshotArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn run(
        &self,
        credential: &str,
        reference_date: NaiveDate,
        weights: &Weights,
        filters: &Filters,
    ) -> Result<MomentumReport, MomentumError> {
        self.validate(credential, weights, filters)?;

        tracing::info!(
            %reference_date,
            provider = self.gateway.provider_name(),
            archive = self.archive.is_some(),
            max_back_steps = self.options.max_back_steps,
            "momentum run started"
        );

        let ctx = ResolveContext {
            gateway: self.gateway.clone(),
            credential: Arc::from(credential.trim()),
            archive: self.archive.clone(),
            progress: self.progress.clone(),
            options: self.options,
        };

        let snapshots = schedule(&ctx, reference_date, weights).await?;
        let resolved_dates: BTreeMap<OffsetKey, Option<NaiveDate>> = snapshots
            .iter()
            .map(|(k, s)| (*k, s.actual_date))
            .collect();

        let reference = snapshots
            .get(&OffsetKey::T)
            .ok_or(MomentumError::ReferenceDateUnresolved {
                reference_date,
                attempts: self.options.max_back_steps,
            })?;

        let scored = compute_returns(reference, &snapshots)?;
        let candidates = scored.len();
        let ranked = score_and_filter(scored, weights, filters);

        tracing::info!(
            %reference_date,
            actual_date = ?reference.actual_date,
            candidates,
            ranked = ranked.len(),
            "momentum run finished"
        );

        Ok(MomentumReport {
            reference_date,
            resolved_dates,
            ranked,
        })
    }

    fn validate(
        &self,
        credential: &str,
        weights: &Weights,
        filters: &Filters,
    ) -> Result<(), MomentumError> {
        if credential.trim().is_empty() {
            return Err(MomentumError::InvalidInput(
                "a data.go.kr service key is required".to_string(),
            ));
        }
        if self.options.max_back_steps == 0 {
            return Err(MomentumError::InvalidInput(
                "max_back_steps must be at least 1".to_string(),
            ));
        }
        weights.validate()?;
        filters.validate()?;
        Ok(())
    }
}

/// Runs one pipeline and returns the full ranking, highest score first.
pub async fn run_momentum_pipeline(
    gateway: Arc<dyn SnapshotGateway>,
    credential: &str,
    reference_date: NaiveDate,
    weights: &Weights,
    filters: &Filters,
    on_progress: Option<Arc<dyn ProgressSink>>,
) -> Result<Vec<ScoredSecurity>, MomentumError> {
    let mut pipeline = MomentumPipeline::new(gateway);
    if let Some(progress) = on_progress {
        pipeline = pipeline.with_progress(progress);
    }

    let report = pipeline
        .run(credential, reference_date, weights, filters)
        .await?;
    Ok(report.ranked)
}
