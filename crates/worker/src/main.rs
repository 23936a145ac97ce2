use anyhow::Context;
use clap::Parser;
use etf_momentum_core::archive::{JsonSnapshotArchive, SnapshotArchive};
use etf_momentum_core::domain::offset::{Filters, OffsetKey, Weights, VOLUME_UNIT};
use etf_momentum_core::domain::scored::{top, ScoredSecurity};
use etf_momentum_core::ingest::provider::DataGoKrGateway;
use etf_momentum_core::momentum::{MomentumPipeline, ProgressSink, ResolverOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "etf_momentum_worker", about = "Rank KRX ETFs by weighted multi-period momentum")]
struct Args {
    /// Reference date (YYYY-MM-DD or YYYYMMDD). Defaults to today's KST date.
    #[arg(long)]
    ref_date: Option<String>,

    /// data.go.kr service key. Falls back to DATA_GO_KR_SERVICE_KEY.
    #[arg(long)]
    service_key: Option<String>,

    #[arg(long, default_value_t = 48.0)]
    w1w: f64,
    #[arg(long, default_value_t = 24.0)]
    w2w: f64,
    #[arg(long, default_value_t = 12.0)]
    w1m: f64,
    #[arg(long, default_value_t = 4.0)]
    w3m: f64,
    #[arg(long, default_value_t = 2.0)]
    w6m: f64,

    /// Minimum reference-date volume, in units of 10,000 shares.
    #[arg(long, default_value_t = 10.0)]
    min_volume: f64,

    /// Minimum reference-date trading value, in units of 100,000,000 KRW.
    #[arg(long, default_value_t = 10.0)]
    min_amount: f64,

    /// Rows to print.
    #[arg(long, default_value_t = 20)]
    show_count: usize,

    #[arg(long, default_value_t = 7)]
    compare_days: u32,

    /// Attempts per date before giving up (each retry steps back one day).
    #[arg(long)]
    max_back_steps: Option<u32>,

    #[arg(long)]
    attempt_timeout_secs: Option<u64>,

    /// JSON snapshot archive consulted before calling the API. Falls back to
    /// MOMENTUM_ARCHIVE_PATH.
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Print the full report as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = etf_momentum_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = run(&args, &settings).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "momentum run failed");
    }
    res
}

async fn run(args: &Args, settings: &etf_momentum_core::config::Settings) -> anyhow::Result<()> {
    let reference_date = etf_momentum_core::time::kr_market::resolve_reference_date(
        args.ref_date.as_deref(),
        chrono::Utc::now(),
    )?;

    let service_key = match args.service_key.as_deref() {
        Some(k) => k.to_string(),
        None => settings.require_service_key()?.to_string(),
    };

    let weights = Weights {
        w1w: args.w1w,
        w2w: args.w2w,
        w1m: args.w1m,
        w3m: args.w3m,
        w6m: args.w6m,
    };
    let filters = Filters {
        min_volume: args.min_volume,
        min_amount: args.min_amount,
        show_count: args.show_count,
        compare_days: args.compare_days,
    };

    let mut options = ResolverOptions::from_env();
    if let Some(n) = args.max_back_steps {
        options.max_back_steps = n;
    }
    if let Some(secs) = args.attempt_timeout_secs {
        options.attempt_timeout = Duration::from_secs(secs);
    }

    let gateway = Arc::new(DataGoKrGateway::from_settings(settings)?);
    let progress: Arc<dyn ProgressSink> =
        Arc::new(|msg: &str| tracing::info!(target: "progress", "{msg}"));

    let mut pipeline = MomentumPipeline::new(gateway)
        .with_options(options)
        .with_progress(progress);

    let archive_path = args
        .archive
        .clone()
        .or_else(|| settings.archive_path.as_ref().map(PathBuf::from));
    if let Some(path) = archive_path {
        let archive: Arc<dyn SnapshotArchive> = Arc::new(JsonSnapshotArchive::from_path(&path)?);
        pipeline = pipeline.with_archive(archive);
    }

    let report = pipeline
        .run(&service_key, reference_date, &weights, &filters)
        .await?;

    for (key, date) in &report.resolved_dates {
        match date {
            Some(d) => tracing::info!(offset = %key, resolved = %d, "offset snapshot"),
            None => tracing::warn!(offset = %key, "offset snapshot unresolved; returns count as 0"),
        }
    }

    if args.json {
        let out = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{out}");
    } else {
        print_table(top(&report.ranked, filters.show_count), report.ranked.len());
    }

    Ok(())
}

fn print_table(rows: &[ScoredSecurity], total: usize) {
    println!(
        "{:>4}  {:<8}  {:<32}  {:>10}  {:>7}  {:>10}  {:>10}  {:>7}  {:>7}  {:>7}  {:>7}  {:>7}",
        "rank", "code", "name", "close", "chg%", "vol(10k)", "score", "1w%", "2w%", "1m%", "3m%", "6m%"
    );
    for (idx, s) in rows.iter().enumerate() {
        println!("{}", format_row(idx + 1, s));
    }
    println!("showing {} of {total} ranked ETFs", rows.len());
}

fn format_row(rank: usize, s: &ScoredSecurity) -> String {
    format!(
        "{:>4}  {:<8}  {:<32}  {:>10.0}  {:>7.2}  {:>10.1}  {:>10.2}  {:>7.2}  {:>7.2}  {:>7.2}  {:>7.2}  {:>7.2}",
        rank,
        s.record.short_code,
        s.record.name,
        s.record.close_price,
        s.record.change_rate,
        s.record.volume / VOLUME_UNIT,
        s.momentum_score,
        s.return_for(OffsetKey::W1),
        s.return_for(OffsetKey::W2),
        s.return_for(OffsetKey::M1),
        s.return_for(OffsetKey::M3),
        s.return_for(OffsetKey::M6),
    )
}

fn init_sentry(settings: &etf_momentum_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
