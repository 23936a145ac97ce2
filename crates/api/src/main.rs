use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use etf_momentum_core::archive::{JsonSnapshotArchive, SnapshotArchive};
use etf_momentum_core::domain::offset::{Filters, OffsetKey, Weights};
use etf_momentum_core::domain::scored::{top, ScoredSecurity};
use etf_momentum_core::ingest::provider::{DataGoKrGateway, SnapshotGateway};
use etf_momentum_core::momentum::{MomentumError, MomentumPipeline, ProgressSink, ResolverOptions};

const SERVICE_KEY_HEADER: &str = "x-service-key";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = etf_momentum_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let gateway: Arc<dyn SnapshotGateway> = Arc::new(DataGoKrGateway::from_settings(&settings)?);

    let archive: Option<Arc<dyn SnapshotArchive>> = match settings.archive_path.as_deref() {
        Some(path) => match JsonSnapshotArchive::from_path(path) {
            Ok(a) => Some(Arc::new(a)),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %format!("{e:#}"), "snapshot archive load failed; continuing without it");
                None
            }
        },
        None => None,
    };

    if settings.data_go_kr_service_key.is_none() {
        tracing::warn!("DATA_GO_KR_SERVICE_KEY missing; requests must send {SERVICE_KEY_HEADER}");
    }

    let state = AppState {
        gateway,
        archive,
        default_service_key: settings.data_go_kr_service_key.clone(),
        options: ResolverOptions::from_env(),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/momentum", get(get_momentum))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    gateway: Arc<dyn SnapshotGateway>,
    archive: Option<Arc<dyn SnapshotArchive>>,
    default_service_key: Option<String>,
    options: ResolverOptions,
}

/// Omitted weights and filters fall back to their defaults.
#[derive(Debug, Default, Deserialize)]
struct MomentumQuery {
    /// YYYY-MM-DD or YYYYMMDD; today's KST date when absent.
    ref_date: Option<String>,
    w1w: Option<f64>,
    w2w: Option<f64>,
    w1m: Option<f64>,
    w3m: Option<f64>,
    w6m: Option<f64>,
    min_volume: Option<f64>,
    min_amount: Option<f64>,
    show_count: Option<usize>,
    compare_days: Option<u32>,
}

impl MomentumQuery {
    fn weights(&self) -> Weights {
        let d = Weights::default();
        Weights {
            w1w: self.w1w.unwrap_or(d.w1w),
            w2w: self.w2w.unwrap_or(d.w2w),
            w1m: self.w1m.unwrap_or(d.w1m),
            w3m: self.w3m.unwrap_or(d.w3m),
            w6m: self.w6m.unwrap_or(d.w6m),
        }
    }

    fn filters(&self) -> Filters {
        let d = Filters::default();
        Filters {
            min_volume: self.min_volume.unwrap_or(d.min_volume),
            min_amount: self.min_amount.unwrap_or(d.min_amount),
            show_count: self.show_count.unwrap_or(d.show_count),
            compare_days: self.compare_days.unwrap_or(d.compare_days),
        }
    }
}

#[derive(Debug, Serialize)]
struct MomentumResponse {
    run_id: Uuid,
    reference_date: NaiveDate,
    resolved_dates: BTreeMap<OffsetKey, Option<NaiveDate>>,
    total_ranked: usize,
    items: Vec<ScoredSecurity>,
    progress: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    run_id: Uuid,
    error: String,
    progress: Vec<String>,
}

async fn get_momentum(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MomentumQuery>,
) -> Result<Json<MomentumResponse>, (StatusCode, Json<ApiError>)> {
    let run_id = Uuid::new_v4();
    let weights = query.weights();
    let filters = query.filters();

    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = log.clone();
    let progress: Arc<dyn ProgressSink> = Arc::new(move |msg: &str| {
        tracing::debug!(%run_id, "{msg}");
        if let Ok(mut lines) = sink.lock() {
            lines.push(msg.to_string());
        }
    });
    let drain = |log: &Mutex<Vec<String>>| log.lock().map(|l| l.clone()).unwrap_or_default();

    let service_key = headers
        .get(SERVICE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| state.default_service_key.clone())
        .unwrap_or_default();

    let result = async {
        let reference_date = etf_momentum_core::time::kr_market::resolve_reference_date(
            query.ref_date.as_deref(),
            chrono::Utc::now(),
        )?;

        let mut pipeline = MomentumPipeline::new(state.gateway.clone())
            .with_options(state.options)
            .with_progress(progress);
        if let Some(archive) = state.archive.clone() {
            pipeline = pipeline.with_archive(archive);
        }

        pipeline
            .run(&service_key, reference_date, &weights, &filters)
            .await
    }
    .await;

    match result {
        Ok(report) => {
            tracing::info!(%run_id, reference_date = %report.reference_date, ranked = report.ranked.len(), "momentum request served");
            Ok(Json(MomentumResponse {
                run_id,
                reference_date: report.reference_date,
                resolved_dates: report.resolved_dates,
                total_ranked: report.ranked.len(),
                items: top(&report.ranked, filters.show_count).to_vec(),
                progress: drain(&log),
            }))
        }
        Err(err) => {
            let status = status_for(&err);
            let message = err.to_string();
            tracing::warn!(%run_id, %status, error = %message, "momentum request failed");
            if status.is_server_error() {
                sentry_anyhow::capture_anyhow(&anyhow::Error::new(err));
            }
            Err((
                status,
                Json(ApiError {
                    run_id,
                    error: message,
                    progress: drain(&log),
                }),
            ))
        }
    }
}

fn status_for(err: &MomentumError) -> StatusCode {
    match err {
        MomentumError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        MomentumError::ReferenceDateUnresolved { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        MomentumError::InvalidHistoricalPrice { .. } => StatusCode::BAD_GATEWAY,
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
