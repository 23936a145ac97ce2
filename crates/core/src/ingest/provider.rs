use crate::config::Settings;
use crate::domain::security::SecurityRecord;
use crate::ingest::types::{into_records, EtfItem, PortalEnvelope};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::StatusCode;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://apis.data.go.kr";
const ETF_PATH: &str =
    "/1160100/service/GetSecuritiesProductInfoService/getETFSecuritiesProductInfo";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 2;
const MAX_RETRIES: u32 = 8;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_ROWS_PER_PAGE: u32 = 1000;
const MAX_PAGES: u32 = 20;
const RESULT_CODE_OK: &str = "00";

/// Source of end-of-day ETF records for one calendar date.
///
/// An empty `Vec` means the market was closed or nothing was published for that date. Any error
/// is treated by callers as "this attempt failed".
#[async_trait::async_trait]
pub trait SnapshotGateway: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_snapshot(&self, credential: &str, date: NaiveDate)
        -> Result<Vec<SecurityRecord>>;
}

/// Client for the public data portal's `getETFSecuritiesProductInfo` endpoint.
#[derive(Debug, Clone)]
pub struct DataGoKrGateway {
    http: reqwest::Client,
    base_url: String,
    rows_per_page: u32,
    retries: u32,
    backoff: Duration,
}

struct PortalPage {
    items: Vec<EtfItem>,
    total_count: u64,
}

impl DataGoKrGateway {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .data_go_kr_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("DATA_GO_KR_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("DATA_GO_KR_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .clamp(1, MAX_RETRIES);

        let rows_per_page = std::env::var("DATA_GO_KR_ROWS_PER_PAGE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_ROWS_PER_PAGE);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build data.go.kr http client")?;

        Ok(Self {
            http,
            base_url,
            rows_per_page,
            retries,
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Doubles per attempt: `backoff`, `2 * backoff`, `4 * backoff`, ...
    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), ETF_PATH)
    }

    async fn fetch_page(&self, service_key: &str, date: NaiveDate, page_no: u32) -> Result<PortalPage> {
        let params = [
            ("serviceKey", service_key.to_string()),
            ("numOfRows", self.rows_per_page.to_string()),
            ("pageNo", page_no.to_string()),
            ("resultType", "json".to_string()),
            ("basDt", date.format("%Y%m%d").to_string()),
        ];

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let res = match self.http.get(self.url()).query(&params).send().await {
                Ok(r) => r,
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err).context("data.go.kr request failed");
                    }
                    let backoff = self.backoff_for(attempt);
                    tracing::warn!(attempt, ?backoff, %date, page_no, error = %err, "data.go.kr request failed; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = res.status();
            let text = res
                .text()
                .await
                .context("failed to read data.go.kr response")?;

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < self.retries {
                let backoff = self.backoff_for(attempt);
                tracing::warn!(attempt, ?backoff, %date, page_no, http_status = %status, "data.go.kr HTTP error; retrying");
                tokio::time::sleep(backoff).await;
                continue;
            }

            return parse_page(status, &text);
        }
    }
}

#[async_trait::async_trait]
impl SnapshotGateway for DataGoKrGateway {
    fn provider_name(&self) -> &'static str {
        "data_go_kr_etf"
    }

    async fn fetch_snapshot(
        &self,
        credential: &str,
        date: NaiveDate,
    ) -> Result<Vec<SecurityRecord>> {
        let service_key = decode_service_key(credential);

        let mut items: Vec<EtfItem> = Vec::new();
        let mut page_no: u32 = 1;
        loop {
            let page = self.fetch_page(&service_key, date, page_no).await?;
            let fetched = page.items.len();
            items.extend(page.items);

            tracing::debug!(%date, page_no, fetched, total = page.total_count, "data.go.kr page");

            if fetched == 0 || items.len() as u64 >= page.total_count {
                break;
            }
            if page_no >= MAX_PAGES {
                tracing::warn!(%date, collected = items.len(), total = page.total_count, "data.go.kr page cap reached");
                break;
            }
            page_no += 1;
        }

        into_records(items).with_context(|| format!("failed to convert ETF rows for {date}"))
    }
}

fn parse_page(status: StatusCode, text: &str) -> Result<PortalPage> {
    // The portal answers in XML (ignoring resultType) when the key is rejected.
    if text.trim_start().starts_with('<') {
        anyhow::bail!(
            "data.go.kr returned an XML error (HTTP {status}); authentication failed or the service is unavailable, check the service key"
        );
    }

    if !status.is_success() {
        anyhow::bail!("data.go.kr HTTP {status}: {text}");
    }

    let envelope = serde_json::from_str::<PortalEnvelope>(text)
        .with_context(|| format!("data.go.kr response is not the expected JSON: {text}"))?;

    let header = envelope.response.header;
    if header.result_code != RESULT_CODE_OK {
        anyhow::bail!(
            "data.go.kr API error [{}]: {}",
            header.result_code,
            header.result_msg
        );
    }

    let Some(body) = envelope.response.body else {
        return Ok(PortalPage {
            items: Vec::new(),
            total_count: 0,
        });
    };

    let total_count = body.total_count;
    Ok(PortalPage {
        items: body.into_items()?,
        total_count,
    })
}

/// Keys copied from the portal are often the URL-encoded variant; the query builder encodes
/// again, so decode first. Only `%XX` escapes are decoded; a literal `+` stays a `+`.
fn decode_service_key(key: &str) -> String {
    let key = key.trim();
    if !key.contains('%') {
        return key.to_string();
    }

    let escaped = key.replace('+', "%2B");
    reqwest::Url::parse(&format!("http://localhost/?k={escaped}"))
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "k")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or_else(|| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::routing::get;
    use axum::Router;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Respond = dyn Fn(usize, u32) -> (u16, String) + Send + Sync;

    /// Local stand-in for the portal. `respond` gets the zero-based hit index and `pageNo`.
    #[derive(Clone)]
    struct FakePortal {
        hits: Arc<AtomicUsize>,
        respond: Arc<Respond>,
    }

    async fn portal_handler(
        State(portal): State<FakePortal>,
        Query(q): Query<HashMap<String, String>>,
    ) -> (axum::http::StatusCode, String) {
        let hit = portal.hits.fetch_add(1, Ordering::SeqCst);
        let page_no = q.get("pageNo").and_then(|p| p.parse().ok()).unwrap_or(1);
        let (code, body) = (portal.respond)(hit, page_no);
        (axum::http::StatusCode::from_u16(code).unwrap(), body)
    }

    async fn spawn_portal(
        respond: impl Fn(usize, u32) -> (u16, String) + Send + Sync + 'static,
    ) -> (String, Arc<AtomicUsize>) {
        let portal = FakePortal {
            hits: Arc::new(AtomicUsize::new(0)),
            respond: Arc::new(respond),
        };
        let hits = portal.hits.clone();
        let app = Router::new()
            .route(ETF_PATH, get(portal_handler))
            .with_state(portal);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    fn local_gateway(base_url: String, rows_per_page: u32, retries: u32) -> DataGoKrGateway {
        DataGoKrGateway {
            http: reqwest::Client::builder().no_proxy().build().unwrap(),
            base_url,
            rows_per_page,
            retries,
            backoff: Duration::from_millis(10),
        }
    }

    fn row(isin: &str) -> Value {
        json!({
            "basDt": "20240115",
            "srtnCd": "069500",
            "isin": isin,
            "itmsNm": "KODEX 200",
            "clpr": "35200",
            "trqu": "4567890",
            "trPrc": "160123456789"
        })
    }

    fn page_body(total_count: u64, rows: Vec<Value>) -> String {
        let num_of_rows = rows.len();
        let items = if rows.is_empty() {
            json!("")
        } else {
            json!({ "item": rows })
        };
        json!({
            "response": {
                "header": {"resultCode": "00", "resultMsg": "NORMAL SERVICE."},
                "body": {"numOfRows": num_of_rows, "pageNo": 1, "totalCount": total_count, "items": items}
            }
        })
        .to_string()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[tokio::test]
    async fn follows_pages_until_total_count() {
        let (base, hits) = spawn_portal(|_, page_no| match page_no {
            1 => (200, page_body(3, vec![row("KR7000000001"), row("KR7000000002")])),
            2 => (200, page_body(3, vec![row("KR7000000003")])),
            _ => (200, page_body(3, vec![])),
        })
        .await;

        let records = local_gateway(base, 2, 1)
            .fetch_snapshot("key", day())
            .await
            .unwrap();

        let isins: Vec<_> = records.iter().map(|r| r.isin.as_str()).collect();
        assert_eq!(isins, vec!["KR7000000001", "KR7000000002", "KR7000000003"]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stops_on_empty_page_before_total_count() {
        let (base, hits) = spawn_portal(|_, page_no| match page_no {
            1 => (200, page_body(10, vec![row("KR7000000001"), row("KR7000000002")])),
            _ => (200, page_body(10, vec![])),
        })
        .await;

        let records = local_gateway(base, 2, 1)
            .fetch_snapshot("key", day())
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn page_cap_bounds_requests() {
        let (base, hits) = spawn_portal(|hit, _| {
            (200, page_body(1_000_000, vec![row(&format!("KR{hit:010}"))]))
        })
        .await;

        let records = local_gateway(base, 1, 1)
            .fetch_snapshot("key", day())
            .await
            .unwrap();

        assert_eq!(records.len(), MAX_PAGES as usize);
        assert_eq!(hits.load(Ordering::SeqCst), MAX_PAGES as usize);
    }

    #[tokio::test]
    async fn retries_once_after_service_unavailable() {
        let (base, hits) = spawn_portal(|hit, _| match hit {
            0 => (503, "busy".to_string()),
            _ => (200, page_body(1, vec![row("KR7000000001")])),
        })
        .await;

        let records = local_gateway(base, 2, 2)
            .fetch_snapshot("key", day())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let (base, hits) = spawn_portal(|_, _| (400, "bad request".to_string())).await;

        let err = local_gateway(base, 2, 3)
            .fetch_snapshot("key", day())
            .await
            .err()
            .unwrap();

        assert!(format!("{err:#}").contains("400"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_configured_retries() {
        let (base, hits) = spawn_portal(|_, _| (429, "slow down".to_string())).await;

        let result = local_gateway(base, 2, 3).fetch_snapshot("key", day()).await;

        assert!(result.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn decodes_url_encoded_service_key_only() {
        assert_eq!(decode_service_key("abc%2Bdef%3D%3D"), "abc+def==");
        assert_eq!(decode_service_key(" abc+def== "), "abc+def==");
    }

    #[test]
    fn partly_encoded_key_keeps_literal_plus() {
        assert_eq!(decode_service_key("ab+c%3D"), "ab+c=");
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let gw = local_gateway("http://127.0.0.1:1".to_string(), 10, 2);
        assert_eq!(gw.backoff_for(1), gw.backoff);
        assert_eq!(gw.backoff_for(3), gw.backoff * 4);
        assert_eq!(gw.backoff_for(200), gw.backoff.saturating_mul(u32::MAX));
    }

    #[test]
    fn xml_body_is_reported_as_auth_error() {
        let xml = "<OpenAPI_ServiceResponse><cmmMsgHeader><errMsg>SERVICE ERROR</errMsg></cmmMsgHeader></OpenAPI_ServiceResponse>";
        let err = parse_page(StatusCode::OK, xml).err().unwrap();
        assert!(err.to_string().contains("check the service key"));
    }

    #[test]
    fn non_ok_result_code_is_an_error() {
        let body = json!({
            "response": {"header": {"resultCode": "30", "resultMsg": "SERVICE_KEY_IS_NOT_REGISTERED_ERROR"}}
        })
        .to_string();
        let err = parse_page(StatusCode::OK, &body).err().unwrap();
        assert!(err.to_string().contains("[30]"));
    }

    #[test]
    fn closed_market_day_parses_to_empty_page() {
        let body = json!({
            "response": {
                "header": {"resultCode": "00", "resultMsg": "NORMAL SERVICE."},
                "body": {"numOfRows": 1000, "pageNo": 1, "totalCount": 0, "items": ""}
            }
        })
        .to_string();
        let page = parse_page(StatusCode::OK, &body).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 0);
    }

    #[test]
    fn http_error_status_is_an_error() {
        assert!(parse_page(StatusCode::BAD_GATEWAY, "{}").is_err());
    }
}
