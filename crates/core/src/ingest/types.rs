use crate::domain::security::SecurityRecord;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Top-level JSON envelope of the public data portal (`resultType=json`).
#[derive(Debug, Clone, Deserialize)]
pub struct PortalEnvelope {
    pub response: PortalResponse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalResponse {
    pub header: PortalHeader,
    #[serde(default)]
    pub body: Option<PortalBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalHeader {
    #[serde(rename = "resultCode")]
    pub result_code: String,
    #[serde(rename = "resultMsg", default)]
    pub result_msg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalBody {
    #[serde(rename = "totalCount", default)]
    pub total_count: u64,
    #[serde(default)]
    pub items: Value,
}

/// One row of `getETFSecuritiesProductInfo`. Numeric columns arrive as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtfItem {
    #[serde(rename = "basDt", deserialize_with = "string_or_number")]
    pub bas_dt: String,
    #[serde(rename = "srtnCd", default, deserialize_with = "string_or_number")]
    pub srtn_cd: String,
    #[serde(deserialize_with = "string_or_number")]
    pub isin: String,
    #[serde(rename = "itmsNm", default, deserialize_with = "string_or_number")]
    pub itms_nm: String,
    #[serde(deserialize_with = "string_or_number")]
    pub clpr: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub vs: String,
    #[serde(rename = "fltRt", default, deserialize_with = "string_or_number")]
    pub flt_rt: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub nav: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub trqu: String,
    #[serde(rename = "trPrc", default, deserialize_with = "string_or_number")]
    pub tr_prc: String,
    #[serde(rename = "mrktTotAmt", default, deserialize_with = "string_or_number")]
    pub mrkt_tot_amt: String,
}

impl PortalBody {
    /// `items` is `""` when empty, `{"item": {...}}` for a single row and `{"item": [...]}`
    /// otherwise.
    pub fn into_items(self) -> Result<Vec<EtfItem>> {
        let item = match self.items {
            Value::Object(mut obj) => obj.remove("item").unwrap_or(Value::Null),
            _ => Value::Null,
        };

        match item {
            Value::Null => Ok(Vec::new()),
            Value::Array(_) => {
                serde_json::from_value(item).context("failed to parse ETF item list")
            }
            Value::Object(_) => {
                let one: EtfItem =
                    serde_json::from_value(item).context("failed to parse single ETF item")?;
                Ok(vec![one])
            }
            Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
            other => anyhow::bail!("unexpected ETF item payload: {other}"),
        }
    }
}

impl TryFrom<EtfItem> for SecurityRecord {
    type Error = anyhow::Error;

    fn try_from(item: EtfItem) -> Result<Self> {
        let isin = item.isin.trim().to_string();
        anyhow::ensure!(!isin.is_empty(), "isin must be non-empty");

        let base_date = NaiveDate::parse_from_str(item.bas_dt.trim(), "%Y%m%d")
            .with_context(|| format!("invalid basDt {:?} for {isin}", item.bas_dt))?;

        let required = |field: &str, raw: &str| {
            parse_num(raw).with_context(|| format!("invalid {field} {raw:?} for {isin}"))
        };

        Ok(Self {
            close_price: required("clpr", &item.clpr)?,
            change: parse_num(&item.vs).unwrap_or(0.0),
            change_rate: parse_num(&item.flt_rt).unwrap_or(0.0),
            // Blank liquidity columns read as 0 so the row is dropped by the liquidity filter.
            volume: parse_num(&item.trqu).unwrap_or(0.0),
            trading_value: parse_num(&item.tr_prc).unwrap_or(0.0),
            market_cap: parse_num(&item.mrkt_tot_amt).unwrap_or(0.0),
            nav: parse_num(&item.nav),
            short_code: item.srtn_cd.trim().to_string(),
            name: item.itms_nm.trim().to_string(),
            base_date,
            isin,
        })
    }
}

pub fn into_records(items: Vec<EtfItem>) -> Result<Vec<SecurityRecord>> {
    items.into_iter().map(SecurityRecord::try_from).collect()
}

fn parse_num(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
