//! Read-only store of previously saved snapshots, consulted before the gateway.

use crate::domain::security::SecurityRecord;
use crate::ingest::types::{into_records, EtfItem};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub trait SnapshotArchive: Send + Sync {
    /// Records saved for `date`, if any.
    fn lookup(&self, date: NaiveDate) -> Option<Vec<SecurityRecord>>;
}

/// Archive loaded from a JSON object of `"YYYYMMDD"` keys to raw portal rows.
#[derive(Debug, Clone, Default)]
pub struct JsonSnapshotArchive {
    by_date: HashMap<NaiveDate, Vec<SecurityRecord>>,
}

impl JsonSnapshotArchive {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<EtfItem>> =
            serde_json::from_str(text).context("snapshot archive is not valid JSON")?;

        let mut by_date = HashMap::with_capacity(raw.len());
        for (key, items) in raw {
            let date = NaiveDate::parse_from_str(key.trim(), "%Y%m%d")
                .with_context(|| format!("invalid archive date key {key:?}"))?;
            let records =
                into_records(items).with_context(|| format!("invalid archive rows for {key}"))?;
            by_date.insert(date, records);
        }

        Ok(Self { by_date })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot archive {}", path.display()))?;
        let archive = Self::from_json_str(&text)?;
        tracing::info!(path = %path.display(), dates = archive.len(), "loaded snapshot archive");
        Ok(archive)
    }

    pub fn len(&self) -> usize {
        self.by_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }
}

impl SnapshotArchive for JsonSnapshotArchive {
    fn lookup(&self, date: NaiveDate) -> Option<Vec<SecurityRecord>> {
        self.by_date.get(&date).cloned()
    }
}
