//! Versioned remote dataset: table name → Parquet URL, plus cache
//! validation against the dataset's published update time.
//!
//! The dataset root publishes `resolve/main/spec.json`:
//!
//! ```json
//! { "latest_data_tag": "2025-06-01", "update_time": "2025-06-01" }
//! ```

use crate::columnar::ColumnarCacheEngine;
use crate::error::CacheError;
use crate::origin::Origin;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://huggingface.co/datasets/defeatbeta/yahoo-finance-data";

/// Tables published by the dataset.
pub const KNOWN_TABLES: &[&str] = &[
    "stock_profile",
    "stock_prices",
    "stock_statement",
    "stock_news",
    "stock_officers",
    "stock_earning_call_transcripts",
    "stock_shares_outstanding",
    "stock_tailing_eps",
    "stock_historical_eps",
    "stock_split_events",
    "stock_dividend_events",
    "stock_revenue_breakdown",
    "stock_sec_filing",
    "stock_earning_calendar",
    "exchange_rate",
    "daily_treasury_yield",
];

/// File under the cache root recording which dataset version it holds.
const STATE_FILE: &str = "dataset.json";

/// Contents of the dataset's `spec.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub latest_data_tag: String,
    pub update_time: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheState {
    update_time: String,
}

pub struct DatasetClient {
    base_url: String,
    origin: Arc<dyn Origin>,
}

impl DatasetClient {
    pub fn new(base_url: impl Into<String>, origin: Arc<dyn Origin>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            origin,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn spec_url(&self) -> String {
        format!("{}/resolve/main/spec.json", self.base_url)
    }

    /// Download and parse `spec.json`. Always hits the network.
    pub fn fetch_spec(&self) -> Result<DatasetSpec, CacheError> {
        let url = self.spec_url();
        let mut body = self.origin.get(&url)?;
        let mut raw = Vec::new();
        body.reader.read_to_end(&mut raw).map_err(|e| CacheError::Download {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let spec: DatasetSpec = serde_json::from_slice(&raw)
            .map_err(|e| CacheError::Dataset(format!("malformed {url}: {e}")))?;
        if spec.latest_data_tag.trim().is_empty() {
            return Err(CacheError::Dataset(format!("{url} has an empty latest_data_tag")));
        }
        debug!(tag = %spec.latest_data_tag, update_time = %spec.update_time, "fetched dataset spec");
        Ok(spec)
    }

    /// URL of `table` at revision `tag`.
    pub fn table_url(&self, table: &str, tag: &str) -> Result<String, CacheError> {
        if !KNOWN_TABLES.contains(&table) {
            return Err(CacheError::UnknownTable(table.to_string()));
        }
        Ok(format!("{}/resolve/{tag}/data/{table}.parquet", self.base_url))
    }

    /// URL of `table` at the dataset's latest revision.
    pub fn resolve_table(&self, table: &str) -> Result<String, CacheError> {
        if !KNOWN_TABLES.contains(&table) {
            return Err(CacheError::UnknownTable(table.to_string()));
        }
        let spec = self.fetch_spec()?;
        self.table_url(table, &spec.latest_data_tag)
    }

    /// Clear `engine`'s caches when the dataset has been republished since
    /// they were filled. Returns whether anything was cleared.
    pub fn validate_cache(&self, engine: &ColumnarCacheEngine) -> Result<bool, CacheError> {
        let remote = self.fetch_spec()?;
        let state_path = engine.cache_dir().join(STATE_FILE);
        let recorded = read_state(&state_path);

        if recorded.as_deref() == Some(remote.update_time.as_str()) {
            info!(update_time = %remote.update_time, "cache is up to date");
            return Ok(false);
        }

        info!(
            cached = ?recorded,
            remote = %remote.update_time,
            "dataset republished; clearing cache"
        );
        engine.clear()?;
        write_state(engine.cache_dir(), &state_path, &remote.update_time)?;
        Ok(true)
    }
}

fn read_state(path: &Path) -> Option<String> {
    let raw = fs::read(path).ok()?;
    serde_json::from_slice::<CacheState>(&raw)
        .ok()
        .map(|s| s.update_time)
}

fn write_state(root: &Path, path: &Path, update_time: &str) -> Result<(), CacheError> {
    let state = serde_json::to_vec(&CacheState {
        update_time: update_time.to_string(),
    })
    .map_err(|e| CacheError::Dataset(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(root).map_err(|e| CacheError::io(root, e))?;
    tmp.write_all(&state).map_err(|e| CacheError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| CacheError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::origin::MemoryOrigin;

    const BASE: &str = "mem://datasets/yahoo";

    fn publish(origin: &MemoryOrigin, tag: &str, update_time: &str) {
        let spec = format!(r#"{{"latest_data_tag":"{tag}","update_time":"{update_time}"}}"#);
        origin.insert(&format!("{BASE}/resolve/main/spec.json"), spec.into_bytes(), None);
    }

    #[test]
    fn resolves_known_tables_at_latest_tag() {
        let origin = Arc::new(MemoryOrigin::new());
        publish(&origin, "v42", "2025-06-01");
        let client = DatasetClient::new(format!("{BASE}/"), origin);

        assert_eq!(
            client.resolve_table("stock_prices").unwrap(),
            format!("{BASE}/resolve/v42/data/stock_prices.parquet")
        );
        assert_eq!(
            client.table_url("stock_historical_eps", "v42").unwrap(),
            format!("{BASE}/resolve/v42/data/stock_historical_eps.parquet")
        );
        assert!(matches!(
            client.resolve_table("stock_nonsense"),
            Err(CacheError::UnknownTable(_))
        ));
    }

    #[test]
    fn malformed_spec_is_a_dataset_error() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert(&format!("{BASE}/resolve/main/spec.json"), b"{\"oops\":1}".to_vec(), None);
        let client = DatasetClient::new(BASE, origin);
        assert!(matches!(client.fetch_spec(), Err(CacheError::Dataset(_))));
    }

    #[test]
    fn validate_cache_clears_only_on_new_update_time() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(MemoryOrigin::new());
        publish(&origin, "v1", "2025-06-01");
        origin.insert("mem://file.bin", b"payload".to_vec(), Some("\"e\""));

        let engine = ColumnarCacheEngine::new(
            CacheConfig::with_cache_dir(dir.path().join("cache")),
            origin.clone(),
        )
        .unwrap();
        let client = DatasetClient::new(BASE, origin.clone());

        assert!(client.validate_cache(&engine).unwrap());
        let path = engine.get_path("mem://file.bin", false).unwrap();

        assert!(!client.validate_cache(&engine).unwrap());
        assert!(path.exists());

        publish(&origin, "v2", "2025-06-02");
        assert!(client.validate_cache(&engine).unwrap());
        assert!(!path.exists());
        assert_eq!(
            read_state(&engine.cache_dir().join(STATE_FILE)).as_deref(),
            Some("2025-06-02")
        );
    }
}
