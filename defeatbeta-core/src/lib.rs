//! # defeatbeta-core
//!
//! Local cache for remote columnar files served over HTTP.
//!
//! - [`address`]: URL → SHA-256 cache key → on-disk paths
//! - [`origin`]: the remote object store (HTTP or in-process)
//! - [`remote`]: range reads and a seekable stream over a remote file
//! - [`store`]: entity-tag validated disk tier and a bounded memory tier
//! - [`columnar`]: row-group pruning, fetching and filtering
//! - [`dataset`]: table resolution within a versioned dataset
//!
//! Most callers only need [`ColumnarCacheEngine`]:
//!
//! ```no_run
//! use defeatbeta_core::{CacheConfig, ColumnarCacheEngine};
//!
//! let engine = ColumnarCacheEngine::with_http(CacheConfig::default())?;
//! let prices = engine.read_parquet_by_filter(
//!     "https://huggingface.co/datasets/defeatbeta/yahoo-finance-data/resolve/main/data/stock_prices.parquet",
//!     "symbol",
//!     "NVDA",
//!     Some(&["report_date", "close"]),
//! )?;
//! println!("{prices}");
//! # Ok::<(), defeatbeta_core::CacheError>(())
//! ```

pub mod address;
pub mod columnar;
pub mod config;
pub mod dataset;
pub mod error;
pub mod origin;
pub mod remote;
pub mod store;

pub use address::{CacheKey, CachePurpose, ContentAddress};
pub use columnar::{ColumnarCacheEngine, FilterQuery, MetricsSnapshot, RowGroupStatistics, ScalarValue, ValueKind};
pub use config::{CacheConfig, MissingTokenPolicy, DEFAULT_TTL_SECS};
pub use dataset::{DatasetClient, DatasetSpec, DEFAULT_BASE_URL, KNOWN_TABLES};
pub use error::CacheError;
pub use origin::{HttpOrigin, MemoryOrigin, Origin};
pub use store::{FreshnessCache, MemoryTier};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn engine_can_be_shared_across_threads() {
        assert_send_sync::<ColumnarCacheEngine>();
        assert_send_sync::<FreshnessCache>();
        assert_send_sync::<MemoryTier<String>>();
    }
}
