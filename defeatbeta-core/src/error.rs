//! Structured error types for cache operations.
//!
//! Expected misses ("not cached, please fetch") are plain `None` returns and
//! never appear here. Corrupt cache entries are not errors either: they are
//! logged and treated as absent.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the cache subsystem.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("size unavailable for {url}: origin sent neither an explicit size nor Content-Length")]
    SizeUnavailable { url: String },

    #[error("range fetch failed for {url} [{start}-{end}]: {reason}")]
    RangeFetch {
        url: String,
        start: u64,
        end: u64,
        reason: String,
    },

    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("metadata request failed for {url}: {reason}")]
    Probe { url: String, reason: String },

    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("table error: {0}")]
    Frame(String),

    #[error("row group {index} out of range: {url} has {count} row groups")]
    RowGroupOutOfRange {
        url: String,
        index: usize,
        count: usize,
    },

    #[error("{url} changed upstream while the query was running")]
    UpstreamChanged { url: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures that originate on the network side rather than in
    /// the local cache.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            CacheError::SizeUnavailable { .. }
                | CacheError::RangeFetch { .. }
                | CacheError::Download { .. }
                | CacheError::Probe { .. }
        )
    }
}

impl From<parquet::errors::ParquetError> for CacheError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        CacheError::Parquet(e.to_string())
    }
}

impl From<polars::prelude::PolarsError> for CacheError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        CacheError::Frame(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_classified() {
        let e = CacheError::RangeFetch {
            url: "https://example.com/a.parquet".into(),
            start: 0,
            end: 9,
            reason: "HTTP 500".into(),
        };
        assert!(e.is_network());
        assert!(e.to_string().contains("[0-9]"));

        let e = CacheError::Frame("bad".into());
        assert!(!e.is_network());
    }

    #[test]
    fn io_error_mentions_path() {
        let e = CacheError::io(
            "/tmp/x.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(e.to_string().contains("/tmp/x.bin"));
    }
}
