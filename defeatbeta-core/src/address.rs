//! Content addressing: resource identifier → cache key → on-disk paths.
//!
//! Layout: `{cache_dir}/{sha256_hex}.{ext}` for content and
//! `{cache_dir}/{sha256_hex}.json` for the metadata sidecar.
//!
//! Each identifier is used for exactly one purpose (raw file, a row group,
//! a statistics blob, a filtered result), so two purposes never share a
//! metadata sidecar. Derived artifacts get their own identifier built from
//! the URL with a `::` suffix (see [`row_group_id`] and friends).

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque cache key: hex SHA-256 of the trimmed resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a resource identifier.
    ///
    /// Surrounding whitespace is ignored, so `" u "` and `"u"` share a key.
    pub fn derive(identifier: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identifier.trim().as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a cached blob holds; selects the content file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePurpose {
    /// Whole remote file, byte for byte.
    Raw,
    /// A single row group re-encoded as a standalone Parquet file.
    RowGroup,
    /// A filtered query result encoded as Parquet.
    QueryResult,
    /// Per-row-group column bounds as JSON.
    Statistics,
}

impl CachePurpose {
    pub fn extension(self) -> &'static str {
        match self {
            CachePurpose::Raw => "bin",
            CachePurpose::RowGroup => "rg",
            CachePurpose::QueryResult => "result",
            CachePurpose::Statistics => "stats",
        }
    }
}

/// Content and metadata locations for one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPaths {
    pub content: PathBuf,
    pub metadata: PathBuf,
}

/// Maps cache keys to files under a cache root.
#[derive(Debug, Clone)]
pub struct ContentAddress {
    root: PathBuf,
}

impl ContentAddress {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths for `key` holding a blob of the given purpose.
    pub fn paths_for(&self, key: &CacheKey, purpose: CachePurpose) -> EntryPaths {
        EntryPaths {
            content: self
                .root
                .join(format!("{}.{}", key.as_str(), purpose.extension())),
            metadata: self.root.join(format!("{}.json", key.as_str())),
        }
    }
}

/// Identifier of the persisted footer statistics for `url`.
pub fn statistics_id(url: &str) -> String {
    format!("{}::metadata_stats", url.trim())
}

/// Identifier of row group `index` of `url`.
pub fn row_group_id(url: &str, index: usize) -> String {
    format!("{}::row_group::{index}", url.trim())
}

/// Identifier of the filtered result of `column == value` over `url`.
///
/// `value` should carry its type (see `ScalarValue::cache_token`) so that
/// `1` and `"1"` do not collide.
pub fn query_result_id(url: &str, column: &str, value: &str) -> String {
    format!("{}::filter::{column}={value}", url.trim())
}

/// Prefix shared by every derived identifier of `url`.
pub fn derived_prefix(url: &str) -> String {
    format!("{}::", url.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_sha256_hex() {
        let key = CacheKey::derive("abc");
        assert_eq!(
            key.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn key_ignores_surrounding_whitespace() {
        assert_eq!(
            CacheKey::derive("  https://example.com/a.parquet\n"),
            CacheKey::derive("https://example.com/a.parquet")
        );
        assert_ne!(
            CacheKey::derive("https://example.com/a.parquet"),
            CacheKey::derive("https://example.com/b.parquet")
        );
    }

    #[test]
    fn paths_use_purpose_extension() {
        let address = ContentAddress::new("/cache");
        let key = CacheKey::derive("u");
        let paths = address.paths_for(&key, CachePurpose::RowGroup);

        assert_eq!(paths.content, PathBuf::from(format!("/cache/{key}.rg")));
        assert_eq!(paths.metadata, PathBuf::from(format!("/cache/{key}.json")));
    }

    #[test]
    fn derived_ids_do_not_collide_with_the_url() {
        let url = "https://example.com/a.parquet";
        let ids = [
            url.to_string(),
            statistics_id(url),
            row_group_id(url, 0),
            row_group_id(url, 1),
            query_result_id(url, "symbol", "s:NVD"),
        ];
        let keys: std::collections::HashSet<_> = ids.iter().map(|i| CacheKey::derive(i)).collect();
        assert_eq!(keys.len(), ids.len());

        for id in &ids[1..] {
            assert!(id.starts_with(&derived_prefix(url)));
        }
    }
}
