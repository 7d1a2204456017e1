//! Remote object store seam.
//!
//! The [`Origin`] trait abstracts the HTTP surface the cache needs (HEAD,
//! ranged GET, whole GET) so the engine can run against the real network
//! ([`HttpOrigin`]) or an in-process store ([`MemoryOrigin`]) in tests.
//! The cache layers sit above this trait; origins know nothing about caching.

pub mod http;
pub mod memory;
pub mod probe;

pub use http::HttpOrigin;
pub use memory::{MemoryOrigin, OriginCalls};
pub use probe::MetadataProbe;

use crate::error::CacheError;
use bytes::Bytes;
use std::io::Read;

/// Headers returned by a metadata-only request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginHead {
    /// Entity tag exactly as sent (quotes included).
    pub etag: Option<String>,
    pub content_length: Option<u64>,
    /// Logical size from an origin-specific header, when present.
    pub declared_size: Option<u64>,
    /// `Accept-Ranges: bytes` was advertised.
    pub accept_ranges: bool,
}

impl OriginHead {
    /// Total size, preferring the origin-specific header over `Content-Length`.
    pub fn size(&self) -> Option<u64> {
        self.declared_size.or(self.content_length)
    }
}

/// Streaming body of a whole-file GET.
pub struct OriginBody {
    pub etag: Option<String>,
    pub reader: Box<dyn Read + Send>,
}

/// A remote object store reachable by URL.
pub trait Origin: Send + Sync {
    /// Human-readable name of this origin.
    fn name(&self) -> &str;

    /// Metadata-only round trip.
    fn head(&self, url: &str) -> Result<OriginHead, CacheError>;

    /// Fetch bytes `start..=end` in a single request.
    ///
    /// Must fail with [`CacheError::RangeFetch`] rather than return fewer
    /// or more bytes than requested.
    fn get_range(&self, url: &str, start: u64, end: u64) -> Result<Bytes, CacheError>;

    /// Start a whole-file download.
    fn get(&self, url: &str) -> Result<OriginBody, CacheError>;
}

/// Strip the weak-validator prefix and quoting some servers wrap ETags in.
pub fn normalize_etag(etag: &str) -> &str {
    let etag = etag.trim();
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    etag.trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_size_wins_over_content_length() {
        let head = OriginHead {
            content_length: Some(10),
            declared_size: Some(1_000),
            ..OriginHead::default()
        };
        assert_eq!(head.size(), Some(1_000));

        let head = OriginHead {
            content_length: Some(10),
            ..OriginHead::default()
        };
        assert_eq!(head.size(), Some(10));
        assert_eq!(OriginHead::default().size(), None);
    }

    #[test]
    fn etag_quotes_are_stripped() {
        assert_eq!(normalize_etag("\"abc\""), "abc");
        assert_eq!(normalize_etag("W/\"abc\""), "abc");
        assert_eq!(normalize_etag("abc"), "abc");
    }
}
