//! Byte-span access to a single remote resource.

use crate::error::CacheError;
use crate::origin::{Origin, OriginHead};
use bytes::Bytes;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Reads arbitrary byte spans of one URL through an [`Origin`].
///
/// The resource's headers are fetched once (on the first `length`,
/// `supports_ranges` or `etag` call) and reused for the lifetime of the
/// reader.
pub struct RangeReader {
    origin: Arc<dyn Origin>,
    url: String,
    head: OnceLock<OriginHead>,
}

impl RangeReader {
    pub fn new(origin: Arc<dyn Origin>, url: impl Into<String>) -> Self {
        Self {
            origin,
            url: url.into(),
            head: OnceLock::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn head(&self) -> Result<&OriginHead, CacheError> {
        if let Some(head) = self.head.get() {
            return Ok(head);
        }
        let head = self.origin.head(&self.url)?;
        debug!(url = %self.url, ?head, "resolved remote headers");
        Ok(self.head.get_or_init(|| head))
    }

    /// Total size of the resource in bytes.
    pub fn length(&self) -> Result<u64, CacheError> {
        self.head()?
            .size()
            .ok_or_else(|| CacheError::SizeUnavailable {
                url: self.url.clone(),
            })
    }

    /// Whether the origin advertises byte-range support.
    ///
    /// A failed metadata request is an error, not a "no".
    pub fn supports_ranges(&self) -> Result<bool, CacheError> {
        Ok(self.head()?.accept_ranges)
    }

    /// Entity tag reported alongside the size, if any.
    pub fn etag(&self) -> Option<String> {
        self.head().ok().and_then(|h| h.etag.clone())
    }

    /// Fetch bytes `start..=end` in one request.
    pub fn read_range(&self, start: u64, end: u64) -> Result<Bytes, CacheError> {
        debug!(url = %self.url, start, end, "range read");
        self.origin.get_range(&self.url, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::MemoryOrigin;

    #[test]
    fn headers_are_fetched_once() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert("mem://f", vec![7u8; 64], Some("\"e\""));
        let reader = RangeReader::new(origin.clone(), "mem://f");

        assert_eq!(reader.length().unwrap(), 64);
        assert!(reader.supports_ranges().unwrap());
        assert_eq!(reader.etag().as_deref(), Some("\"e\""));
        assert_eq!(origin.calls().head, 1);
    }

    #[test]
    fn declared_size_is_preferred() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert("mem://f", vec![0u8; 10], None);
        origin.set_declared_size("mem://f", Some(8));

        let reader = RangeReader::new(origin, "mem://f");
        assert_eq!(reader.length().unwrap(), 8);
    }

    #[test]
    fn failed_head_is_an_error_not_a_missing_capability() {
        let origin = Arc::new(MemoryOrigin::new());
        let reader = RangeReader::new(origin.clone(), "mem://missing");
        assert!(matches!(reader.supports_ranges(), Err(CacheError::Probe { .. })));
        assert!(reader.length().is_err());

        origin.insert_without_ranges("mem://plain", vec![1u8; 8], None);
        let plain = RangeReader::new(origin, "mem://plain");
        assert!(!plain.supports_ranges().unwrap());
    }

    #[test]
    fn read_range_is_inclusive() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert("mem://f", (0u8..16).collect::<Vec<_>>(), None);
        let reader = RangeReader::new(origin, "mem://f");
        assert_eq!(&reader.read_range(3, 5).unwrap()[..], &[3, 4, 5]);
    }
}
