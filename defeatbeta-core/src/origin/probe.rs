//! Best-effort freshness probe.

use super::Origin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fetches a resource's entity tag without transferring its body.
///
/// Probing never fails: any transport or status error is logged and
/// reported as `None`, which callers treat as "freshness unknown".
#[derive(Clone)]
pub struct MetadataProbe {
    origin: Arc<dyn Origin>,
}

impl MetadataProbe {
    pub fn new(origin: Arc<dyn Origin>) -> Self {
        Self { origin }
    }

    pub fn probe(&self, url: &str) -> Option<String> {
        match self.origin.head(url) {
            Ok(head) => {
                debug!(url, etag = ?head.etag, "probed origin");
                head.etag
            }
            Err(e) => {
                warn!(url, error = %e, "freshness probe failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::MemoryOrigin;

    #[test]
    fn probe_returns_etag_or_none() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert("mem://a", &b"x"[..], Some("\"v1\""));
        let probe = MetadataProbe::new(origin.clone());

        assert_eq!(probe.probe("mem://a").as_deref(), Some("\"v1\""));
        assert_eq!(probe.probe("mem://missing"), None);

        origin.set_offline(true);
        assert_eq!(probe.probe("mem://a"), None);
    }
}
