//! In-process origin holding resources in memory.
//!
//! Behaves like a well-formed HTTP origin (entity tags, sizes, byte ranges)
//! while counting every call, so tests can assert exactly how much network
//! traffic a cache operation would have caused. Resources can be replaced
//! at any time to simulate an upstream update.

use super::{Origin, OriginBody, OriginHead};
use crate::error::CacheError;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone)]
struct Resource {
    body: Bytes,
    etag: Option<String>,
    accept_ranges: bool,
    declared_size: Option<u64>,
}

/// Snapshot of how often each operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OriginCalls {
    pub head: usize,
    pub range: usize,
    pub get: usize,
}

/// An origin serving byte buffers from memory.
#[derive(Debug, Default)]
pub struct MemoryOrigin {
    resources: RwLock<HashMap<String, Resource>>,
    head_calls: AtomicUsize,
    range_calls: AtomicUsize,
    get_calls: AtomicUsize,
    offline: AtomicBool,
    head_unavailable: AtomicBool,
}

impl MemoryOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish (or replace) a range-capable resource.
    pub fn insert(&self, url: &str, body: impl Into<Bytes>, etag: Option<&str>) {
        self.insert_resource(
            url,
            Resource {
                body: body.into(),
                etag: etag.map(str::to_string),
                accept_ranges: true,
                declared_size: None,
            },
        );
    }

    /// Publish a resource whose origin ignores `Range` headers.
    pub fn insert_without_ranges(&self, url: &str, body: impl Into<Bytes>, etag: Option<&str>) {
        self.insert_resource(
            url,
            Resource {
                body: body.into(),
                etag: etag.map(str::to_string),
                accept_ranges: false,
                declared_size: None,
            },
        );
    }

    /// Override the logical size reported for `url`.
    pub fn set_declared_size(&self, url: &str, size: Option<u64>) {
        let mut resources = self.resources.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(r) = resources.get_mut(url) {
            r.declared_size = size;
        }
    }

    /// Change the entity tag of `url` without touching its body.
    pub fn set_etag(&self, url: &str, etag: Option<&str>) {
        let mut resources = self.resources.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(r) = resources.get_mut(url) {
            r.etag = etag.map(str::to_string);
        }
    }

    pub fn remove(&self, url: &str) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    /// Simulate a network outage: every call fails until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make HEAD fail with a server error while ranged and whole GETs keep
    /// working.
    pub fn set_head_unavailable(&self, unavailable: bool) {
        self.head_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> OriginCalls {
        OriginCalls {
            head: self.head_calls.load(Ordering::SeqCst),
            range: self.range_calls.load(Ordering::SeqCst),
            get: self.get_calls.load(Ordering::SeqCst),
        }
    }

    pub fn reset_calls(&self) {
        self.head_calls.store(0, Ordering::SeqCst);
        self.range_calls.store(0, Ordering::SeqCst);
        self.get_calls.store(0, Ordering::SeqCst);
    }

    fn insert_resource(&self, url: &str, resource: Resource) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), resource);
    }

    fn lookup(&self, url: &str) -> Option<Resource> {
        if self.offline.load(Ordering::SeqCst) {
            return None;
        }
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }
}

impl Origin for MemoryOrigin {
    fn name(&self) -> &str {
        "memory"
    }

    fn head(&self, url: &str) -> Result<OriginHead, CacheError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if self.head_unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Probe {
                url: url.to_string(),
                reason: "HTTP 503 Service Unavailable".into(),
            });
        }
        let r = self.lookup(url).ok_or_else(|| CacheError::Probe {
            url: url.to_string(),
            reason: "HTTP 404 Not Found".into(),
        })?;
        Ok(OriginHead {
            etag: r.etag,
            content_length: Some(r.body.len() as u64),
            declared_size: r.declared_size,
            accept_ranges: r.accept_ranges,
        })
    }

    fn get_range(&self, url: &str, start: u64, end: u64) -> Result<Bytes, CacheError> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        let range_err = |reason: &str| CacheError::RangeFetch {
            url: url.to_string(),
            start,
            end,
            reason: reason.to_string(),
        };

        let r = self
            .lookup(url)
            .ok_or_else(|| range_err("HTTP 404 Not Found"))?;
        if !r.accept_ranges {
            return Err(range_err("origin does not honor ranges"));
        }
        let len = r.body.len() as u64;
        if end < start || end >= len {
            return Err(range_err("HTTP 416 Range Not Satisfiable"));
        }
        Ok(r.body.slice(start as usize..=end as usize))
    }

    fn get(&self, url: &str) -> Result<OriginBody, CacheError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let r = self.lookup(url).ok_or_else(|| CacheError::Download {
            url: url.to_string(),
            reason: "HTTP 404 Not Found".into(),
        })?;
        Ok(OriginBody {
            etag: r.etag,
            reader: Box::new(Cursor::new(r.body)),
        })
    }
}
