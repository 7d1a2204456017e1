//! Persistent on-disk tier validated by entity tags.
//!
//! Layout: `{cache_dir}/{key}.{ext}` plus a `{cache_dir}/{key}.json`
//! metadata sidecar (see [`crate::address`]).
//!
//! Features:
//! - Atomic writes (temp file in the cache root, rename into place)
//! - Content is durable before the metadata that references it
//! - Corrupt or orphaned metadata reads as a miss, never as an error
//! - Explicit freshness policy when no entity tag is available

use crate::address::{CacheKey, CachePurpose, ContentAddress, EntryPaths};
use crate::config::MissingTokenPolicy;
use crate::error::CacheError;
use crate::origin::normalize_etag;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Metadata sidecar for one cached blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub url: String,
    /// Epoch seconds at which the blob was stored.
    pub created_at: i64,
    pub etag: Option<String>,
    pub key: String,
}

impl CacheEntryMetadata {
    pub fn new(identifier: &str, key: &CacheKey, etag: Option<&str>) -> Self {
        Self {
            url: identifier.to_string(),
            created_at: chrono::Utc::now().timestamp(),
            etag: etag.map(str::to_string),
            key: key.to_string(),
        }
    }

    /// Whether an entry recorded with this metadata may still be served
    /// given the origin's current entity tag.
    ///
    /// With both tags present they must match (ignoring quotes). Otherwise
    /// the policy decides.
    pub fn is_fresh(&self, current: Option<&str>, policy: MissingTokenPolicy) -> bool {
        self.is_fresh_at(current, policy, chrono::Utc::now().timestamp())
    }

    fn is_fresh_at(&self, current: Option<&str>, policy: MissingTokenPolicy, now: i64) -> bool {
        match (self.etag.as_deref(), current) {
            (Some(recorded), Some(current)) => {
                let fresh = normalize_etag(recorded) == normalize_etag(current);
                debug!(
                    url = %self.url,
                    recorded,
                    current,
                    fresh,
                    "entity tag comparison"
                );
                fresh
            }
            _ => match policy {
                MissingTokenPolicy::AlwaysStale => {
                    debug!(url = %self.url, "no entity tag to compare; treating as stale");
                    false
                }
                MissingTokenPolicy::Ttl { secs } => {
                    let age = now.saturating_sub(self.created_at);
                    let fresh = (0..i64::try_from(secs).unwrap_or(i64::MAX)).contains(&age);
                    debug!(url = %self.url, age, ttl = secs, fresh, "TTL fallback");
                    fresh
                }
            },
        }
    }
}

/// A cache entry whose content and metadata both exist.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub paths: EntryPaths,
    pub metadata: CacheEntryMetadata,
}

/// The on-disk tier.
#[derive(Debug, Clone)]
pub struct FreshnessCache {
    address: ContentAddress,
    policy: MissingTokenPolicy,
}

impl FreshnessCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, policy: MissingTokenPolicy) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CacheError::io(&root, e))?;
        Ok(Self {
            address: ContentAddress::new(root),
            policy,
        })
    }

    pub fn root(&self) -> &Path {
        self.address.root()
    }

    pub fn policy(&self) -> MissingTokenPolicy {
        self.policy
    }

    /// Key and paths for `identifier` stored as `purpose`.
    pub fn paths(&self, identifier: &str, purpose: CachePurpose) -> (CacheKey, EntryPaths) {
        let key = CacheKey::derive(identifier);
        let paths = self.address.paths_for(&key, purpose);
        (key, paths)
    }

    /// Load a metadata sidecar; absent or malformed records read as `None`.
    pub fn read_metadata(path: &Path) -> Option<CacheEntryMetadata> {
        let content = match fs::read(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache metadata");
                return None;
            }
        };
        match serde_json::from_slice(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache metadata; treating as miss");
                None
            }
        }
    }

    /// Freshness of the entry described by `metadata_path` against the
    /// origin's current entity tag. Missing or corrupt metadata is stale.
    pub fn is_fresh(&self, metadata_path: &Path, current: Option<&str>) -> bool {
        match Self::read_metadata(metadata_path) {
            Some(meta) => meta.is_fresh(current, self.policy),
            None => {
                debug!(path = %metadata_path.display(), "cache miss: no usable metadata");
                false
            }
        }
    }

    /// Freshness of an already-loaded record under this cache's policy.
    pub fn accepts(&self, metadata: &CacheEntryMetadata, current: Option<&str>) -> bool {
        metadata.is_fresh(current, self.policy)
    }

    /// The entry for `identifier`, if both its content and a parseable
    /// metadata record exist. Freshness is not checked.
    pub fn lookup(&self, identifier: &str, purpose: CachePurpose) -> Option<CachedEntry> {
        let (_, paths) = self.paths(identifier, purpose);
        if !paths.content.is_file() {
            return None;
        }
        let metadata = Self::read_metadata(&paths.metadata)?;
        Some(CachedEntry { paths, metadata })
    }

    /// Store `content` for `identifier`, replacing any previous entry.
    pub fn store(
        &self,
        identifier: &str,
        purpose: CachePurpose,
        content: &[u8],
        etag: Option<&str>,
    ) -> Result<EntryPaths, CacheError> {
        self.store_from_reader(identifier, purpose, &mut &content[..], etag)
    }

    /// Stream `reader` into the cache for `identifier`.
    ///
    /// The content is written to a temporary file in the cache root and
    /// renamed into place before the metadata is written. On any error the
    /// temporary file is removed and the previous entry (if any) is left
    /// untouched.
    pub fn store_from_reader(
        &self,
        identifier: &str,
        purpose: CachePurpose,
        reader: &mut dyn Read,
        etag: Option<&str>,
    ) -> Result<EntryPaths, CacheError> {
        let (key, paths) = self.paths(identifier, purpose);

        let written = self.write_atomic(&key, &paths.content, |file| {
            let n = io::copy(reader, file)?;
            Ok(n)
        })?;

        let meta = CacheEntryMetadata::new(identifier, &key, etag);
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| CacheError::io(&paths.metadata, io::Error::other(e)))?;
        self.write_atomic(&key, &paths.metadata, |file| file.write_all(&meta_json))?;

        debug!(
            identifier,
            key = %key,
            bytes = written,
            etag = ?meta.etag,
            "stored cache entry"
        );
        Ok(paths)
    }

    fn write_atomic<T>(
        &self,
        key: &CacheKey,
        target: &Path,
        write: impl FnOnce(&mut File) -> io::Result<T>,
    ) -> Result<T, CacheError> {
        let root = self.root();
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{key}."))
            .suffix(".tmp")
            .tempfile_in(root)
            .map_err(|e| CacheError::io(root, e))?;

        let out = write(tmp.as_file_mut()).map_err(|e| CacheError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| CacheError::io(tmp.path(), e))?;

        // Dropping the temp file on the error path removes it.
        tmp.persist(target)
            .map_err(|e| CacheError::io(target, e.error))?;
        Ok(out)
    }

    /// Remove every file derived from `identifier`. Missing files are fine.
    pub fn invalidate(&self, identifier: &str) -> Result<(), CacheError> {
        let key = CacheKey::derive(identifier);
        let purposes = [
            CachePurpose::Raw,
            CachePurpose::RowGroup,
            CachePurpose::QueryResult,
            CachePurpose::Statistics,
        ];
        let mut removed = false;
        for purpose in purposes {
            removed |= remove_if_exists(&self.address.paths_for(&key, purpose).content)?;
        }
        removed |= remove_if_exists(&self.address.paths_for(&key, CachePurpose::Raw).metadata)?;
        if removed {
            debug!(identifier, key = %key, "invalidated cache entry");
        }
        Ok(())
    }

    /// Metadata of every entry under the root. Unreadable sidecars are
    /// skipped.
    pub fn entries(&self) -> Result<Vec<CacheEntryMetadata>, CacheError> {
        let root = self.root();
        let dir = match fs::read_dir(root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(root, e)),
        };
        Ok(dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_metadata_file(path))
            .filter_map(|path| Self::read_metadata(&path))
            .collect())
    }

    /// Invalidate every entry whose identifier starts with `prefix`;
    /// returns how many were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut removed = 0;
        for meta in self.entries()? {
            if meta.url.starts_with(prefix) {
                self.invalidate(&meta.url)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(prefix, removed, "invalidated derived cache entries");
        }
        Ok(removed)
    }

    /// Delete and recreate the whole cache root.
    pub fn clear(&self) -> Result<(), CacheError> {
        let root = self.root();
        match fs::remove_dir_all(root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(root, e)),
        }
        fs::create_dir_all(root).map_err(|e| CacheError::io(root, e))?;
        info!(root = %root.display(), "cache cleared");
        Ok(())
    }
}

/// `{sha256_hex}.json`; other files under the root are not cache entries.
fn is_metadata_file(path: &Path) -> bool {
    let stem_is_key = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()));
    stem_is_key && path.extension().is_some_and(|ext| ext == "json")
}

fn remove_if_exists(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
