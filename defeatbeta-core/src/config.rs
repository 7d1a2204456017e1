//! Cache configuration.
//!
//! Every recognized option is a named field with a documented default, so a
//! partial TOML file only needs to mention what it overrides:
//!
//! ```toml
//! cache_dir = "/var/cache/defeatbeta"
//! memory_capacity = 512
//!
//! [missing_token]
//! type = "TTL"
//! secs = 3600
//! ```

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TTL applied when [`MissingTokenPolicy::Ttl`] is chosen (24 hours).
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// What to do when a freshness decision has no entity tag to compare.
///
/// This happens when the origin sends no `ETag`, when the probe fails, or
/// when a cached record was written without one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissingTokenPolicy {
    /// Without a token the cached entry is always refetched.
    #[default]
    AlwaysStale,

    /// Without a token the cached entry is trusted until it is `secs` old.
    Ttl { secs: u64 },
}

/// Configuration for the cache engine and its HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory of the on-disk tier.
    pub cache_dir: PathBuf,

    /// Minimum window fetched by a remote stream on a buffer miss.
    pub read_ahead_bytes: usize,

    /// Maximum number of entries held by the in-memory tier.
    pub memory_capacity: usize,

    /// Probe the origin before trusting any cached artifact.
    pub validate_freshness: bool,

    /// Freshness decision when no entity tag is available.
    pub missing_token: MissingTokenPolicy,

    /// Also persist filtered query results to disk.
    pub persist_results: bool,

    pub probe_timeout_secs: u64,
    pub range_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub connect_timeout_secs: u64,

    /// Idle keep-alive connections kept per host.
    pub pool_max_idle_per_host: usize,

    /// Origin-specific header carrying the logical file size; consulted
    /// before `Content-Length`.
    pub size_header: Option<String>,

    pub user_agent: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("defeat_cache"),
            read_ahead_bytes: 2 * 1024 * 1024,
            memory_capacity: 256,
            validate_freshness: true,
            missing_token: MissingTokenPolicy::AlwaysStale,
            persist_results: true,
            probe_timeout_secs: 10,
            range_timeout_secs: 60,
            download_timeout_secs: 120,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 8,
            size_header: Some("x-linked-size".to_string()),
            user_agent: concat!("defeatbeta/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl CacheConfig {
    /// Default configuration rooted at `cache_dir`.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, CacheError> {
        let config: CacheConfig =
            toml::from_str(s).map_err(|e| CacheError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Reject settings that would make the cache unusable.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.read_ahead_bytes == 0 {
            return Err(CacheError::Config("read_ahead_bytes must be > 0".into()));
        }
        let timeouts = [
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("range_timeout_secs", self.range_timeout_secs),
            ("download_timeout_secs", self.download_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(CacheError::Config(format!("{name} must be > 0")));
            }
        }
        if let MissingTokenPolicy::Ttl { secs: 0 } = self.missing_token {
            return Err(CacheError::Config("missing_token TTL must be > 0".into()));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn range_timeout(&self) -> Duration {
        Duration::from_secs(self.range_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.missing_token, MissingTokenPolicy::AlwaysStale);
        assert!(config.cache_dir.ends_with("defeat_cache"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CacheConfig::from_toml_str(
            r#"
            cache_dir = "/tmp/elsewhere"
            memory_capacity = 8

            [missing_token]
            type = "TTL"
            secs = 3600
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.memory_capacity, 8);
        assert_eq!(config.missing_token, MissingTokenPolicy::Ttl { secs: 3600 });
        assert_eq!(config.read_ahead_bytes, CacheConfig::default().read_ahead_bytes);
        assert!(config.validate_freshness);
    }

    #[test]
    fn zero_read_ahead_is_rejected() {
        let err = CacheConfig::from_toml_str("read_ahead_bytes = 0").unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = CacheConfig::from_toml_str("probe_timeout_secs = 0").unwrap_err();
        assert!(err.to_string().contains("probe_timeout_secs"));
    }

    #[test]
    fn unknown_policy_type_is_a_config_error() {
        let err = CacheConfig::from_toml_str(
            r#"
            [missing_token]
            type = "SOMETIMES"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
