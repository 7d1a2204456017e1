//! HTTP(S) origin backed by a pooled blocking reqwest client.
//!
//! Every operation carries its own finite timeout; connections are kept
//! alive and reused across repeated range reads against the same host.

use super::{Origin, OriginBody, OriginHead};
use crate::config::CacheConfig;
use crate::error::CacheError;
use bytes::Bytes;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, ETAG, RANGE};
use reqwest::StatusCode;
use std::time::Duration;

/// Origin speaking plain HTTP GET/HEAD with `Range` support.
pub struct HttpOrigin {
    client: Client,
    size_header: Option<String>,
    probe_timeout: Duration,
    range_timeout: Duration,
    download_timeout: Duration,
}

impl HttpOrigin {
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CacheError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            size_header: config.size_header.clone(),
            probe_timeout: config.probe_timeout(),
            range_timeout: config.range_timeout(),
            download_timeout: config.download_timeout(),
        })
    }

    fn parse_head(&self, headers: &HeaderMap) -> OriginHead {
        let header_u64 = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };

        OriginHead {
            etag: etag_of(headers),
            content_length: header_u64(CONTENT_LENGTH.as_str()),
            declared_size: self.size_header.as_deref().and_then(header_u64),
            accept_ranges: headers
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| {
                    v.split(',')
                        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
                })
                .unwrap_or(false),
        }
    }
}

fn etag_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

impl Origin for HttpOrigin {
    fn name(&self) -> &str {
        "http"
    }

    fn head(&self, url: &str) -> Result<OriginHead, CacheError> {
        let resp = self
            .client
            .head(url)
            .timeout(self.probe_timeout)
            .send()
            .map_err(|e| CacheError::Probe {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CacheError::Probe {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        Ok(self.parse_head(resp.headers()))
    }

    fn get_range(&self, url: &str, start: u64, end: u64) -> Result<Bytes, CacheError> {
        let range_err = |reason: String| CacheError::RangeFetch {
            url: url.to_string(),
            start,
            end,
            reason,
        };

        if end < start {
            return Err(range_err("empty range".into()));
        }
        let expected = end - start + 1;

        let resp: Response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .timeout(self.range_timeout)
            .send()
            .map_err(|e| range_err(e.to_string()))?;

        let status = resp.status();
        // A 200 is only usable when the requested span starts at zero: the
        // origin ignored the range and sent the file from the beginning.
        let full_body = match status {
            StatusCode::PARTIAL_CONTENT => false,
            StatusCode::OK if start == 0 => true,
            _ => return Err(range_err(format!("HTTP {status}"))),
        };

        let body = resp.bytes().map_err(|e| range_err(e.to_string()))?;
        let got = body.len() as u64;

        if full_body && got >= expected {
            return Ok(body.slice(0..expected as usize));
        }
        if got != expected {
            return Err(range_err(format!("expected {expected} bytes, got {got}")));
        }
        Ok(body)
    }

    fn get(&self, url: &str) -> Result<OriginBody, CacheError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .map_err(|e| CacheError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CacheError::Download {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        Ok(OriginBody {
            etag: etag_of(resp.headers()),
            reader: Box::new(resp),
        })
    }
}
