//! Query engine over remote Parquet files.
//!
//! A query `column == value` against a URL runs through these steps:
//!
//! 1. Serve a previously computed filtered result (memory, then disk).
//! 2. Resolve candidate row groups from persisted footer statistics, or
//!    read the footer once over range requests and persist its statistics.
//! 3. Load each candidate row group from memory, then disk, then network.
//!    The remote file is opened lazily and shared by every miss.
//! 4. Concatenate, apply the exact equality filter, project.
//! 5. Remember the filtered result for repeat queries.
//!
//! Every cached artifact records the entity tag of the file it was derived
//! from. With `validate_freshness` enabled the origin is probed at most once
//! per call and artifacts with a different tag are ignored.

use crate::address::{
    derived_prefix, query_result_id, row_group_id, statistics_id, CacheKey, CachePurpose,
};
use crate::columnar::frame::{
    concat, empty_parquet, filter_eq, frame_from_parquet, frame_to_parquet, project,
    row_group_to_parquet,
};
use crate::columnar::stats::{RowGroupStatistics, ScalarValue};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::origin::{normalize_etag, HttpOrigin, MetadataProbe, Origin};
use crate::remote::{RangeReader, RemoteChunkReader, SeekableRemoteStream};
use crate::store::{CacheEntryMetadata, FreshnessCache, MemoryTier};
use parquet::arrow::arrow_reader::{ArrowReaderMetadata, ArrowReaderOptions};
use polars::prelude::DataFrame;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// A predicate-pushdown read of one remote Parquet file.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterQuery {
    pub url: String,
    pub column: String,
    pub value: ScalarValue,
    /// Columns to return, in order. `None` returns all columns.
    pub columns: Option<Vec<String>>,
    /// Read exactly these row groups instead of resolving them from
    /// statistics. Results of such reads are not cached as a whole.
    pub row_groups: Option<Vec<usize>>,
}

impl FilterQuery {
    pub fn new(url: impl Into<String>, column: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self {
            url: url.into(),
            column: column.into(),
            value: value.into(),
            columns: None,
            row_groups: None,
        }
    }

    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_row_groups(mut self, row_groups: impl IntoIterator<Item = usize>) -> Self {
        self.row_groups = Some(row_groups.into_iter().collect());
        self
    }

    /// Identifier of this query's full (unprojected) result.
    pub fn result_id(&self) -> String {
        query_result_id(&self.url, &self.column, &self.value.cache_token())
    }
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub probes: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub row_group_fetches: u64,
    pub stats_fetches: u64,
    pub downloads: u64,
}

#[derive(Default)]
struct EngineMetrics {
    probes: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    row_group_fetches: AtomicU64,
    stats_fetches: AtomicU64,
    downloads: AtomicU64,
    per_row_group: Mutex<HashMap<(String, usize), u64>>,
}

impl EngineMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fetch(&self, url: &str, index: usize) {
        Self::bump(&self.row_group_fetches);
        let mut per = self
            .per_row_group
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *per.entry((url.to_string(), index)).or_default() += 1;
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            probes: self.probes.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            row_group_fetches: self.row_group_fetches.load(Ordering::Relaxed),
            stats_fetches: self.stats_fetches.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
        }
    }
}

/// In-memory entry: a decoded table plus the record it was stored with.
#[derive(Clone)]
struct CachedFrame {
    frame: DataFrame,
    meta: CacheEntryMetadata,
}

/// Freshness decisions for one call against one URL.
///
/// The origin is probed lazily, on the first cached artifact that needs
/// judging, and the answer is reused for the rest of the call.
struct Validator<'a> {
    engine: &'a ColumnarCacheEngine,
    url: &'a str,
    enabled: bool,
    current: OnceCell<Option<String>>,
}

impl<'a> Validator<'a> {
    fn new(engine: &'a ColumnarCacheEngine, url: &'a str, enabled: bool) -> Self {
        Self {
            engine,
            url,
            enabled,
            current: OnceCell::new(),
        }
    }

    fn current(&self) -> Option<&str> {
        self.current
            .get_or_init(|| self.engine.probe(self.url))
            .as_deref()
    }

    fn accepts(&self, meta: &CacheEntryMetadata) -> bool {
        !self.enabled || self.engine.disk.accepts(meta, self.current())
    }

    /// Whether the origin answered with an entity tag that differs from the
    /// one `meta` was recorded with. Unknown freshness is never a change.
    fn replaced(&self, meta: &CacheEntryMetadata) -> bool {
        match (meta.etag.as_deref(), self.current()) {
            (Some(recorded), Some(current)) => normalize_etag(recorded) != normalize_etag(current),
            _ => false,
        }
    }
}

enum SourceReader {
    Remote(RemoteChunkReader),
    Local(File),
}

/// A remote file opened for footer and row-group reads.
struct OpenSource {
    reader: SourceReader,
    metadata: ArrowReaderMetadata,
    etag: Option<String>,
}

impl OpenSource {
    fn num_row_groups(&self) -> usize {
        self.metadata.metadata().num_row_groups()
    }

    fn row_group_bytes(&self, index: usize) -> Result<Vec<u8>, CacheError> {
        match &self.reader {
            SourceReader::Remote(reader) => {
                row_group_to_parquet(reader.clone(), &self.metadata, index)
            }
            SourceReader::Local(file) => {
                let file = file
                    .try_clone()
                    .map_err(|e| CacheError::Parquet(format!("reopen local file: {e}")))?;
                row_group_to_parquet(file, &self.metadata, index)
            }
        }
    }
}

/// Opens the remote file on first use and checks it against the entity tag
/// of the statistics the query is using.
struct LazySource<'a> {
    engine: &'a ColumnarCacheEngine,
    url: &'a str,
    expected: Option<String>,
    open: Option<OpenSource>,
}

impl<'a> LazySource<'a> {
    fn new(engine: &'a ColumnarCacheEngine, url: &'a str) -> Self {
        Self {
            engine,
            url,
            expected: None,
            open: None,
        }
    }

    fn get(&mut self) -> Result<&OpenSource, CacheError> {
        let source = match self.open.take() {
            Some(source) => source,
            None => {
                let source = self.engine.open_source(self.url)?;
                if let (Some(expected), Some(opened)) =
                    (self.expected.as_deref(), source.etag.as_deref())
                {
                    if normalize_etag(expected) != normalize_etag(opened) {
                        warn!(url = self.url, expected, opened, "remote file changed under cached statistics");
                        return Err(CacheError::UpstreamChanged {
                            url: self.url.to_string(),
                        });
                    }
                }
                source
            }
        };
        Ok(self.open.insert(source))
    }
}

/// Orchestrates the storage tiers and the origin for Parquet queries and
/// whole-file downloads.
pub struct ColumnarCacheEngine {
    config: CacheConfig,
    origin: Arc<dyn Origin>,
    probe: MetadataProbe,
    disk: FreshnessCache,
    memory: MemoryTier<CachedFrame>,
    metrics: EngineMetrics,
}

impl ColumnarCacheEngine {
    pub fn new(config: CacheConfig, origin: Arc<dyn Origin>) -> Result<Self, CacheError> {
        config.validate()?;
        let disk = FreshnessCache::open(&config.cache_dir, config.missing_token)?;
        info!(
            cache_dir = %config.cache_dir.display(),
            origin = origin.name(),
            validate_freshness = config.validate_freshness,
            "cache engine ready"
        );
        Ok(Self {
            probe: MetadataProbe::new(Arc::clone(&origin)),
            memory: MemoryTier::new(config.memory_capacity),
            metrics: EngineMetrics::default(),
            origin,
            disk,
            config,
        })
    }

    /// Engine talking to the network through [`HttpOrigin`].
    pub fn with_http(config: CacheConfig) -> Result<Self, CacheError> {
        let origin = Arc::new(HttpOrigin::new(&config)?);
        Self::new(config, origin)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache_dir(&self) -> &Path {
        self.disk.root()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Network fetches of row group `index` of `url` since construction.
    pub fn row_group_fetch_count(&self, url: &str, index: usize) -> u64 {
        self.metrics
            .per_row_group
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(url.trim().to_string(), index))
            .copied()
            .unwrap_or(0)
    }

    fn probe(&self, url: &str) -> Option<String> {
        EngineMetrics::bump(&self.metrics.probes);
        self.probe.probe(url)
    }

    /// Local path of the whole file at `url`, downloading it when absent,
    /// stale, or when `force_refresh` is set.
    pub fn get_path(&self, url: &str, force_refresh: bool) -> Result<PathBuf, CacheError> {
        let url = url.trim();
        if !force_refresh {
            if let Some(entry) = self.disk.lookup(url, CachePurpose::Raw) {
                if Validator::new(self, url, self.config.validate_freshness).accepts(&entry.metadata) {
                    debug!(url, "whole-file cache hit");
                    EngineMetrics::bump(&self.metrics.disk_hits);
                    return Ok(entry.paths.content);
                }
                info!(url, "cached file is stale; downloading");
            }
        }

        let mut body = self.origin.get(url)?;
        let etag = body.etag.take();
        let paths = self
            .disk
            .store_from_reader(url, CachePurpose::Raw, &mut body.reader, etag.as_deref())
            .map_err(|e| CacheError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        EngineMetrics::bump(&self.metrics.downloads);
        info!(url, etag = ?etag, path = %paths.content.display(), "downloaded file");
        Ok(paths.content)
    }

    fn open_source(&self, url: &str) -> Result<OpenSource, CacheError> {
        let range = RangeReader::new(Arc::clone(&self.origin), url);
        if range.supports_ranges()? {
            match SeekableRemoteStream::open(range, self.config.read_ahead_bytes) {
                Ok(stream) => {
                    let reader = RemoteChunkReader::new(stream);
                    let etag = reader.etag();
                    let metadata = ArrowReaderMetadata::load(&reader, ArrowReaderOptions::default())?;
                    debug!(
                        url,
                        row_groups = metadata.metadata().num_row_groups(),
                        "read remote footer"
                    );
                    return Ok(OpenSource {
                        reader: SourceReader::Remote(reader),
                        metadata,
                        etag,
                    });
                }
                Err(e @ CacheError::SizeUnavailable { .. }) => {
                    warn!(url, error = %e, "falling back to whole-file download");
                }
                Err(e) => return Err(e),
            }
        } else {
            info!(url, "origin does not serve byte ranges; falling back to whole-file download");
        }

        let path = self.get_path(url, false)?;
        let etag = self
            .disk
            .lookup(url, CachePurpose::Raw)
            .and_then(|entry| entry.metadata.etag);
        let file = File::open(&path).map_err(|e| CacheError::io(&path, e))?;
        let metadata = ArrowReaderMetadata::load(&file, ArrowReaderOptions::default())?;
        Ok(OpenSource {
            reader: SourceReader::Local(file),
            metadata,
            etag,
        })
    }

    /// Per-row-group column bounds of `url`, from cache when fresh.
    pub fn row_group_statistics(&self, url: &str) -> Result<RowGroupStatistics, CacheError> {
        let url = url.trim();
        let check = Validator::new(self, url, self.config.validate_freshness);
        let mut source = LazySource::new(self, url);
        let (stats, _) = self.statistics(url, &check, &mut source)?;
        Ok(stats)
    }

    fn statistics(
        &self,
        url: &str,
        check: &Validator<'_>,
        source: &mut LazySource<'_>,
    ) -> Result<(RowGroupStatistics, Option<String>), CacheError> {
        let id = statistics_id(url);
        if let Some(entry) = self.disk.lookup(&id, CachePurpose::Statistics) {
            if check.accepts(&entry.metadata) {
                let cached = fs::read(&entry.paths.content)
                    .ok()
                    .and_then(|bytes| RowGroupStatistics::from_json(&bytes));
                match cached {
                    Some(stats) => {
                        debug!(url, row_groups = stats.num_row_groups(), "statistics cache hit");
                        EngineMetrics::bump(&self.metrics.disk_hits);
                        return Ok((stats, entry.metadata.etag));
                    }
                    None => warn!(url, "corrupt cached statistics; refetching footer"),
                }
            } else if check.replaced(&entry.metadata) {
                info!(url, "remote file changed; purging derived entries");
                self.purge_derived(url)?;
            } else {
                debug!(url, "cached statistics cannot be trusted; refetching footer");
            }
        }

        let open = source.get()?;
        let stats = RowGroupStatistics::from_metadata(url, open.metadata.metadata());
        let etag = open.etag.clone();
        EngineMetrics::bump(&self.metrics.stats_fetches);
        self.disk
            .store(&id, CachePurpose::Statistics, &stats.to_json()?, etag.as_deref())?;
        Ok((stats, etag))
    }

    fn cached_frame(&self, id: &str, purpose: CachePurpose, check: &Validator<'_>) -> Option<DataFrame> {
        if let Some(hit) = self.memory.get(id) {
            if check.accepts(&hit.meta) {
                debug!(id, "memory hit");
                EngineMetrics::bump(&self.metrics.memory_hits);
                return Some(hit.frame);
            }
            debug!(id, "memory entry is stale");
            if check.replaced(&hit.meta) {
                self.memory.remove(id);
            }
        }

        let entry = self.disk.lookup(id, purpose)?;
        if !check.accepts(&entry.metadata) {
            debug!(id, "disk entry is stale");
            return None;
        }
        let decoded = fs::read(&entry.paths.content)
            .map_err(|e| CacheError::io(&entry.paths.content, e))
            .and_then(|bytes| frame_from_parquet(&bytes));
        match decoded {
            Ok(frame) => {
                debug!(id, "disk hit");
                EngineMetrics::bump(&self.metrics.disk_hits);
                self.memory.put(
                    id,
                    CachedFrame {
                        frame: frame.clone(),
                        meta: entry.metadata,
                    },
                );
                Some(frame)
            }
            Err(e) => {
                warn!(id, error = %e, "unreadable cached table; treating as miss");
                None
            }
        }
    }

    /// A previously computed filtered result, if one is cached.
    ///
    /// `key` is a result identifier (see [`FilterQuery::result_id`]). When
    /// `url` is given the origin is probed and a result derived from a
    /// different version of the file is discarded.
    pub fn get_cached_query_result(&self, key: &str, url: Option<&str>) -> Option<DataFrame> {
        let check = Validator::new(self, url.map_or("", str::trim), url.is_some());
        self.cached_frame(key, CachePurpose::QueryResult, &check)
    }

    fn row_group(
        &self,
        url: &str,
        index: usize,
        check: &Validator<'_>,
        source: &mut LazySource<'_>,
    ) -> Result<DataFrame, CacheError> {
        let id = row_group_id(url, index);
        if let Some(frame) = self.cached_frame(&id, CachePurpose::RowGroup, check) {
            return Ok(frame);
        }

        let open = source.get()?;
        let count = open.num_row_groups();
        if index >= count {
            return Err(CacheError::RowGroupOutOfRange {
                url: url.to_string(),
                index,
                count,
            });
        }
        let bytes = open.row_group_bytes(index)?;
        self.metrics.record_fetch(url, index);
        debug!(url, index, bytes = bytes.len(), "fetched row group");

        let etag = open.etag.as_deref();
        self.disk.store(&id, CachePurpose::RowGroup, &bytes, etag)?;
        let frame = frame_from_parquet(&bytes)?;
        let key = CacheKey::derive(&id);
        self.memory.put(
            id.as_str(),
            CachedFrame {
                frame: frame.clone(),
                meta: CacheEntryMetadata::new(&id, &key, etag),
            },
        );
        Ok(frame)
    }

    /// Zero-row frame with the file's schema.
    fn empty_frame(
        &self,
        url: &str,
        stats: Option<&RowGroupStatistics>,
        check: &Validator<'_>,
        source: &mut LazySource<'_>,
    ) -> Result<DataFrame, CacheError> {
        if stats.is_some_and(|s| s.num_row_groups() > 0) {
            if let Some(frame) = self.cached_frame(&row_group_id(url, 0), CachePurpose::RowGroup, check) {
                return Ok(frame.clear());
            }
        }
        let open = source.get()?;
        frame_from_parquet(&empty_parquet(open.metadata.schema().clone())?)
    }

    /// Rows of `query.url` where `query.column == query.value`.
    pub fn query(&self, query: &FilterQuery) -> Result<DataFrame, CacheError> {
        let url = query.url.trim();
        let check = Validator::new(self, url, self.config.validate_freshness);
        let result_id = query.result_id();

        if query.row_groups.is_none() {
            if let Some(frame) = self.cached_frame(&result_id, CachePurpose::QueryResult, &check) {
                debug!(url, column = %query.column, value = %query.value, "query result cache hit");
                return project(frame, query.columns.as_deref());
            }
        }

        let (frame, etag) = match self.resolve(url, query, &check) {
            Err(CacheError::UpstreamChanged { .. }) => {
                info!(url, "re-resolving query after upstream change");
                self.purge(url)?;
                self.resolve(url, query, &check)?
            }
            other => other?,
        };

        if query.row_groups.is_none() {
            self.remember_result(&result_id, &frame, etag.as_deref())?;
        }
        project(frame, query.columns.as_deref())
    }

    /// Convenience wrapper: `column == value`, optionally projected.
    pub fn read_parquet_by_filter(
        &self,
        url: &str,
        column: &str,
        value: impl Into<ScalarValue>,
        columns: Option<&[&str]>,
    ) -> Result<DataFrame, CacheError> {
        let mut query = FilterQuery::new(url, column, value);
        if let Some(columns) = columns {
            query = query.with_columns(columns.iter().copied());
        }
        self.query(&query)
    }

    fn resolve(
        &self,
        url: &str,
        query: &FilterQuery,
        check: &Validator<'_>,
    ) -> Result<(DataFrame, Option<String>), CacheError> {
        let mut source = LazySource::new(self, url);

        let (candidates, stats) = match &query.row_groups {
            Some(explicit) => {
                let mut indices = explicit.clone();
                indices.sort_unstable();
                indices.dedup();
                (indices, None)
            }
            None => {
                let (stats, etag) = self.statistics(url, check, &mut source)?;
                source.expected = etag;
                (stats.candidates(&query.column, &query.value), Some(stats))
            }
        };
        debug!(
            url,
            column = %query.column,
            value = %query.value,
            ?candidates,
            total = ?stats.as_ref().map(RowGroupStatistics::num_row_groups),
            "resolved candidate row groups"
        );

        let mut frames = Vec::with_capacity(candidates.len());
        for &index in &candidates {
            frames.push(self.row_group(url, index, check, &mut source)?);
        }

        let combined = match concat(frames)? {
            Some(frame) => filter_eq(frame, &query.column, &query.value)?,
            None => self.empty_frame(url, stats.as_ref(), check, &mut source)?,
        };

        let etag = match &source.open {
            Some(open) => open.etag.clone(),
            None => source.expected.clone(),
        };
        Ok((combined, etag))
    }

    fn remember_result(&self, id: &str, frame: &DataFrame, etag: Option<&str>) -> Result<(), CacheError> {
        let key = CacheKey::derive(id);
        self.memory.put(
            id,
            CachedFrame {
                frame: frame.clone(),
                meta: CacheEntryMetadata::new(id, &key, etag),
            },
        );
        if self.config.persist_results {
            self.disk
                .store(id, CachePurpose::QueryResult, &frame_to_parquet(frame)?, etag)?;
        }
        Ok(())
    }

    fn purge_derived(&self, url: &str) -> Result<(), CacheError> {
        let prefix = derived_prefix(url);
        let memory = self.memory.remove_prefix(&prefix);
        let disk = self.disk.invalidate_prefix(&prefix)?;
        debug!(url, memory, disk, "purged derived entries");
        Ok(())
    }

    fn purge(&self, url: &str) -> Result<(), CacheError> {
        self.disk.invalidate(url)?;
        self.purge_derived(url)
    }

    /// Drop every cached artifact of `url`: the whole file, its statistics,
    /// row groups and filtered results, on disk and in memory.
    pub fn invalidate(&self, url: &str) -> Result<(), CacheError> {
        let url = url.trim();
        self.purge(url)?;
        info!(url, "invalidated");
        Ok(())
    }

    /// Empty both tiers.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.memory.clear();
        self.disk.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::MemoryOrigin;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;

    const URL: &str = "mem://prices.parquet";

    /// One row group per slice of symbols.
    fn parquet_file(groups: &[&[&str]]) -> Vec<u8> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("symbol", DataType::Utf8, false),
            Field::new("close", DataType::Int64, false),
        ]));
        let rows = groups[0].len();
        let props = WriterProperties::builder()
            .set_max_row_group_size(rows)
            .build();
        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema.clone(), Some(props)).unwrap();
        for (g, symbols) in groups.iter().enumerate() {
            let closes: Vec<i64> = (0..symbols.len()).map(|i| (g * 100 + i) as i64).collect();
            let batch = RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(StringArray::from(symbols.to_vec())),
                    Arc::new(Int64Array::from(closes)),
                ],
            )
            .unwrap();
            writer.write(&batch).unwrap();
            writer.flush().unwrap();
        }
        writer.close().unwrap();
        buf
    }

    fn engine(origin: Arc<MemoryOrigin>) -> (tempfile::TempDir, ColumnarCacheEngine) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CacheConfig::with_cache_dir(dir.path().join("cache"));
        config.read_ahead_bytes = 64;
        let engine = ColumnarCacheEngine::new(config, origin).unwrap();
        (dir, engine)
    }

    #[test]
    fn query_fetches_only_matching_row_groups() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert(URL, parquet_file(&[&["AAA", "MMM"], &["MMN", "SSS"], &["SST", "ZZZ"]]), Some("\"v1\""));
        let (_dir, engine) = engine(origin);

        let out = engine.read_parquet_by_filter(URL, "symbol", "SSS", None).unwrap();
        assert_eq!(out.height(), 1);
        assert_eq!(engine.row_group_fetch_count(URL, 0), 0);
        assert_eq!(engine.row_group_fetch_count(URL, 1), 1);
        assert_eq!(engine.row_group_fetch_count(URL, 2), 0);
        assert_eq!(engine.metrics().stats_fetches, 1);
    }

    #[test]
    fn explicit_row_groups_bypass_statistics() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert(URL, parquet_file(&[&["AAA", "BBB"], &["CCC", "DDD"]]), Some("\"v1\""));
        let (_dir, engine) = engine(origin);

        let query = FilterQuery::new(URL, "symbol", "CCC").with_row_groups([1]);
        assert_eq!(engine.query(&query).unwrap().height(), 1);
        assert_eq!(engine.metrics().stats_fetches, 0);
        assert!(engine.get_cached_query_result(&query.result_id(), None).is_none());

        let bad = FilterQuery::new(URL, "symbol", "CCC").with_row_groups([7]);
        assert!(matches!(
            engine.query(&bad).unwrap_err(),
            CacheError::RowGroupOutOfRange { index: 7, count: 2, .. }
        ));
    }

    #[test]
    fn repeated_explicit_row_groups_are_read_once() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert(URL, parquet_file(&[&["AAA", "BBB"], &["CCC", "DDD"]]), Some("\"v1\""));
        let (_dir, engine) = engine(origin);

        let query = FilterQuery::new(URL, "symbol", "CCC").with_row_groups([1, 1, 1]);
        assert_eq!(engine.query(&query).unwrap().height(), 1);
        assert_eq!(engine.row_group_fetch_count(URL, 1), 1);
    }

    #[test]
    fn projection_keeps_requested_columns() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert(URL, parquet_file(&[&["AAA", "BBB"]]), Some("\"v1\""));
        let (_dir, engine) = engine(origin);

        let out = engine
            .read_parquet_by_filter(URL, "symbol", "BBB", Some(&["close"]))
            .unwrap();
        assert_eq!(out.width(), 1);
        assert_eq!(out.height(), 1);

        // The cached result keeps every column; projection is per call.
        let full = engine.read_parquet_by_filter(URL, "symbol", "BBB", None).unwrap();
        assert_eq!(full.width(), 2);
    }

    #[test]
    fn cached_result_is_dropped_when_origin_changes() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert(URL, parquet_file(&[&["AAA", "BBB"]]), Some("\"v1\""));
        let (_dir, engine) = engine(origin.clone());

        let query = FilterQuery::new(URL, "symbol", "AAA");
        engine.query(&query).unwrap();
        assert!(engine.get_cached_query_result(&query.result_id(), Some(URL)).is_some());

        origin.set_etag(URL, Some("\"v2\""));
        assert!(engine.get_cached_query_result(&query.result_id(), Some(URL)).is_none());
        // Without a URL nothing is probed and the entry is trusted.
        assert!(engine.get_cached_query_result(&query.result_id(), None).is_some());
    }

    #[test]
    fn get_path_downloads_once_while_fresh() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert(URL, b"whole file".to_vec(), Some("\"v1\""));
        let (_dir, engine) = engine(origin.clone());

        let first = engine.get_path(URL, false).unwrap();
        let second = engine.get_path(URL, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"whole file");
        assert_eq!(origin.calls().get, 1);

        engine.get_path(URL, true).unwrap();
        assert_eq!(origin.calls().get, 2);
        assert_eq!(engine.metrics().downloads, 2);
    }

    #[test]
    fn failed_download_is_reported_as_download_error() {
        let origin = Arc::new(MemoryOrigin::new());
        let (_dir, engine) = engine(origin);
        assert!(engine.get_path("mem://missing", false).unwrap_err().is_network());
    }
}
