//! Row-group level caching of remote Parquet files.

pub mod engine;
pub mod frame;
pub mod stats;

pub use engine::{ColumnarCacheEngine, FilterQuery, MetricsSnapshot};
pub use stats::{ColumnBounds, RowGroupBounds, RowGroupStatistics, ScalarValue, ValueKind};
