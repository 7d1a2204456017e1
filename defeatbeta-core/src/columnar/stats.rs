//! Per-row-group column bounds and the pruning rule built on them.
//!
//! Bounds come from a Parquet footer once and are persisted as JSON, so
//! later queries can choose row groups without touching the network.
//! Pruning must never skip a row group that could match: anything the
//! bounds cannot decide (no statistics, incomparable types, NaN) is read.

use crate::error::CacheError;
use parquet::basic::{ConvertedType, LogicalType};
use parquet::file::metadata::{ColumnChunkMetaData, ParquetMetaData};
use parquet::file::statistics::Statistics;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A typed filter value or column bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

/// Requested interpretation of a textual value (CLI input).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Int,
    Float,
    Bool,
}

impl ScalarValue {
    /// Order two values; `None` when they are not comparable.
    ///
    /// Integers and floats compare numerically with each other; every other
    /// cross-type pair is incomparable.
    pub fn compare(&self, other: &ScalarValue) -> Option<Ordering> {
        use ScalarValue::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Str(a), Str(b)) => Some(a.as_str().cmp(b.as_str())),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Type-tagged text used inside cache identifiers, so `1` and `"1"`
    /// never share an entry.
    pub fn cache_token(&self) -> String {
        match self {
            ScalarValue::Int(v) => format!("i:{v}"),
            ScalarValue::Float(v) => format!("f:{v:?}"),
            ScalarValue::Str(v) => format!("s:{v}"),
            ScalarValue::Bool(v) => format!("b:{v}"),
        }
    }

    /// Parse `raw` as the given kind.
    pub fn parse_as(kind: ValueKind, raw: &str) -> Result<Self, CacheError> {
        let bad = |what: &str| CacheError::Config(format!("'{raw}' is not a valid {what}"));
        Ok(match kind {
            ValueKind::Str => ScalarValue::Str(raw.to_string()),
            ValueKind::Int => ScalarValue::Int(raw.trim().parse().map_err(|_| bad("integer"))?),
            ValueKind::Float => ScalarValue::Float(raw.trim().parse().map_err(|_| bad("float"))?),
            ValueKind::Bool => ScalarValue::Bool(raw.trim().parse().map_err(|_| bad("boolean"))?),
        })
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Str(v) => write!(f, "{v:?}"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Str(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Str(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int(v as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

/// Inclusive bounds of one column inside one row group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBounds {
    pub min: ScalarValue,
    pub max: ScalarValue,
}

/// Bounds of every column with usable statistics in one row group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowGroupBounds {
    pub num_rows: i64,
    pub columns: BTreeMap<String, ColumnBounds>,
}

impl RowGroupBounds {
    /// Whether rows with `column == value` may exist in this row group.
    pub fn may_contain(&self, column: &str, value: &ScalarValue) -> bool {
        let Some(bounds) = self.columns.get(column) else {
            return true;
        };
        match (bounds.min.compare(value), value.compare(&bounds.max)) {
            (Some(lo), Some(hi)) => lo != Ordering::Greater && hi != Ordering::Greater,
            _ => true,
        }
    }
}

/// Footer statistics of one remote Parquet file, indexed by row group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowGroupStatistics {
    pub url: String,
    pub row_groups: Vec<RowGroupBounds>,
}

impl RowGroupStatistics {
    /// Capture bounds for every top-level column of every row group.
    pub fn from_metadata(url: &str, metadata: &ParquetMetaData) -> Self {
        let row_groups = metadata
            .row_groups()
            .iter()
            .map(|rg| RowGroupBounds {
                num_rows: rg.num_rows(),
                columns: rg
                    .columns()
                    .iter()
                    .filter_map(|c| column_bounds(c).map(|b| (c.column_descr().name().to_string(), b)))
                    .collect(),
            })
            .collect();

        Self {
            url: url.to_string(),
            row_groups,
        }
    }

    pub fn num_row_groups(&self) -> usize {
        self.row_groups.len()
    }

    pub fn total_rows(&self) -> i64 {
        self.row_groups.iter().map(|rg| rg.num_rows).sum()
    }

    /// Row groups that may hold rows with `column == value`, ascending.
    pub fn candidates(&self, column: &str, value: &ScalarValue) -> Vec<usize> {
        self.row_groups
            .iter()
            .enumerate()
            .filter(|(_, rg)| rg.may_contain(column, value))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|e| CacheError::Parquet(format!("statistics encode: {e}")))
    }

    /// Decode persisted statistics; malformed input reads as `None`.
    pub fn from_json(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

fn column_bounds(column: &ColumnChunkMetaData) -> Option<ColumnBounds> {
    let descr = column.column_descr();
    if descr.path().parts().len() != 1 {
        return None;
    }
    let logical = descr.logical_type();
    let converted = descr.converted_type();

    let is_unsigned = matches!(
        logical,
        Some(LogicalType::Integer {
            is_signed: false,
            ..
        })
    ) || matches!(
        converted,
        ConvertedType::UINT_8 | ConvertedType::UINT_16 | ConvertedType::UINT_32 | ConvertedType::UINT_64
    );
    let is_decimal =
        matches!(logical, Some(LogicalType::Decimal { .. })) || converted == ConvertedType::DECIMAL;
    let is_utf8 = matches!(
        logical,
        Some(LogicalType::String) | Some(LogicalType::Enum) | Some(LogicalType::Json)
    ) || matches!(
        converted,
        ConvertedType::UTF8 | ConvertedType::ENUM | ConvertedType::JSON
    );

    if is_decimal {
        return None;
    }

    fn pair<T>(
        min: Option<&T>,
        max: Option<&T>,
        convert: impl Fn(&T) -> Option<ScalarValue>,
    ) -> Option<ColumnBounds> {
        Some(ColumnBounds {
            min: convert(min?)?,
            max: convert(max?)?,
        })
    }

    match column.statistics()? {
        Statistics::Boolean(s) => pair(s.min_opt(), s.max_opt(), |v| Some(ScalarValue::Bool(*v))),
        Statistics::Int32(s) if is_unsigned => pair(s.min_opt(), s.max_opt(), |v| {
            Some(ScalarValue::Int(*v as u32 as i64))
        }),
        Statistics::Int32(s) => pair(s.min_opt(), s.max_opt(), |v| Some(ScalarValue::Int(*v as i64))),
        Statistics::Int64(s) if is_unsigned => pair(s.min_opt(), s.max_opt(), |v| {
            i64::try_from(*v as u64).ok().map(ScalarValue::Int)
        }),
        Statistics::Int64(s) => pair(s.min_opt(), s.max_opt(), |v| Some(ScalarValue::Int(*v))),
        Statistics::Float(s) => pair(s.min_opt(), s.max_opt(), |v| {
            Some(ScalarValue::Float(*v as f64))
        }),
        Statistics::Double(s) => pair(s.min_opt(), s.max_opt(), |v| Some(ScalarValue::Float(*v))),
        Statistics::ByteArray(s) if is_utf8 => pair(s.min_opt(), s.max_opt(), |v| {
            v.as_utf8().ok().map(|s| ScalarValue::Str(s.to_string()))
        }),
        _ => None,
    }
}
