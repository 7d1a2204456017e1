//! Table helpers: Parquet bytes <-> polars frames, and row-group extraction.
//!
//! Row groups are read with the `parquet` crate (which can address a single
//! row group of a remote file) and re-encoded as standalone Parquet blobs;
//! everything handed to callers is a polars `DataFrame`.

use crate::columnar::stats::ScalarValue;
use crate::error::CacheError;
use arrow::datatypes::SchemaRef;
use parquet::arrow::arrow_reader::{ArrowReaderMetadata, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use parquet::file::reader::ChunkReader;
use polars::prelude::*;
use std::io::Cursor;

/// Decode a Parquet blob into a frame.
pub fn frame_from_parquet(bytes: &[u8]) -> Result<DataFrame, CacheError> {
    Ok(ParquetReader::new(Cursor::new(bytes)).finish()?)
}

/// Encode a frame as an uncompressed Parquet blob.
pub fn frame_to_parquet(frame: &DataFrame) -> Result<Vec<u8>, CacheError> {
    let mut frame = frame.clone();
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .with_compression(ParquetCompression::Uncompressed)
        .finish(&mut frame)?;
    Ok(buf)
}

/// Read row group `index` from `reader` and re-encode it as a standalone
/// Parquet blob with the same schema.
pub fn row_group_to_parquet<R>(
    reader: R,
    metadata: &ArrowReaderMetadata,
    index: usize,
) -> Result<Vec<u8>, CacheError>
where
    R: ChunkReader + 'static,
{
    let batches = ParquetRecordBatchReaderBuilder::new_with_metadata(reader, metadata.clone())
        .with_row_groups(vec![index])
        .build()?;

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, metadata.schema().clone(), None)?;
    for batch in batches {
        let batch = batch.map_err(|e| CacheError::Parquet(e.to_string()))?;
        writer.write(&batch)?;
    }
    writer.close()?;
    Ok(buf)
}

/// A Parquet blob with `schema` and no rows.
pub fn empty_parquet(schema: SchemaRef) -> Result<Vec<u8>, CacheError> {
    let mut buf = Vec::new();
    ArrowWriter::try_new(&mut buf, schema, None)?.close()?;
    Ok(buf)
}

/// Concatenate frames that share a schema. `None` for an empty list.
pub fn concat(frames: Vec<DataFrame>) -> Result<Option<DataFrame>, CacheError> {
    let mut frames = frames.into_iter();
    let Some(mut acc) = frames.next() else {
        return Ok(None);
    };
    for frame in frames {
        acc.vstack_mut(&frame)?;
    }
    Ok(Some(acc))
}

fn literal(value: &ScalarValue) -> Expr {
    match value {
        ScalarValue::Int(v) => lit(*v),
        ScalarValue::Float(v) => lit(*v),
        ScalarValue::Str(v) => lit(v.clone()),
        ScalarValue::Bool(v) => lit(*v),
    }
}

/// Rows of `frame` where `column == value`.
pub fn filter_eq(frame: DataFrame, column: &str, value: &ScalarValue) -> Result<DataFrame, CacheError> {
    Ok(frame
        .lazy()
        .filter(col(column).eq(literal(value)))
        .collect()?)
}

/// Keep only `columns`, in the given order. `None` keeps everything.
pub fn project(frame: DataFrame, columns: Option<&[String]>) -> Result<DataFrame, CacheError> {
    match columns {
        Some(columns) => Ok(frame.select(columns.iter().map(String::as_str))?),
        None => Ok(frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices() -> DataFrame {
        df!(
            "symbol" => ["AAPL", "NVDA", "AAPL", "MSFT"],
            "close" => [190.5, 120.0, 191.25, 410.0],
            "volume" => [10i64, 20, 30, 40],
        )
        .unwrap()
    }

    #[test]
    fn parquet_round_trip_preserves_frame() {
        let frame = prices();
        let bytes = frame_to_parquet(&frame).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        assert!(frame_from_parquet(&bytes).unwrap().equals(&frame));
    }

    #[test]
    fn filter_and_project() {
        let out = filter_eq(prices(), "symbol", &"AAPL".into()).unwrap();
        assert_eq!(out.height(), 2);

        let out = project(out, Some(&["close".to_string()])).unwrap();
        assert_eq!(out.width(), 1);
        assert!(out.column("close").is_ok());

        let ints = filter_eq(prices(), "volume", &ScalarValue::Int(40)).unwrap();
        assert_eq!(ints.height(), 1);
    }

    #[test]
    fn unknown_projection_column_is_an_error() {
        let err = project(prices(), Some(&["nope".to_string()])).unwrap_err();
        assert!(matches!(err, CacheError::Frame(_)));
    }

    #[test]
    fn concat_stacks_rows() {
        let frame = concat(vec![prices(), prices()]).unwrap().unwrap();
        assert_eq!(frame.height(), 8);
        assert!(concat(Vec::new()).unwrap().is_none());
    }
}
