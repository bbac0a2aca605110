//! Equality-delete files: columnar `{table, row_id}` pairs marking
//! logical deletes for downstream readers.
//!
//! An empty set writes as an empty byte array (no Parquet footer at all),
//! and an empty byte array reads back as the empty set. Non-empty files
//! preserve insertion order.

use std::sync::Arc;

use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema as ArrowSchema};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use lakesync_core::{Result, SyncError};

/// One logically deleted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqualityDelete {
    pub table: String,
    pub row_id: String,
}

impl EqualityDelete {
    pub fn new(table: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            row_id: row_id.into(),
        }
    }
}

fn file_schema() -> ArrowSchema {
    ArrowSchema::new(vec![
        Field::new("table", DataType::Utf8, false),
        Field::new("row_id", DataType::Utf8, false),
    ])
}

/// Write deletions as a Snappy-compressed Parquet container.
pub fn write_equality_deletes(deletes: &[EqualityDelete]) -> Result<Vec<u8>> {
    if deletes.is_empty() {
        return Ok(Vec::new());
    }

    let schema = Arc::new(file_schema());
    let tables: StringArray = deletes.iter().map(|d| Some(d.table.as_str())).collect();
    let row_ids: StringArray = deletes.iter().map(|d| Some(d.row_id.as_str())).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(tables) as ArrayRef, Arc::new(row_ids) as ArrayRef],
    )
    .map_err(|e| SyncError::Flush(e.to_string()))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))
        .map_err(|e| SyncError::Flush(e.to_string()))?;
    writer
        .write(&batch)
        .map_err(|e| SyncError::Flush(e.to_string()))?;
    writer
        .close()
        .map_err(|e| SyncError::Flush(e.to_string()))?;
    Ok(buf)
}

/// Read deletions back, preserving order.
pub fn read_equality_deletes(bytes: Bytes) -> Result<Vec<EqualityDelete>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| SyncError::Flush(format!("corrupted equality-delete file: {e}")))?
        .build()
        .map_err(|e| SyncError::Flush(format!("corrupted equality-delete file: {e}")))?;

    let mut deletes = Vec::new();
    for batch in reader {
        let batch =
            batch.map_err(|e| SyncError::Flush(format!("corrupted equality-delete file: {e}")))?;
        let tables = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| SyncError::Flush("table column is not Utf8".into()))?;
        let row_ids = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| SyncError::Flush("row_id column is not Utf8".into()))?;
        for row in 0..batch.num_rows() {
            deletes.push(EqualityDelete::new(tables.value(row), row_ids.value(row)));
        }
    }
    Ok(deletes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_is_empty_bytes() {
        let bytes = write_equality_deletes(&[]).unwrap();
        assert!(bytes.is_empty());
        assert!(read_equality_deletes(Bytes::new()).unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip_preserves_order() {
        let deletes: Vec<EqualityDelete> = (0..5)
            .map(|i| EqualityDelete::new("todos", format!("r{i}")))
            .collect();
        let bytes = write_equality_deletes(&deletes).unwrap();
        let back = read_equality_deletes(Bytes::from(bytes)).unwrap();
        assert_eq!(back, deletes);
    }

    #[test]
    fn test_large_set_roundtrip() {
        let deletes: Vec<EqualityDelete> = (0..100)
            .map(|i| EqualityDelete::new(format!("t{}", i % 3), format!("r{i}")))
            .collect();
        let bytes = write_equality_deletes(&deletes).unwrap();
        let back = read_equality_deletes(Bytes::from(bytes)).unwrap();
        assert_eq!(back.len(), 100);
        assert_eq!(back, deletes);
    }
}
