//! Flush manifest codecs: the on-disk encodings of a buffer snapshot.
//!
//! The Parquet form lays out system columns first (`op, table, row_id,
//! client_id, hlc, delta_id`) followed by the user columns in table-schema
//! order, Snappy-compressed. Booleans are written as Int8 and recorded in
//! the `lakesync:bool_columns` file-metadata key so the reader can restore
//! them; JSON columns are stringified; the HLC rides as Int64.
//!
//! The JSON form is the full manifest (entries plus schemas) with HLC
//! fields as decimal strings, used both as the claim-check payload and as
//! the `json` flush format.

use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, Int8Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema as ArrowSchema};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use serde::{Deserialize, Serialize};

use lakesync_core::{
    ColumnDelta, ColumnType, ColumnValue, DeltaOp, HlcTimestamp, Result, RowDelta, SyncError,
    TableSchema,
};

/// File-metadata key listing columns that were encoded as Int8 booleans.
pub const BOOL_COLUMNS_KEY: &str = "lakesync:bool_columns";

/// Snapshot handed to flush encoders and materialisers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushManifest {
    pub entries: Vec<RowDelta>,
    pub schemas: Vec<TableSchema>,
}

impl FlushManifest {
    pub fn new(entries: Vec<RowDelta>, schemas: Vec<TableSchema>) -> Self {
        Self { entries, schemas }
    }

    /// Encode as JSON with HLC fields as decimal strings.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode the JSON form, reviving HLC fields to 64-bit values.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<FlushManifest> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

const SYSTEM_COLUMNS: usize = 6;

/// Encode deltas as a Snappy-compressed Parquet file.
///
/// An empty delta slice produces a valid empty file (schema, no row
/// groups) that reads back as empty.
pub fn write_parquet(deltas: &[RowDelta], schema: &TableSchema) -> Result<Vec<u8>> {
    let arrow_schema = Arc::new(arrow_schema_for(schema));
    let bool_columns: Vec<&str> = schema
        .columns
        .iter()
        .filter(|c| c.column_type == ColumnType::Boolean)
        .map(|c| c.name.as_str())
        .collect();

    let mut props = WriterProperties::builder().set_compression(Compression::SNAPPY);
    if !bool_columns.is_empty() {
        let listed = serde_json::to_string(&bool_columns)?;
        props = props.set_key_value_metadata(Some(vec![KeyValue::new(
            BOOL_COLUMNS_KEY.to_string(),
            listed,
        )]));
    }

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, arrow_schema.clone(), Some(props.build()))
        .map_err(|e| SyncError::Flush(e.to_string()))?;

    if !deltas.is_empty() {
        let batch = batch_from_deltas(deltas, schema, arrow_schema)?;
        writer
            .write(&batch)
            .map_err(|e| SyncError::Flush(e.to_string()))?;
    }
    writer
        .close()
        .map_err(|e| SyncError::Flush(e.to_string()))?;
    Ok(buf)
}

/// Decode a Parquet flush file back into deltas.
///
/// The `schema` distinguishes JSON-typed user columns from plain strings;
/// boolean restoration needs only the file's own metadata. Column lists
/// are rebuilt from the vectors by op: INSERT restores every schema
/// column (null cells become explicit nulls), UPDATE restores the
/// non-null cells, DELETE none.
pub fn read_parquet(bytes: Bytes, schema: Option<&TableSchema>) -> Result<Vec<RowDelta>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| SyncError::Flush(format!("corrupted parquet: {e}")))?;

    let bool_columns: Vec<String> = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kvs| {
            kvs.iter()
                .find(|kv| kv.key == BOOL_COLUMNS_KEY)
                .and_then(|kv| kv.value.as_deref())
                .and_then(|v| serde_json::from_str(v).ok())
        })
        .unwrap_or_default();

    let reader = builder
        .build()
        .map_err(|e| SyncError::Flush(format!("corrupted parquet: {e}")))?;

    let mut deltas = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| SyncError::Flush(format!("corrupted parquet: {e}")))?;
        deltas_from_batch(&batch, schema, &bool_columns, &mut deltas)?;
    }
    Ok(deltas)
}

/// Arrow schema of the flush file: system columns then user columns in
/// table-schema order.
fn arrow_schema_for(schema: &TableSchema) -> ArrowSchema {
    let mut fields = vec![
        Field::new("op", DataType::Utf8, false),
        Field::new("table", DataType::Utf8, false),
        Field::new("row_id", DataType::Utf8, false),
        Field::new("client_id", DataType::Utf8, false),
        Field::new("hlc", DataType::Int64, false),
        Field::new("delta_id", DataType::Utf8, false),
    ];
    for column in &schema.columns {
        let data_type = match column.column_type {
            ColumnType::Number => DataType::Float64,
            ColumnType::Boolean => DataType::Int8,
            // String, Json and Null all ride as Utf8.
            _ => DataType::Utf8,
        };
        fields.push(Field::new(&column.name, data_type, true));
    }
    ArrowSchema::new(fields)
}

fn batch_from_deltas(
    deltas: &[RowDelta],
    schema: &TableSchema,
    arrow_schema: Arc<ArrowSchema>,
) -> Result<RecordBatch> {
    let ops: StringArray = deltas.iter().map(|d| Some(d.op.as_str())).collect();
    let tables: StringArray = deltas.iter().map(|d| Some(d.table.as_str())).collect();
    let row_ids: StringArray = deltas.iter().map(|d| Some(d.row_id.as_str())).collect();
    let client_ids: StringArray = deltas.iter().map(|d| Some(d.client_id.as_str())).collect();
    let hlcs: Int64Array = deltas.iter().map(|d| Some(d.hlc.as_u64() as i64)).collect();
    let delta_ids: StringArray = deltas.iter().map(|d| Some(d.delta_id.as_str())).collect();

    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(ops),
        Arc::new(tables),
        Arc::new(row_ids),
        Arc::new(client_ids),
        Arc::new(hlcs),
        Arc::new(delta_ids),
    ];

    for column in &schema.columns {
        let cells = deltas
            .iter()
            .map(|d| d.columns.iter().find(|c| c.column == column.name).map(|c| &c.value));
        let array: ArrayRef = match column.column_type {
            ColumnType::Number => Arc::new(
                cells
                    .map(|v| match v {
                        Some(ColumnValue::Num(n)) => Some(*n),
                        _ => None,
                    })
                    .collect::<Float64Array>(),
            ),
            ColumnType::Boolean => Arc::new(
                cells
                    .map(|v| match v {
                        Some(ColumnValue::Bool(b)) => Some(*b as i8),
                        _ => None,
                    })
                    .collect::<Int8Array>(),
            ),
            ColumnType::Json => Arc::new(
                cells
                    .map(|v| v.map(|value| value.to_json().to_string()))
                    .collect::<StringArray>(),
            ),
            _ => Arc::new(
                cells
                    .map(|v| match v {
                        Some(ColumnValue::Str(s)) => Some(s.clone()),
                        Some(ColumnValue::Null) | None => None,
                        Some(other) => Some(other.to_json().to_string()),
                    })
                    .collect::<StringArray>(),
            ),
        };
        arrays.push(array);
    }

    RecordBatch::try_new(arrow_schema, arrays).map_err(|e| SyncError::Flush(e.to_string()))
}

fn deltas_from_batch(
    batch: &RecordBatch,
    schema: Option<&TableSchema>,
    bool_columns: &[String],
    out: &mut Vec<RowDelta>,
) -> Result<()> {
    let ops = string_column(batch, 0, "op")?;
    let tables = string_column(batch, 1, "table")?;
    let row_ids = string_column(batch, 2, "row_id")?;
    let client_ids = string_column(batch, 3, "client_id")?;
    let hlcs = batch
        .column(4)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| SyncError::Flush("hlc column is not Int64".into()))?;
    let delta_ids = string_column(batch, 5, "delta_id")?;

    let batch_schema = batch.schema();
    let user_fields: Vec<(usize, &Field)> = batch_schema
        .fields()
        .iter()
        .enumerate()
        .skip(SYSTEM_COLUMNS)
        .map(|(i, f)| (i, f.as_ref()))
        .collect();

    for row in 0..batch.num_rows() {
        let op = DeltaOp::parse(ops.value(row))
            .ok_or_else(|| SyncError::Flush(format!("unknown op '{}'", ops.value(row))))?;

        let mut columns = Vec::new();
        if op != DeltaOp::Delete {
            for (idx, field) in &user_fields {
                let name = field.name();
                let cell = read_cell(batch.column(*idx), row, name, schema, bool_columns)?;
                match cell {
                    Some(value) => columns.push(ColumnDelta::new(name.clone(), value)),
                    // INSERT carries every schema column, so a null cell
                    // is an explicit null write rather than an absent one.
                    None if op == DeltaOp::Insert => {
                        columns.push(ColumnDelta::new(name.clone(), ColumnValue::Null))
                    }
                    None => {}
                }
            }
        }

        out.push(RowDelta {
            delta_id: delta_ids.value(row).to_string(),
            op,
            table: tables.value(row).to_string(),
            row_id: row_ids.value(row).to_string(),
            client_id: client_ids.value(row).to_string(),
            hlc: HlcTimestamp::from_u64(hlcs.value(row) as u64),
            columns,
        });
    }
    Ok(())
}

fn string_column<'a>(batch: &'a RecordBatch, index: usize, name: &str) -> Result<&'a StringArray> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| SyncError::Flush(format!("{name} column is not Utf8")))
}

fn read_cell(
    array: &ArrayRef,
    row: usize,
    name: &str,
    schema: Option<&TableSchema>,
    bool_columns: &[String],
) -> Result<Option<ColumnValue>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let value = match array.data_type() {
        DataType::Int8 => {
            let cells = array
                .as_any()
                .downcast_ref::<Int8Array>()
                .ok_or_else(|| SyncError::Flush(format!("{name} column is not Int8")))?;
            if bool_columns.iter().any(|c| c == name) {
                ColumnValue::Bool(cells.value(row) != 0)
            } else {
                ColumnValue::Num(cells.value(row) as f64)
            }
        }
        DataType::Float64 => {
            let cells = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| SyncError::Flush(format!("{name} column is not Float64")))?;
            ColumnValue::Num(cells.value(row))
        }
        DataType::Utf8 => {
            let cells = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| SyncError::Flush(format!("{name} column is not Utf8")))?;
            let text = cells.value(row);
            let is_json = schema
                .and_then(|s| s.column(name))
                .map_or(false, |c| c.column_type == ColumnType::Json);
            if is_json {
                let parsed = serde_json::from_str(text)
                    .map_err(|e| SyncError::Flush(format!("invalid json in '{name}': {e}")))?;
                match parsed {
                    serde_json::Value::Null => ColumnValue::Null,
                    other => ColumnValue::Json(other),
                }
            } else {
                ColumnValue::Str(text.to_string())
            }
        }
        other => {
            return Err(SyncError::Flush(format!(
                "unsupported column type {other:?} for '{name}'"
            )))
        }
    };
    Ok(Some(value))
}
