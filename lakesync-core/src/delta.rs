//! Row-level change records and their content-addressed identity.
//!
//! A [`RowDelta`] is immutable once created. Its `delta_id` is a SHA-256
//! over a canonical serialization of the logical change, so the identical
//! change always produces the identical id regardless of field order at
//! the producer.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};

use crate::hlc::HlcTimestamp;
use crate::value::ColumnValue;

/// Change kind carried by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaOp {
    Insert,
    Update,
    Delete,
}

impl DeltaOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaOp::Insert => "INSERT",
            DeltaOp::Update => "UPDATE",
            DeltaOp::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<DeltaOp> {
        match s {
            "INSERT" => Some(DeltaOp::Insert),
            "UPDATE" => Some(DeltaOp::Update),
            "DELETE" => Some(DeltaOp::Delete),
            _ => None,
        }
    }
}

/// A single column change within a row delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDelta {
    pub column: String,
    pub value: ColumnValue,
}

impl ColumnDelta {
    pub fn new(column: impl Into<String>, value: ColumnValue) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// A row-level change: INSERT carries all known columns, UPDATE only the
/// changed ones, DELETE none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDelta {
    pub delta_id: String,
    pub op: DeltaOp,
    pub table: String,
    pub row_id: String,
    pub client_id: String,
    pub hlc: HlcTimestamp,
    pub columns: Vec<ColumnDelta>,
}

impl RowDelta {
    /// Build a delta, computing its content-addressed id.
    pub fn new(
        op: DeltaOp,
        table: impl Into<String>,
        row_id: impl Into<String>,
        client_id: impl Into<String>,
        hlc: HlcTimestamp,
        columns: Vec<ColumnDelta>,
    ) -> Self {
        let table = table.into();
        let row_id = row_id.into();
        let client_id = client_id.into();
        let delta_id = compute_delta_id(&client_id, hlc, &table, &row_id, &columns);
        Self {
            delta_id,
            op,
            table,
            row_id,
            client_id,
            hlc,
            columns,
        }
    }

    /// Approximate in-memory footprint, used for buffer byte accounting.
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// Content-addressed delta identity.
///
/// SHA-256 hex over the canonical JSON of
/// `{clientId, columns, hlc, rowId, table}` with the HLC rendered as a
/// decimal string. `serde_json`'s default object map is a `BTreeMap`, so
/// keys serialize lexicographically sorted at every depth.
pub fn compute_delta_id(
    client_id: &str,
    hlc: HlcTimestamp,
    table: &str,
    row_id: &str,
    columns: &[ColumnDelta],
) -> String {
    let columns_json: Vec<JsonValue> = columns
        .iter()
        .map(|c| json!({ "column": c.column, "value": c.value.to_json() }))
        .collect();

    let payload = json!({
        "clientId": client_id,
        "columns": columns_json,
        "hlc": hlc.as_u64().to_string(),
        "rowId": row_id,
        "table": table,
    });

    // to_string on a Value with BTreeMap-backed objects is the canonical,
    // key-order-stable form.
    let canonical = payload.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}
