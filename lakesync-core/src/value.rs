//! Column values: the tagged union a row cell can hold.
//!
//! On JSON boundaries the union is untagged, so `"a"`, `1.5`, `true`,
//! `null`, and structured JSON map directly onto the wire representation
//! clients produce.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A dynamically typed column value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    // Must stay last: untagged deserialization tries variants in order,
    // and Json would otherwise swallow every input.
    Json(JsonValue),
}

impl ColumnValue {
    /// Exact equality: IEEE `Object.is` semantics for numbers (`NaN`
    /// equals `NaN`, `+0` differs from `-0`), deep structural equality
    /// for JSON (object key order irrelevant).
    pub fn same_value(&self, other: &ColumnValue) -> bool {
        match (self, other) {
            (ColumnValue::Null, ColumnValue::Null) => true,
            (ColumnValue::Bool(a), ColumnValue::Bool(b)) => a == b,
            (ColumnValue::Num(a), ColumnValue::Num(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (ColumnValue::Str(a), ColumnValue::Str(b)) => a == b,
            (ColumnValue::Json(a), ColumnValue::Json(b)) => a == b,
            _ => false,
        }
    }

    /// Render as a `serde_json::Value`, the form used for canonical
    /// hashing and JSON transport.
    pub fn to_json(&self) -> JsonValue {
        match self {
            ColumnValue::Null => JsonValue::Null,
            ColumnValue::Bool(b) => JsonValue::Bool(*b),
            ColumnValue::Num(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            ColumnValue::Str(s) => JsonValue::String(s.clone()),
            ColumnValue::Json(v) => v.clone(),
        }
    }

    /// Inverse of [`ColumnValue::to_json`]: scalars land on the scalar
    /// variants, arrays and objects on `Json`.
    pub fn from_json(value: JsonValue) -> ColumnValue {
        match value {
            JsonValue::Null => ColumnValue::Null,
            JsonValue::Bool(b) => ColumnValue::Bool(b),
            JsonValue::Number(n) => match n.as_f64() {
                Some(f) => ColumnValue::Num(f),
                None => ColumnValue::Json(JsonValue::Number(n)),
            },
            JsonValue::String(s) => ColumnValue::Str(s),
            other => ColumnValue::Json(other),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}
