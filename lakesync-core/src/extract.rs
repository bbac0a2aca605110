//! Delta extraction: diff two row states into a column-level change.

use std::collections::BTreeMap;

use crate::delta::{ColumnDelta, DeltaOp, RowDelta};
use crate::hlc::HlcTimestamp;
use crate::schema::TableSchema;
use crate::value::ColumnValue;

/// Full state of a row, keyed by column name. `BTreeMap` keeps iteration
/// order deterministic so extraction output is stable.
pub type RowState = BTreeMap<String, ColumnValue>;

/// Context for one extraction: where the change happened and who made it.
#[derive(Debug, Clone)]
pub struct ExtractContext<'a> {
    pub table: &'a str,
    pub row_id: &'a str,
    pub client_id: &'a str,
    pub hlc: HlcTimestamp,
    pub schema: Option<&'a TableSchema>,
}

/// Diff `before` and `after` into a row delta.
///
/// - both absent: no delta
/// - before absent: INSERT carrying every defined column (filtered by the
///   schema when one is provided)
/// - after absent: DELETE with empty columns
/// - both present: UPDATE carrying only the changed columns, or no delta
///   when nothing changed
pub fn extract(
    before: Option<&RowState>,
    after: Option<&RowState>,
    ctx: &ExtractContext<'_>,
) -> Option<RowDelta> {
    match (before, after) {
        (None, None) => None,
        (None, Some(after)) => {
            let columns = columns_of(after, ctx.schema);
            Some(make_delta(DeltaOp::Insert, columns, ctx))
        }
        (Some(_), None) => Some(make_delta(DeltaOp::Delete, Vec::new(), ctx)),
        (Some(before), Some(after)) => {
            let changed = diff_columns(before, after, ctx.schema);
            if changed.is_empty() {
                None
            } else {
                Some(make_delta(DeltaOp::Update, changed, ctx))
            }
        }
    }
}

fn make_delta(op: DeltaOp, columns: Vec<ColumnDelta>, ctx: &ExtractContext<'_>) -> RowDelta {
    RowDelta::new(op, ctx.table, ctx.row_id, ctx.client_id, ctx.hlc, columns)
}

fn in_schema(schema: Option<&TableSchema>, column: &str) -> bool {
    schema.map_or(true, |s| s.has_column(column))
}

fn columns_of(state: &RowState, schema: Option<&TableSchema>) -> Vec<ColumnDelta> {
    state
        .iter()
        .filter(|(name, _)| in_schema(schema, name))
        .map(|(name, value)| ColumnDelta::new(name.clone(), value.clone()))
        .collect()
}

fn diff_columns(
    before: &RowState,
    after: &RowState,
    schema: Option<&TableSchema>,
) -> Vec<ColumnDelta> {
    let mut changed = Vec::new();
    for (name, after_value) in after {
        if !in_schema(schema, name) {
            continue;
        }
        let same = before
            .get(name)
            .map_or(false, |before_value| before_value.same_value(after_value));
        if !same {
            changed.push(ColumnDelta::new(name.clone(), after_value.clone()));
        }
    }
    // A column dropped from the row state is an explicit null write.
    for name in before.keys() {
        if !after.contains_key(name) && in_schema(schema, name) {
            changed.push(ColumnDelta::new(name.clone(), ColumnValue::Null));
        }
    }
    changed
}
