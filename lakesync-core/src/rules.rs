//! Sync rules: declarative bucket filters deciding which deltas a client
//! may receive on pull.
//!
//! A delta passes when any bucket lists its table and every filter of
//! that bucket evaluates true against the delta's columns.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::delta::RowDelta;
use crate::value::ColumnValue;

/// Comparison operator of a rule filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Contains,
}

/// A single column predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

/// A named set of tables plus the filters every delta must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketDef {
    pub name: String,
    pub tables: Vec<String>,
    #[serde(default)]
    pub filters: Vec<RuleFilter>,
}

/// Versioned rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRules {
    pub version: u32,
    pub buckets: Vec<BucketDef>,
}

/// Rules plus the opaque claims of the requesting client. Claims are
/// carried for the caller's bookkeeping; the filter operators evaluate
/// against delta columns only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesContext {
    #[serde(default)]
    pub claims: JsonValue,
    pub rules: SyncRules,
}

impl RulesContext {
    pub fn new(rules: SyncRules) -> Self {
        Self {
            claims: JsonValue::Null,
            rules,
        }
    }

    /// True when any bucket admits the delta.
    pub fn matches(&self, delta: &RowDelta) -> bool {
        self.rules
            .buckets
            .iter()
            .any(|bucket| bucket_matches(bucket, delta))
    }
}

fn bucket_matches(bucket: &BucketDef, delta: &RowDelta) -> bool {
    if !bucket.tables.iter().any(|t| t == &delta.table) {
        return false;
    }
    bucket.filters.iter().all(|f| filter_matches(f, delta))
}

fn filter_matches(filter: &RuleFilter, delta: &RowDelta) -> bool {
    let Some(cell) = delta.columns.iter().find(|c| c.column == filter.column) else {
        return false;
    };
    eval(filter.op, &cell.value, &filter.value)
}

fn eval(op: FilterOp, actual: &ColumnValue, expected: &JsonValue) -> bool {
    match op {
        FilterOp::Eq => actual.same_value(&ColumnValue::from_json(expected.clone())),
        FilterOp::Neq => !actual.same_value(&ColumnValue::from_json(expected.clone())),
        FilterOp::Lt => compare(actual, expected).map_or(false, |o| o.is_lt()),
        FilterOp::Lte => compare(actual, expected).map_or(false, |o| o.is_le()),
        FilterOp::Gt => compare(actual, expected).map_or(false, |o| o.is_gt()),
        FilterOp::Gte => compare(actual, expected).map_or(false, |o| o.is_ge()),
        FilterOp::In => expected.as_array().map_or(false, |candidates| {
            candidates
                .iter()
                .any(|v| actual.same_value(&ColumnValue::from_json(v.clone())))
        }),
        FilterOp::Contains => contains(actual, expected),
    }
}

/// Ordered comparison is defined for number-number and string-string
/// pairs; every other combination fails the filter.
fn compare(actual: &ColumnValue, expected: &JsonValue) -> Option<std::cmp::Ordering> {
    match (actual, expected) {
        (ColumnValue::Num(a), JsonValue::Number(b)) => a.partial_cmp(&b.as_f64()?),
        (ColumnValue::Str(a), JsonValue::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// `contains`: substring match on strings, element membership on JSON
/// arrays.
fn contains(actual: &ColumnValue, expected: &JsonValue) -> bool {
    match actual {
        ColumnValue::Str(s) => expected.as_str().map_or(false, |needle| s.contains(needle)),
        ColumnValue::Json(JsonValue::Array(items)) => items.iter().any(|v| v == expected),
        _ => false,
    }
}
