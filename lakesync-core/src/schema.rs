//! Table schema definitions shared by the gateway, the columnar flush
//! codec, and the catalogue layer.
//!
//! Evolution is append-only: new columns may be added, existing columns
//! never change type and are never removed.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Logical column type of a user column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Json,
    Null,
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Schema of a synced table: the user columns in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    /// Look up a column definition by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Append-only merge: columns present in `other` but not here are
    /// appended. A column present in both with a different type is a
    /// schema mismatch; column removal is not supported.
    pub fn merge(&mut self, other: &TableSchema) -> Result<()> {
        for incoming in &other.columns {
            match self.column(&incoming.name) {
                Some(existing) if existing.column_type != incoming.column_type => {
                    return Err(SyncError::SchemaMismatch {
                        table: self.table.clone(),
                        column: incoming.name.clone(),
                    });
                }
                Some(_) => {}
                None => self.columns.push(incoming.clone()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todos() -> TableSchema {
        TableSchema::new(
            "todos",
            vec![
                ColumnDef::new("title", ColumnType::String),
                ColumnDef::new("done", ColumnType::Boolean),
            ],
        )
    }

    #[test]
    fn test_merge_appends_new_columns() {
        let mut schema = todos();
        let incoming = TableSchema::new(
            "todos",
            vec![
                ColumnDef::new("title", ColumnType::String),
                ColumnDef::new("priority", ColumnType::Number),
            ],
        );
        schema.merge(&incoming).unwrap();
        assert_eq!(schema.columns.len(), 3);
        assert_eq!(schema.columns[2].name, "priority");
    }

    #[test]
    fn test_merge_rejects_type_change() {
        let mut schema = todos();
        let incoming = TableSchema::new(
            "todos",
            vec![ColumnDef::new("done", ColumnType::String)],
        );
        assert!(matches!(
            schema.merge(&incoming),
            Err(SyncError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_serde_type_tag() {
        let json = serde_json::to_value(&todos()).unwrap();
        assert_eq!(json["columns"][0]["type"], "string");
        assert_eq!(json["columns"][1]["type"], "boolean");
    }
}
