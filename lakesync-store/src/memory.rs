//! In-memory database adapter: the reference engine for tests and
//! single-process deployments.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use lakesync_core::{HlcTimestamp, Result, RowDelta, RowState, TableSchema};

use crate::adapter::{materialize_row, DatabaseAdapter};

#[derive(Default)]
struct Inner {
    // Keyed by (hlc, delta_id) so iteration yields the adapter's ordering
    // contract directly.
    by_hlc: BTreeMap<(HlcTimestamp, String), RowDelta>,
    ids: HashSet<String>,
    schemas: HashMap<String, TableSchema>,
}

/// Delta store held entirely in process memory.
#[derive(Default)]
pub struct MemoryAdapter {
    inner: RwLock<Inner>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored deltas.
    pub fn delta_count(&self) -> usize {
        self.inner.read().by_hlc.len()
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    async fn insert_deltas(&self, deltas: &[RowDelta]) -> Result<usize> {
        let mut inner = self.inner.write();
        let mut inserted = 0;
        for delta in deltas {
            if inner.ids.insert(delta.delta_id.clone()) {
                inner
                    .by_hlc
                    .insert((delta.hlc, delta.delta_id.clone()), delta.clone());
                inserted += 1;
            }
        }
        debug!(inserted, total = inner.by_hlc.len(), "inserted deltas");
        Ok(inserted)
    }

    async fn query_deltas_since(
        &self,
        since: HlcTimestamp,
        tables: Option<&[String]>,
    ) -> Result<Vec<RowDelta>> {
        let inner = self.inner.read();
        let deltas = inner
            .by_hlc
            .range((since, String::new())..)
            .map(|(_, d)| d)
            .filter(|d| d.hlc > since)
            .filter(|d| tables.map_or(true, |ts| ts.iter().any(|t| t == &d.table)))
            .cloned()
            .collect();
        Ok(deltas)
    }

    async fn get_latest_state(&self, table: &str, row_id: &str) -> Result<Option<RowState>> {
        let inner = self.inner.read();
        let touching: Vec<&RowDelta> = inner
            .by_hlc
            .values()
            .filter(|d| d.table == table && d.row_id == row_id)
            .collect();
        Ok(materialize_row(&touching))
    }

    async fn ensure_schema(&self, schema: &TableSchema) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.schemas.get_mut(&schema.table) {
            Some(existing) => existing.merge(schema)?,
            None => {
                inner.schemas.insert(schema.table.clone(), schema.clone());
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakesync_core::{ColumnDelta, ColumnValue, DeltaOp};

    fn delta(hlc: u64, row: &str, title: &str) -> RowDelta {
        RowDelta::new(
            DeltaOp::Insert,
            "todos",
            row,
            "c1",
            HlcTimestamp::encode(hlc, 0),
            vec![ColumnDelta::new("title", ColumnValue::Str(title.into()))],
        )
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let adapter = MemoryAdapter::new();
        let d = delta(1000, "r1", "a");
        assert_eq!(adapter.insert_deltas(&[d.clone()]).await.unwrap(), 1);
        assert_eq!(adapter.insert_deltas(&[d]).await.unwrap(), 0);
        assert_eq!(adapter.delta_count(), 1);
    }

    #[tokio::test]
    async fn test_query_since_is_exclusive_and_ordered() {
        let adapter = MemoryAdapter::new();
        adapter
            .insert_deltas(&[delta(3000, "r3", "c"), delta(1000, "r1", "a"), delta(2000, "r2", "b")])
            .await
            .unwrap();

        let all = adapter
            .query_deltas_since(HlcTimestamp::ZERO, None)
            .await
            .unwrap();
        let hlcs: Vec<u64> = all.iter().map(|d| d.hlc.wall_ms()).collect();
        assert_eq!(hlcs, vec![1000, 2000, 3000]);

        let after_first = adapter
            .query_deltas_since(HlcTimestamp::encode(1000, 0), None)
            .await
            .unwrap();
        assert_eq!(after_first.len(), 2);
    }

    #[tokio::test]
    async fn test_query_since_filters_tables() {
        let adapter = MemoryAdapter::new();
        let mut other = delta(1500, "r9", "z");
        other.table = "notes".into();
        adapter
            .insert_deltas(&[delta(1000, "r1", "a"), other])
            .await
            .unwrap();

        let todos_only = adapter
            .query_deltas_since(HlcTimestamp::ZERO, Some(&["todos".to_string()]))
            .await
            .unwrap();
        assert_eq!(todos_only.len(), 1);
        assert_eq!(todos_only[0].table, "todos");
    }

    #[tokio::test]
    async fn test_ensure_schema_is_append_only() {
        use lakesync_core::{ColumnDef, ColumnType};

        let adapter = MemoryAdapter::new();
        let v1 = TableSchema::new(
            "todos",
            vec![ColumnDef::new("title", ColumnType::String)],
        );
        adapter.ensure_schema(&v1).await.unwrap();
        // same schema again is a no-op
        adapter.ensure_schema(&v1).await.unwrap();

        let v2 = TableSchema::new(
            "todos",
            vec![
                ColumnDef::new("title", ColumnType::String),
                ColumnDef::new("done", ColumnType::Boolean),
            ],
        );
        adapter.ensure_schema(&v2).await.unwrap();

        // type change is rejected
        let bad = TableSchema::new(
            "todos",
            vec![ColumnDef::new("done", ColumnType::String)],
        );
        assert!(adapter.ensure_schema(&bad).await.is_err());
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_state_lww() {
        let adapter = MemoryAdapter::new();
        adapter
            .insert_deltas(&[delta(1000, "r1", "a"), delta(2000, "r1", "b")])
            .await
            .unwrap();
        let state = adapter.get_latest_state("todos", "r1").await.unwrap().unwrap();
        assert!(matches!(&state["title"], ColumnValue::Str(s) if s == "b"));

        let missing = adapter.get_latest_state("todos", "nope").await.unwrap();
        assert!(missing.is_none());
    }
}
