//! Maintenance tasks: compacting flushed delta files into base files and
//! equality-delete files.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};
use uuid::Uuid;

use lakesync_core::{
    ColumnDef, ColumnDelta, ColumnType, ColumnValue, DeltaOp, HlcTimestamp, Result, RowDelta,
    SyncError, TableSchema,
};
use lakesync_store::{
    materialize_row, read_parquet, write_equality_deletes, write_parquet, EqualityDelete,
    FlushManifest, ObjectStore,
};

/// One unit of maintenance work.
#[derive(Debug, Clone)]
pub struct MaintenanceTask {
    /// Flushed delta files to compact.
    pub delta_file_keys: Vec<String>,
    /// Key prefix for base and equality-delete outputs.
    pub output_prefix: String,
    /// Key prefix the delta files live under.
    pub storage_prefix: String,
}

/// Compaction counters of one maintenance run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub base_files_written: usize,
    pub delete_files_written: usize,
    pub delta_files_compacted: usize,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Full report of one maintenance run.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub compaction: CompactionStats,
    pub snapshots_expired: usize,
    pub orphans_removed: usize,
}

/// Supplies the next unit of maintenance work, if any.
#[async_trait]
pub trait MaintenanceTaskProvider: Send + Sync {
    async fn next_task(&self) -> Result<Option<MaintenanceTask>>;
}

/// Executes one maintenance task.
#[async_trait]
pub trait MaintenanceRunner: Send + Sync {
    async fn run(&self, task: MaintenanceTask) -> Result<MaintenanceReport>;
}

/// Default runner: reads delta files, collapses rows under LWW per table,
/// writes one base file per table plus an equality-delete file for rows
/// whose final state is a delete.
pub struct CompactionRunner {
    store: Arc<dyn ObjectStore>,
    schema: Option<TableSchema>,
}

impl CompactionRunner {
    pub fn new(store: Arc<dyn ObjectStore>, schema: Option<TableSchema>) -> Self {
        Self { store, schema }
    }

    async fn read_delta_file(&self, key: &str, stats: &mut CompactionStats) -> Result<Vec<RowDelta>> {
        let bytes = self.store.get_object(key).await?;
        stats.bytes_read += bytes.len() as u64;
        if key.ends_with(".parquet") {
            read_parquet(bytes, self.schema.as_ref())
        } else {
            Ok(FlushManifest::from_json_bytes(&bytes)?.entries)
        }
    }

    fn schema_for(&self, table: &str, rows: &[(String, lakesync_core::RowState)]) -> TableSchema {
        if let Some(schema) = &self.schema {
            if schema.table == table {
                return schema.clone();
            }
        }
        // No configured schema for this table: infer column types from
        // the collapsed rows.
        let mut columns: BTreeMap<&str, ColumnType> = BTreeMap::new();
        for (_, state) in rows {
            for (name, value) in state {
                let inferred = match value {
                    ColumnValue::Num(_) => ColumnType::Number,
                    ColumnValue::Bool(_) => ColumnType::Boolean,
                    ColumnValue::Json(_) => ColumnType::Json,
                    _ => ColumnType::String,
                };
                columns.entry(name.as_str()).or_insert(inferred);
            }
        }
        TableSchema::new(
            table,
            columns
                .into_iter()
                .map(|(name, column_type)| ColumnDef::new(name, column_type))
                .collect(),
        )
    }
}

#[async_trait]
impl MaintenanceRunner for CompactionRunner {
    async fn run(&self, task: MaintenanceTask) -> Result<MaintenanceReport> {
        let mut stats = CompactionStats::default();

        // Collect every delta, grouped by table then row.
        let mut tables: BTreeMap<String, BTreeMap<String, Vec<RowDelta>>> = BTreeMap::new();
        for key in &task.delta_file_keys {
            let deltas = self.read_delta_file(key, &mut stats).await?;
            stats.delta_files_compacted += 1;
            for delta in deltas {
                tables
                    .entry(delta.table.clone())
                    .or_default()
                    .entry(delta.row_id.clone())
                    .or_default()
                    .push(delta);
            }
        }

        for (table, rows) in tables {
            let mut live: Vec<(String, lakesync_core::RowState)> = Vec::new();
            let mut latest: Vec<RowDelta> = Vec::new();
            let mut deletes: Vec<EqualityDelete> = Vec::new();

            for (row_id, mut deltas) in rows {
                deltas.sort_by(|a, b| (a.hlc, &a.delta_id).cmp(&(b.hlc, &b.delta_id)));
                let refs: Vec<&RowDelta> = deltas.iter().collect();
                match materialize_row(&refs) {
                    Some(state) => {
                        // The base row keeps the provenance of the newest
                        // write that touched it.
                        let newest = deltas
                            .iter()
                            .rev()
                            .find(|d| d.op != DeltaOp::Delete)
                            .cloned();
                        if let Some(newest) = newest {
                            latest.push(RowDelta::new(
                                DeltaOp::Insert,
                                &table,
                                &row_id,
                                &newest.client_id,
                                newest.hlc,
                                state
                                    .iter()
                                    .map(|(name, value)| {
                                        ColumnDelta::new(name.clone(), value.clone())
                                    })
                                    .collect(),
                            ));
                        }
                        live.push((row_id, state));
                    }
                    None => deletes.push(EqualityDelete::new(&table, &row_id)),
                }
            }

            if !latest.is_empty() {
                let schema = self.schema_for(&table, &live);
                let bytes = write_parquet(&latest, &schema)?;
                let key = format!("{}/base-{}-{}.parquet", task.output_prefix, table, Uuid::new_v4());
                stats.bytes_written += bytes.len() as u64;
                self.store
                    .put_object(&key, Bytes::from(bytes), Some("application/octet-stream"))
                    .await
                    .map_err(|e| SyncError::Flush(e.to_string()))?;
                stats.base_files_written += 1;
                debug!(table = %table, key = %key, rows = latest.len(), "wrote base file");
            }

            if !deletes.is_empty() {
                let bytes = write_equality_deletes(&deletes)?;
                let key = format!(
                    "{}/eq-delete-{}-{}.parquet",
                    task.output_prefix,
                    table,
                    Uuid::new_v4()
                );
                stats.bytes_written += bytes.len() as u64;
                self.store
                    .put_object(&key, Bytes::from(bytes), Some("application/octet-stream"))
                    .await
                    .map_err(|e| SyncError::Flush(e.to_string()))?;
                stats.delete_files_written += 1;
                debug!(table = %table, key = %key, rows = deletes.len(), "wrote equality-delete file");
            }
        }

        info!(
            base = stats.base_files_written,
            deletes = stats.delete_files_written,
            compacted = stats.delta_files_compacted,
            "compaction run complete"
        );

        Ok(MaintenanceReport {
            compaction: stats,
            snapshots_expired: 0,
            orphans_removed: 0,
        })
    }
}
