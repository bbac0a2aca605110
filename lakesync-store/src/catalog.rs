//! Iceberg-style catalogue: table metadata and snapshot lineage for the
//! columnar files the gateway flushes.
//!
//! The gateway is a caller, never a mutator beyond commit. `append_files`
//! is idempotent on file path, so a commit retried after a
//! `CatalogueError` cannot double-count a data file.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::info;

use lakesync_core::{ColumnType, Result, SyncError, TableSchema};

/// A committed data file reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataFile {
    pub path: String,
    pub file_format: String,
    pub record_count: u64,
    pub file_size_bytes: u64,
}

/// One field of an Iceberg table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcebergField {
    pub id: u32,
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Iceberg table schema: the system fields followed by the user columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcebergSchema {
    #[serde(rename = "schema-id")]
    pub schema_id: u32,
    pub fields: Vec<IcebergField>,
}

/// A snapshot produced by an `append_files` commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    pub snapshot_id: i64,
    pub timestamp_ms: i64,
    pub data_files: Vec<DataFile>,
}

/// Metadata of a catalogued table.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub namespace: Vec<String>,
    pub name: String,
    pub schema: IcebergSchema,
    pub current_snapshot_id: Option<i64>,
}

/// Catalogue RPC surface.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn create_namespace(&self, namespace: &[String]) -> Result<()>;

    async fn create_table(
        &self,
        namespace: &[String],
        name: &str,
        schema: IcebergSchema,
    ) -> Result<()>;

    /// Load table metadata, `None` when the table does not exist.
    async fn load_table(&self, namespace: &[String], name: &str)
        -> Result<Option<TableMetadata>>;

    /// Commit appended data files as a new snapshot. Files whose path is
    /// already tracked are skipped (idempotent retry).
    async fn append_files(
        &self,
        namespace: &[String],
        name: &str,
        data_files: Vec<DataFile>,
    ) -> Result<Snapshot>;

    async fn current_snapshot(&self, namespace: &[String], name: &str)
        -> Result<Option<Snapshot>>;

    async fn list_namespaces(&self) -> Result<Vec<Vec<String>>>;
}

/// Derive the Iceberg schema of a flush table: system fields first, then
/// user columns in table-schema order.
pub fn iceberg_schema_for(schema: &TableSchema) -> IcebergSchema {
    let mut fields = vec![
        ("op", "string"),
        ("table", "string"),
        ("row_id", "string"),
        ("client_id", "string"),
        ("hlc", "long"),
        ("delta_id", "string"),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (name, field_type))| IcebergField {
        id: i as u32 + 1,
        name: name.to_string(),
        required: true,
        field_type: field_type.to_string(),
    })
    .collect::<Vec<_>>();

    for column in &schema.columns {
        let field_type = match column.column_type {
            ColumnType::Number => "double",
            ColumnType::Boolean => "boolean",
            // Json and Null ride as strings, like the Parquet layer.
            _ => "string",
        };
        fields.push(IcebergField {
            id: fields.len() as u32 + 1,
            name: column.name.clone(),
            required: false,
            field_type: field_type.to_string(),
        });
    }

    IcebergSchema {
        schema_id: 0,
        fields,
    }
}

// ─── In-memory catalogue ───

#[derive(Default)]
struct TableState {
    schema: IcebergSchema,
    snapshots: Vec<Snapshot>,
    tracked_paths: HashSet<String>,
}

#[derive(Default)]
struct CatalogState {
    namespaces: HashMap<Vec<String>, HashMap<String, TableState>>,
    next_snapshot_id: i64,
}

/// In-process catalogue, reentrant-safe per `(namespace, table)`. Also
/// records its call log so tests can assert commit protocols.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
    calls: Mutex<Vec<String>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Method names invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn create_namespace(&self, namespace: &[String]) -> Result<()> {
        self.record(format!("create_namespace:{}", namespace.join(".")));
        let mut state = self.state.write();
        state.namespaces.entry(namespace.to_vec()).or_default();
        info!(namespace = %namespace.join("."), "created namespace");
        Ok(())
    }

    async fn create_table(
        &self,
        namespace: &[String],
        name: &str,
        schema: IcebergSchema,
    ) -> Result<()> {
        self.record(format!("create_table:{name}"));
        let mut state = self.state.write();
        let tables = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| SyncError::Catalog(format!("namespace not found: {namespace:?}")))?;
        tables.entry(name.to_string()).or_insert_with(|| TableState {
            schema,
            ..Default::default()
        });
        info!(table = name, "created table");
        Ok(())
    }

    async fn load_table(
        &self,
        namespace: &[String],
        name: &str,
    ) -> Result<Option<TableMetadata>> {
        self.record(format!("load_table:{name}"));
        let state = self.state.read();
        Ok(state
            .namespaces
            .get(namespace)
            .and_then(|tables| tables.get(name))
            .map(|table| TableMetadata {
                namespace: namespace.to_vec(),
                name: name.to_string(),
                schema: table.schema.clone(),
                current_snapshot_id: table.snapshots.last().map(|s| s.snapshot_id),
            }))
    }

    async fn append_files(
        &self,
        namespace: &[String],
        name: &str,
        data_files: Vec<DataFile>,
    ) -> Result<Snapshot> {
        self.record(format!("append_files:{name}:{}", data_files.len()));
        let mut state = self.state.write();
        state.next_snapshot_id += 1;
        let snapshot_id = state.next_snapshot_id;
        let table = state
            .namespaces
            .get_mut(namespace)
            .and_then(|tables| tables.get_mut(name))
            .ok_or_else(|| SyncError::Catalog(format!("table not found: {name}")))?;

        let fresh: Vec<DataFile> = data_files
            .into_iter()
            .filter(|f| table.tracked_paths.insert(f.path.clone()))
            .collect();

        let snapshot = Snapshot {
            snapshot_id,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            data_files: fresh,
        };
        table.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn current_snapshot(
        &self,
        namespace: &[String],
        name: &str,
    ) -> Result<Option<Snapshot>> {
        self.record(format!("current_snapshot:{name}"));
        let state = self.state.read();
        Ok(state
            .namespaces
            .get(namespace)
            .and_then(|tables| tables.get(name))
            .and_then(|table| table.snapshots.last().cloned()))
    }

    async fn list_namespaces(&self) -> Result<Vec<Vec<String>>> {
        self.record("list_namespaces");
        let state = self.state.read();
        let mut namespaces: Vec<Vec<String>> = state.namespaces.keys().cloned().collect();
        namespaces.sort();
        Ok(namespaces)
    }
}
