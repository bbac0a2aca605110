//! The sync gateway: the push/pull/flush state machine coordinating the
//! buffer, adapters, object storage, catalogue, and the materialisation
//! queue.
//!
//! Push, pull, and flush are serialized with respect to buffer state:
//! flush takes an exclusive snapshot, pull reads a stable snapshot at
//! entry, and a push may append concurrently with a pull without the
//! pull observing it. Flush is not cancellable mid-commit: it either
//! completes the upload (plus catalogue commit), or rolls the snapshot
//! back into the buffer.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lakesync_core::{
    HlcClock, HlcTimestamp, Result, RowDelta, RulesContext, SyncError, TableSchema,
};
use lakesync_store::{
    iceberg_schema_for, Catalog, DataFile, DatabaseAdapter, FlushManifest, ObjectStore,
};

use crate::buffer::SharedBuffer;
use crate::config::{BackpressureMode, FlushFormat, GatewayConfig};
use crate::flow::{validate_flow, FlowConfig, FlowEntry, FlowState};
use crate::flush_queue::{FlushPublisher, JobQueue};

/// Catalogue namespace all gateway tables live under.
pub const CATALOG_NAMESPACE: &str = "lakesync";

/// One client push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub client_id: String,
    pub deltas: Vec<RowDelta>,
    pub last_seen_hlc: HlcTimestamp,
}

/// Outcome of a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub accepted_count: usize,
    pub rejected_ids: Vec<String>,
    pub server_hlc: HlcTimestamp,
}

/// One client pull.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub client_id: String,
    pub since_hlc: HlcTimestamp,
    pub max_deltas: usize,
    pub rules: Option<RulesContext>,
}

/// One page of pulled deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub deltas: Vec<RowDelta>,
    pub next_cursor: HlcTimestamp,
    pub has_more: bool,
}

/// Outcome of a flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub object_key: Option<String>,
    pub record_count: usize,
}

/// Builder for a [`SyncGateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    object_store: Arc<dyn ObjectStore>,
    catalog: Option<Arc<dyn Catalog>>,
    backing: Option<Arc<dyn DatabaseAdapter>>,
    queue: Option<Arc<dyn JobQueue>>,
    clock: Option<Arc<HlcClock>>,
    sources: Vec<(String, Arc<dyn DatabaseAdapter>)>,
}

impl GatewayBuilder {
    /// Durable backing store for the shared buffer's write-through path.
    pub fn with_backing_store(mut self, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        self.backing = Some(adapter);
        self
    }

    /// Enable catalogue commits after flush.
    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Enable materialisation-job publishing after flush.
    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Register a named pull source.
    pub fn with_source(mut self, name: impl Into<String>, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        self.sources.push((name.into(), adapter));
        self
    }

    /// Inject the HLC clock (tests drive a manual wall clock through it).
    pub fn with_clock(mut self, clock: Arc<HlcClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Arc<SyncGateway> {
        let hlc = self.clock.unwrap_or_else(|| Arc::new(HlcClock::system()));
        let buffer = SharedBuffer::new(
            self.config.max_buffer_bytes,
            self.config.max_buffer_age_ms,
            self.backing,
            self.config.consistency_mode,
        );
        let publisher = self.queue.map(|queue| {
            FlushPublisher::new(
                Arc::clone(&self.object_store),
                queue,
                self.config.gateway_id.clone(),
            )
        });
        let sources = DashMap::new();
        for (name, adapter) in self.sources {
            sources.insert(name, adapter);
        }

        let table_schema = RwLock::new(self.config.table_schema.clone());
        Arc::new_cyclic(|weak| SyncGateway {
            self_ref: weak.clone(),
            config: self.config,
            table_schema,
            hlc,
            buffer,
            object_store: self.object_store,
            catalog: self.catalog,
            publisher,
            sources,
            flows: DashMap::new(),
            flush_lock: Mutex::new(()),
        })
    }
}

/// The gateway. Shared across tasks as `Arc<SyncGateway>`.
pub struct SyncGateway {
    self_ref: Weak<SyncGateway>,
    config: GatewayConfig,
    // The one piece of config mutable after build: the admin surface
    // registers schemas at runtime.
    table_schema: RwLock<Option<TableSchema>>,
    hlc: Arc<HlcClock>,
    buffer: SharedBuffer,
    object_store: Arc<dyn ObjectStore>,
    catalog: Option<Arc<dyn Catalog>>,
    publisher: Option<FlushPublisher>,
    sources: DashMap<String, Arc<dyn DatabaseAdapter>>,
    flows: DashMap<String, FlowEntry>,
    flush_lock: Mutex<()>,
}

impl SyncGateway {
    pub fn builder(config: GatewayConfig, object_store: Arc<dyn ObjectStore>) -> GatewayBuilder {
        GatewayBuilder {
            config,
            object_store,
            catalog: None,
            backing: None,
            queue: None,
            clock: None,
            sources: Vec::new(),
        }
    }

    pub fn new(config: GatewayConfig, object_store: Arc<dyn ObjectStore>) -> Arc<SyncGateway> {
        Self::builder(config, object_store).build()
    }

    pub fn gateway_id(&self) -> &str {
        &self.config.gateway_id
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Register or evolve the gateway's table schema. Evolution is
    /// append-only: an existing schema for the same table is merged, a
    /// different table replaces it, a type change is a mismatch.
    pub fn register_schema(&self, schema: TableSchema) -> Result<()> {
        let mut current = self.table_schema.write();
        match current.as_mut() {
            Some(existing) if existing.table == schema.table => existing.merge(&schema)?,
            _ => {
                info!(table = %schema.table, "registered table schema");
                *current = Some(schema);
            }
        }
        Ok(())
    }

    /// Snapshot of the registered schema.
    pub fn table_schema(&self) -> Option<TableSchema> {
        self.table_schema.read().clone()
    }

    // ─── Push ───

    /// Ingest a batch of deltas from one client.
    pub async fn push(&self, request: PushRequest) -> Result<PushResponse> {
        let mut rejected_ids = Vec::new();
        let mut valid = Vec::new();
        let schema_snapshot = self.table_schema();

        'deltas: for delta in request.deltas {
            // Advance the local clock; drift violations reject the push.
            self.hlc.recv(delta.hlc)?;

            if delta.client_id != request.client_id {
                debug!(
                    delta_id = %delta.delta_id,
                    frame_client = %request.client_id,
                    delta_client = %delta.client_id,
                    "client id mismatch"
                );
                rejected_ids.push(delta.delta_id);
                continue;
            }

            if let Some(schema) = &schema_snapshot {
                if delta.table == schema.table {
                    for cell in &delta.columns {
                        if !schema.has_column(&cell.column) {
                            debug!(
                                delta_id = %delta.delta_id,
                                column = %cell.column,
                                "column not in schema"
                            );
                            rejected_ids.push(delta.delta_id);
                            continue 'deltas;
                        }
                    }
                }
            }

            valid.push(delta);
        }

        // Durable write-through before buffer admission.
        self.buffer.write_through(&valid).await?;

        let mut accepted_count = 0;
        for delta in &valid {
            match self.buffer.insert(delta).await {
                Ok(true) => accepted_count += 1,
                Ok(false) => {} // duplicate delta id, dropped
                Err(SyncError::BufferFull { .. })
                    if self.config.backpressure == BackpressureMode::FlushAndRetry =>
                {
                    self.flush().await?;
                    if self.buffer.insert(delta).await? {
                        accepted_count += 1;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if self.buffer.flush_due(self.hlc.wall_now_ms()).await {
            self.schedule_flush();
        }

        Ok(PushResponse {
            accepted_count,
            rejected_ids,
            server_hlc: self.hlc.last(),
        })
    }

    // ─── Pull ───

    /// Page deltas out of the in-memory buffer.
    pub async fn pull_from_buffer(&self, request: PullRequest) -> Result<PullResponse> {
        let exclude = self
            .config
            .exclude_own_client
            .then_some(request.client_id.as_str());
        let page = self
            .buffer
            .page(
                request.since_hlc,
                request.max_deltas,
                exclude,
                request.rules.as_ref(),
            )
            .await;

        let next_cursor = page
            .deltas
            .last()
            .map(|d| d.hlc)
            .unwrap_or(request.since_hlc);
        Ok(PullResponse {
            deltas: page.deltas,
            next_cursor,
            has_more: page.has_more,
        })
    }

    /// Page deltas out of a named source adapter.
    pub async fn pull_from_adapter(
        &self,
        source_name: &str,
        request: PullRequest,
    ) -> Result<PullResponse> {
        let adapter = self
            .sources
            .get(source_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SyncError::AdapterNotFound(source_name.to_string()))?;

        let deltas = self
            .with_timeout("query_deltas_since", async {
                adapter.query_deltas_since(request.since_hlc, None).await
            })
            .await?;

        let exclude = self
            .config
            .exclude_own_client
            .then_some(request.client_id.as_str());

        let mut page = Vec::new();
        let mut has_more = false;
        for delta in deltas.into_iter().filter(|d| {
            exclude.map_or(true, |c| d.client_id != c)
                && request.rules.as_ref().map_or(true, |r| r.matches(d))
        }) {
            if page.len() == request.max_deltas {
                has_more = true;
                break;
            }
            page.push(delta);
        }

        let next_cursor = page.last().map(|d| d.hlc).unwrap_or(request.since_hlc);
        Ok(PullResponse {
            deltas: page,
            next_cursor,
            has_more,
        })
    }

    // ─── Flush ───

    /// Drain the buffer to object storage, commit to the catalogue when
    /// configured, and publish a materialisation job.
    pub async fn flush(&self) -> Result<FlushReport> {
        let _commit = self.flush_lock.lock().await;

        let snapshot = self.buffer.drain().await;
        if snapshot.is_empty() {
            return Ok(FlushReport {
                object_key: None,
                record_count: 0,
            });
        }
        let record_count = snapshot.len();

        let encoded = match self.encode_snapshot(&snapshot) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.buffer.reinsert(snapshot).await;
                return Err(e);
            }
        };

        let hlc_min = snapshot.first().map(|d| d.hlc.as_u64()).unwrap_or(0);
        let hlc_max = snapshot.last().map(|d| d.hlc.as_u64()).unwrap_or(0);
        let key = format!(
            "{}/{}/deltas/{}-{}-{}.{}",
            self.config.store_prefix,
            self.config.gateway_id,
            hlc_min,
            hlc_max,
            Uuid::new_v4(),
            self.config.flush_format.extension(),
        );
        let file_size = encoded.len() as u64;

        if let Err(e) = self
            .object_store
            .put_object(&key, Bytes::from(encoded), Some(self.content_type()))
            .await
        {
            warn!(key = %key, error = %e, "flush upload failed, snapshot restored");
            self.buffer.reinsert(snapshot).await;
            return Err(SyncError::Flush(e.to_string()));
        }

        info!(key = %key, record_count, "flushed buffer snapshot");

        // The object is durable from here on. Catalogue and queue
        // failures surface without rolling it back.
        if self.catalog.is_some() {
            self.commit_to_catalog(&key, record_count as u64, file_size)
                .await?;
        }

        if let Some(publisher) = &self.publisher {
            let manifest = FlushManifest::new(snapshot, self.schemas());
            publisher.publish(&manifest).await?;
        }

        Ok(FlushReport {
            object_key: Some(key),
            record_count,
        })
    }

    fn encode_snapshot(&self, snapshot: &[RowDelta]) -> Result<Vec<u8>> {
        match self.config.flush_format {
            FlushFormat::Json => {
                FlushManifest::new(snapshot.to_vec(), self.schemas()).to_json_bytes()
            }
            FlushFormat::Parquet => {
                let schema = self.table_schema().ok_or_else(|| {
                    SyncError::SchemaRequired("parquet flush needs a table schema".into())
                })?;
                lakesync_store::write_parquet(snapshot, &schema)
            }
        }
    }

    fn content_type(&self) -> &'static str {
        match self.config.flush_format {
            FlushFormat::Json => "application/json",
            FlushFormat::Parquet => "application/octet-stream",
        }
    }

    fn schemas(&self) -> Vec<TableSchema> {
        self.table_schema().into_iter().collect()
    }

    async fn commit_to_catalog(
        &self,
        object_key: &str,
        record_count: u64,
        file_size_bytes: u64,
    ) -> Result<()> {
        let Some(catalog) = &self.catalog else {
            return Ok(());
        };
        let schema = self.table_schema().ok_or_else(|| {
            SyncError::SchemaRequired("catalogue commit needs a table schema".into())
        })?;

        let namespace = vec![CATALOG_NAMESPACE.to_string()];

        let namespaces = self
            .with_timeout("list_namespaces", catalog.list_namespaces())
            .await
            .map_err(catalog_err)?;
        if !namespaces.contains(&namespace) {
            self.with_timeout("create_namespace", catalog.create_namespace(&namespace))
                .await
                .map_err(catalog_err)?;
        }

        let table = self
            .with_timeout("load_table", catalog.load_table(&namespace, &schema.table))
            .await
            .map_err(catalog_err)?;
        if table.is_none() {
            self.with_timeout(
                "create_table",
                catalog.create_table(&namespace, &schema.table, iceberg_schema_for(&schema)),
            )
            .await
            .map_err(catalog_err)?;
        }

        let data_file = DataFile {
            path: object_key.to_string(),
            file_format: match self.config.flush_format {
                FlushFormat::Json => "JSON".to_string(),
                FlushFormat::Parquet => "PARQUET".to_string(),
            },
            record_count,
            file_size_bytes,
        };
        self.with_timeout(
            "append_files",
            catalog.append_files(&namespace, &schema.table, vec![data_file]),
        )
        .await
        .map_err(catalog_err)?;

        debug!(table = %schema.table, object_key, "catalogue commit complete");
        Ok(())
    }

    /// Fire a background flush; errors are logged, the failed snapshot is
    /// restored by `flush` itself.
    fn schedule_flush(&self) {
        let Some(gateway) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = gateway.flush().await {
                warn!(error = %e, "scheduled flush failed");
            }
        });
    }

    async fn with_timeout<T>(
        &self,
        op: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                op: op.to_string(),
                ms: self.config.op_timeout.as_millis() as u64,
            }),
        }
    }

    // ─── Flows ───

    /// Register a flow. Names are unique; source and store must be
    /// non-empty.
    pub fn add_flow(&self, config: FlowConfig) -> Result<()> {
        validate_flow(&config)?;
        if self.flows.contains_key(&config.name) {
            return Err(SyncError::Config(format!(
                "flow '{}' is already registered",
                config.name
            )));
        }
        info!(flow = %config.name, "registered flow");
        self.flows
            .insert(config.name.clone(), FlowEntry::new(config));
        Ok(())
    }

    /// Start every flow. Idempotent per flow; failed flows are skipped
    /// with a warning.
    pub fn start_all_flows(&self) {
        for mut entry in self.flows.iter_mut() {
            if let Err(e) = entry.value_mut().start() {
                warn!(flow = %entry.key(), error = %e, "flow not started");
            }
        }
    }

    /// Stop every running flow. Idempotent per flow.
    pub fn stop_all_flows(&self) {
        for mut entry in self.flows.iter_mut() {
            entry.value_mut().stop();
        }
    }

    pub fn flow_state(&self, name: &str) -> Option<FlowState> {
        self.flows.get(name).map(|entry| entry.state)
    }

    // ─── Introspection ───

    pub async fn buffered_deltas(&self) -> usize {
        self.buffer.len().await
    }

    pub async fn buffered_bytes(&self) -> usize {
        self.buffer.byte_size().await
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn server_hlc(&self) -> HlcTimestamp {
        self.hlc.last()
    }
}

fn catalog_err(e: SyncError) -> SyncError {
    match e {
        e @ (SyncError::Timeout { .. } | SyncError::Catalog(_)) => e,
        other => SyncError::Catalog(other.to_string()),
    }
}
