//! Gateway integration tests: push validation, pull pagination and
//! filtering, flush with catalogue commit, end-to-end LWW convergence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lakesync_core::{
    BucketDef, ColumnDef, ColumnDelta, ColumnType, ColumnValue, DeltaOp, FilterOp, HlcClock,
    HlcTimestamp, RowDelta, RuleFilter, RulesContext, SyncError, SyncRules, TableSchema, WallClock,
    MAX_DRIFT_MS,
};
use lakesync_gateway::{
    FlushFormat, GatewayConfig, MemoryJobQueue, ProcessOutcome, PullRequest, PushRequest,
    SyncGateway,
};
use lakesync_store::{
    read_parquet, Catalog, DatabaseAdapter, MemoryAdapter, MemoryCatalog, MemoryObjectStore,
    ObjectStore,
};

/// Wall clock tests can position freely.
struct ManualClock(AtomicU64);

impl ManualClock {
    fn at(ms: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(ms)))
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn todos_schema() -> TableSchema {
    TableSchema::new(
        "todos",
        vec![ColumnDef::new("title", ColumnType::String)],
    )
}

fn delta_at(client: &str, row: &str, hlc: u64, title: &str) -> RowDelta {
    RowDelta::new(
        DeltaOp::Insert,
        "todos",
        row,
        client,
        HlcTimestamp::encode(hlc, 0),
        vec![ColumnDelta::new("title", ColumnValue::Str(title.into()))],
    )
}

fn push_req(client: &str, deltas: Vec<RowDelta>) -> PushRequest {
    PushRequest {
        client_id: client.into(),
        deltas,
        last_seen_hlc: HlcTimestamp::ZERO,
    }
}

fn pull_req(client: &str, since: HlcTimestamp, max: usize) -> PullRequest {
    PullRequest {
        client_id: client.into(),
        since_hlc: since,
        max_deltas: max,
        rules: None,
    }
}

/// A gateway whose wall clock is pinned near the test's delta times, so
/// the age-based flush trigger stays quiet unless a test wants it.
fn pinned_builder(
    wall_ms: u64,
    config: GatewayConfig,
    store: Arc<MemoryObjectStore>,
) -> lakesync_gateway::GatewayBuilder {
    SyncGateway::builder(config, store).with_clock(Arc::new(HlcClock::new(ManualClock::at(wall_ms))))
}

fn pinned_gateway(
    wall_ms: u64,
    config: GatewayConfig,
    store: Arc<MemoryObjectStore>,
) -> Arc<SyncGateway> {
    pinned_builder(wall_ms, config, store).build()
}

#[tokio::test]
async fn test_push_accepts_and_drift_rejects() {
    let wall = ManualClock::at(1_000_000);
    let gateway = SyncGateway::builder(
        GatewayConfig::new("gw1"),
        Arc::new(MemoryObjectStore::new()),
    )
    .with_clock(Arc::new(HlcClock::new(wall)))
    .build();

    // at the drift bound: accepted
    let ok = gateway
        .push(push_req(
            "c1",
            vec![delta_at("c1", "r1", 1_000_000 + MAX_DRIFT_MS, "a")],
        ))
        .await
        .unwrap();
    assert_eq!(ok.accepted_count, 1);
    assert!(ok.rejected_ids.is_empty());

    // one past the bound: the push fails with ClockDrift
    let drifted = gateway
        .push(push_req(
            "c1",
            vec![delta_at("c1", "r2", 1_000_000 + MAX_DRIFT_MS + 1, "b")],
        ))
        .await;
    assert!(matches!(drifted, Err(SyncError::ClockDrift { .. })));
}

#[tokio::test]
async fn test_push_rejects_client_mismatch_and_unknown_columns() {
    let gateway = pinned_gateway(
        1000,
        GatewayConfig::new("gw1").with_table_schema(todos_schema()),
        Arc::new(MemoryObjectStore::new()),
    );

    let foreign = delta_at("other-client", "r1", 1000, "a");
    let unknown_column = RowDelta::new(
        DeltaOp::Insert,
        "todos",
        "r2",
        "c1",
        HlcTimestamp::encode(1000, 1),
        vec![ColumnDelta::new("nope", ColumnValue::Str("x".into()))],
    );
    let good = delta_at("c1", "r3", 1000, "b");

    let response = gateway
        .push(push_req(
            "c1",
            vec![foreign.clone(), unknown_column.clone(), good],
        ))
        .await
        .unwrap();

    assert_eq!(response.accepted_count, 1);
    assert_eq!(
        response.rejected_ids,
        vec![foreign.delta_id, unknown_column.delta_id]
    );
}

#[tokio::test]
async fn test_push_is_idempotent_on_delta_id() {
    let gateway = pinned_gateway(
        1000,
        GatewayConfig::new("gw1"),
        Arc::new(MemoryObjectStore::new()),
    );
    let d = delta_at("c1", "r1", 1000, "a");

    let first = gateway.push(push_req("c1", vec![d.clone()])).await.unwrap();
    let second = gateway.push(push_req("c1", vec![d])).await.unwrap();
    assert_eq!(first.accepted_count, 1);
    assert_eq!(second.accepted_count, 0);
    assert_eq!(gateway.buffered_deltas().await, 1);
}

#[tokio::test]
async fn test_pull_excludes_own_client_by_default() {
    let gateway = pinned_gateway(
        2000,
        GatewayConfig::new("gw1"),
        Arc::new(MemoryObjectStore::new()),
    );
    gateway
        .push(push_req("c1", vec![delta_at("c1", "r1", 1000, "a")]))
        .await
        .unwrap();
    gateway
        .push(push_req("c2", vec![delta_at("c2", "r2", 2000, "b")]))
        .await
        .unwrap();

    let own = gateway
        .pull_from_buffer(pull_req("c1", HlcTimestamp::ZERO, 10))
        .await
        .unwrap();
    assert_eq!(own.deltas.len(), 1);
    assert_eq!(own.deltas[0].client_id, "c2");

    // configurable off
    let inclusive = pinned_gateway(
        1000,
        GatewayConfig::new("gw2").with_exclude_own_client(false),
        Arc::new(MemoryObjectStore::new()),
    );
    inclusive
        .push(push_req("c1", vec![delta_at("c1", "r1", 1000, "a")]))
        .await
        .unwrap();
    let page = inclusive
        .pull_from_buffer(pull_req("c1", HlcTimestamp::ZERO, 10))
        .await
        .unwrap();
    assert_eq!(page.deltas.len(), 1);
}

#[tokio::test]
async fn test_pull_from_adapter_with_rules_and_pagination() {
    let source = Arc::new(MemoryAdapter::new());
    let mut deltas = Vec::new();
    for i in 1..=10u64 {
        let level = if i % 2 == 0 { "error" } else { "info" };
        deltas.push(RowDelta::new(
            DeltaOp::Insert,
            "logs",
            format!("r{i}"),
            "producer",
            HlcTimestamp::encode(i * 1000, 0),
            vec![ColumnDelta::new("level", ColumnValue::Str(level.into()))],
        ));
    }
    source.insert_deltas(&deltas).await.unwrap();

    let gateway = pinned_builder(
        10_000,
        GatewayConfig::new("gw1"),
        Arc::new(MemoryObjectStore::new()),
    )
    .with_source("bigquery", source)
    .build();

    // unknown source
    let missing = gateway
        .pull_from_adapter("nope", pull_req("c1", HlcTimestamp::ZERO, 10))
        .await;
    assert!(matches!(missing, Err(SyncError::AdapterNotFound(_))));

    // rules: only level=error rows come back
    let rules = RulesContext::new(SyncRules {
        version: 1,
        buckets: vec![BucketDef {
            name: "errors".into(),
            tables: vec!["logs".into()],
            filters: vec![RuleFilter {
                column: "level".into(),
                op: FilterOp::Eq,
                value: serde_json::json!("error"),
            }],
        }],
    });
    let mut req = pull_req("c1", HlcTimestamp::ZERO, 10);
    req.rules = Some(rules);
    let errors = gateway.pull_from_adapter("bigquery", req).await.unwrap();
    assert_eq!(errors.deltas.len(), 5);
    assert!(errors.deltas.iter().all(|d| {
        matches!(&d.columns[0].value, ColumnValue::Str(s) if s == "error")
    }));

    // pagination: 10 deltas, pages of 5
    let first = gateway
        .pull_from_adapter("bigquery", pull_req("c1", HlcTimestamp::ZERO, 5))
        .await
        .unwrap();
    assert_eq!(first.deltas.len(), 5);
    assert!(first.has_more);

    let second = gateway
        .pull_from_adapter("bigquery", pull_req("c1", first.next_cursor, 5))
        .await
        .unwrap();
    assert_eq!(second.deltas.len(), 5);
    assert!(!second.has_more);
    assert_eq!(second.next_cursor, HlcTimestamp::encode(10_000, 0));
}

#[tokio::test]
async fn test_flush_parquet_with_catalog_commit() {
    let store = Arc::new(MemoryObjectStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let gateway = pinned_builder(
        20_000,
        GatewayConfig::new("gw1")
            .with_flush_format(FlushFormat::Parquet)
            .with_table_schema(todos_schema())
            .with_store_prefix("store"),
        store.clone(),
    )
    .with_catalog(catalog.clone())
    .with_job_queue(queue.clone())
    .build();

    let deltas: Vec<RowDelta> = (1..=20u64)
        .map(|i| delta_at("c1", &format!("r{i}"), i * 1000, "t"))
        .collect();
    let response = gateway.push(push_req("c1", deltas)).await.unwrap();
    assert_eq!(response.accepted_count, 20);

    let report = gateway.flush().await.unwrap();
    assert_eq!(report.record_count, 20);
    let key = report.object_key.unwrap();
    assert!(key.starts_with("store/gw1/deltas/"));
    assert!(key.ends_with(".parquet"));

    // exactly one parquet object under the gateway prefix
    let objects = store.list_objects("store/gw1/").await.unwrap();
    assert_eq!(objects.len(), 1);

    // it decodes back to the 20 pushed deltas
    let bytes = store.get_object(&key).await.unwrap();
    let decoded = read_parquet(bytes, Some(&todos_schema())).unwrap();
    assert_eq!(decoded.len(), 20);

    // catalogue protocol: namespace, table, then the append
    let calls = catalog.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| c.starts_with("create_namespace:lakesync"))
            .count(),
        1
    );
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("create_table:todos")).count(),
        1
    );
    assert_eq!(
        calls
            .iter()
            .filter(|c| c.starts_with("append_files:todos:1"))
            .count(),
        1
    );
    let snapshot = catalog
        .current_snapshot(&["lakesync".to_string()], "todos")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.data_files.len(), 1);
    assert_eq!(snapshot.data_files[0].record_count, 20);
    assert_eq!(snapshot.data_files[0].file_format, "PARQUET");

    // a materialise job was parked and queued
    assert_eq!(queue.pending_count(), 1);
    let jobs = store.list_objects("materialise-jobs/gw1/").await.unwrap();
    assert_eq!(jobs.len(), 1);

    // buffer drained; empty flush is a no-op
    assert_eq!(gateway.buffered_deltas().await, 0);
    let empty = gateway.flush().await.unwrap();
    assert!(empty.object_key.is_none());
    assert_eq!(empty.record_count, 0);
}

#[tokio::test]
async fn test_flush_parquet_without_schema_fails_and_restores() {
    let gateway = pinned_gateway(
        1000,
        GatewayConfig::new("gw1").with_flush_format(FlushFormat::Parquet),
        Arc::new(MemoryObjectStore::new()),
    );
    gateway
        .push(push_req("c1", vec![delta_at("c1", "r1", 1000, "a")]))
        .await
        .unwrap();

    assert!(matches!(
        gateway.flush().await,
        Err(SyncError::SchemaRequired(_))
    ));
    // snapshot restored
    assert_eq!(gateway.buffered_deltas().await, 1);
}

#[tokio::test]
async fn test_runtime_schema_registration_enables_parquet_flush() {
    let store = Arc::new(MemoryObjectStore::new());
    let gateway = pinned_gateway(
        1000,
        GatewayConfig::new("gw1").with_flush_format(FlushFormat::Parquet),
        store.clone(),
    );
    gateway.register_schema(todos_schema()).unwrap();

    gateway
        .push(push_req("c1", vec![delta_at("c1", "r1", 1000, "a")]))
        .await
        .unwrap();
    let report = gateway.flush().await.unwrap();
    assert_eq!(report.record_count, 1);
}

#[tokio::test]
async fn test_materialisation_completes_via_claim_check() {
    use async_trait::async_trait;
    use lakesync_gateway::{MaterialiseProcessor, Materialiser};

    struct AdapterMaterialiser(Arc<MemoryAdapter>);

    #[async_trait]
    impl Materialiser for AdapterMaterialiser {
        fn name(&self) -> &str {
            "adapter"
        }

        async fn materialise(
            &self,
            deltas: &[RowDelta],
            _schemas: &[TableSchema],
        ) -> lakesync_core::Result<()> {
            self.0.insert_deltas(deltas).await.map(|_| ())
        }
    }

    let store = Arc::new(MemoryObjectStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let downstream = Arc::new(MemoryAdapter::new());
    let gateway = pinned_builder(
        2000,
        GatewayConfig::new("gw1").with_table_schema(todos_schema()),
        store.clone(),
    )
    .with_job_queue(queue.clone())
    .build();

    // two writes to the same row, then flush + materialise
    gateway
        .push(push_req("c1", vec![delta_at("c1", "r1", 1000, "A")]))
        .await
        .unwrap();
    let update = RowDelta::new(
        DeltaOp::Update,
        "todos",
        "r1",
        "c1",
        HlcTimestamp::encode(2000, 0),
        vec![ColumnDelta::new("title", ColumnValue::Str("B".into()))],
    );
    gateway.push(push_req("c1", vec![update])).await.unwrap();
    gateway.flush().await.unwrap();

    let processor = MaterialiseProcessor::new(
        store,
        queue,
        vec![Arc::new(AdapterMaterialiser(downstream.clone()))],
    );
    assert_eq!(
        processor.process_next().await,
        ProcessOutcome::Done { delta_count: 2 }
    );

    // downstream LWW state is the newest write
    let state = downstream
        .get_latest_state("todos", "r1")
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(&state["title"], ColumnValue::Str(s) if s == "B"));
}

#[tokio::test]
async fn test_concurrent_clients_converge_lww() {
    // Client A inserts, client B (clock offset +1000ms) updates, client A
    // pulls and materialises B's write.
    let gateway = pinned_gateway(
        11_000,
        GatewayConfig::new("gw1"),
        Arc::new(MemoryObjectStore::new()),
    );

    let insert = delta_at("client-a", "r1", 10_000, "A");
    gateway
        .push(push_req("client-a", vec![insert]))
        .await
        .unwrap();

    let update = RowDelta::new(
        DeltaOp::Update,
        "todos",
        "r1",
        "client-b",
        HlcTimestamp::encode(11_000, 0),
        vec![ColumnDelta::new("title", ColumnValue::Str("B".into()))],
    );
    gateway
        .push(push_req("client-b", vec![update]))
        .await
        .unwrap();

    let page = gateway
        .pull_from_buffer(pull_req("client-a", HlcTimestamp::ZERO, 10))
        .await
        .unwrap();
    // A sees only B's delta (own write excluded), applies it locally
    let local = MemoryAdapter::new();
    local.insert_deltas(&page.deltas).await.unwrap();
    // plus its own original write
    local
        .insert_deltas(&[delta_at("client-a", "r1", 10_000, "A")])
        .await
        .unwrap();

    let state = local.get_latest_state("todos", "r1").await.unwrap().unwrap();
    assert!(matches!(&state["title"], ColumnValue::Str(s) if s == "B"));
}

#[tokio::test]
async fn test_flow_registry_lifecycle() {
    use lakesync_gateway::{FlowConfig, FlowDirection, FlowState};

    let gateway = pinned_gateway(
        1000,
        GatewayConfig::new("gw1"),
        Arc::new(MemoryObjectStore::new()),
    );
    let flow = FlowConfig {
        name: "bq-to-lake".into(),
        source: "bigquery".into(),
        store: "s3".into(),
        materialise: vec!["clickhouse".into()],
        direction: FlowDirection::Pull,
    };
    gateway.add_flow(flow.clone()).unwrap();
    assert!(gateway.add_flow(flow).is_err()); // duplicate name

    assert_eq!(gateway.flow_state("bq-to-lake"), Some(FlowState::Idle));
    gateway.start_all_flows();
    assert_eq!(gateway.flow_state("bq-to-lake"), Some(FlowState::Running));
    gateway.stop_all_flows();
    assert_eq!(gateway.flow_state("bq-to-lake"), Some(FlowState::Stopped));
    gateway.start_all_flows();
    assert_eq!(gateway.flow_state("bq-to-lake"), Some(FlowState::Running));
}

#[tokio::test]
async fn test_strong_mode_surfaces_backing_failures() {
    use async_trait::async_trait;
    use lakesync_core::{RowState, Result};
    use lakesync_gateway::ConsistencyMode;

    struct BrokenAdapter;

    #[async_trait]
    impl DatabaseAdapter for BrokenAdapter {
        async fn insert_deltas(&self, _: &[RowDelta]) -> Result<usize> {
            Err(SyncError::Adapter("disk on fire".into()))
        }
        async fn query_deltas_since(
            &self,
            _: HlcTimestamp,
            _: Option<&[String]>,
        ) -> Result<Vec<RowDelta>> {
            Ok(vec![])
        }
        async fn get_latest_state(&self, _: &str, _: &str) -> Result<Option<RowState>> {
            Ok(None)
        }
        async fn ensure_schema(&self, _: &TableSchema) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    // strong: surfaced
    let strong = pinned_builder(
        1000,
        GatewayConfig::new("gw1").with_consistency_mode(ConsistencyMode::Strong),
        Arc::new(MemoryObjectStore::new()),
    )
    .with_backing_store(Arc::new(BrokenAdapter))
    .build();
    let result = strong
        .push(push_req("c1", vec![delta_at("c1", "r1", 1000, "a")]))
        .await;
    assert!(matches!(result, Err(SyncError::SharedWriteFailed(_))));

    // eventual: push proceeds
    let eventual = pinned_builder(
        1000,
        GatewayConfig::new("gw2"),
        Arc::new(MemoryObjectStore::new()),
    )
    .with_backing_store(Arc::new(BrokenAdapter))
    .build();
    let response = eventual
        .push(push_req("c1", vec![delta_at("c1", "r1", 1000, "a")]))
        .await
        .unwrap();
    assert_eq!(response.accepted_count, 1);
}

#[tokio::test]
async fn test_backpressure_flush_and_retry() {
    let store = Arc::new(MemoryObjectStore::new());
    let probe = delta_at("c1", "r1", 1000, "a");
    // room for roughly one delta
    let gateway = pinned_gateway(
        2000,
        GatewayConfig::new("gw1").with_max_buffer_bytes(probe.encoded_size() + 1),
        store.clone(),
    );

    gateway.push(push_req("c1", vec![probe])).await.unwrap();
    // second delta trips the byte bound: a synchronous flush makes room
    let response = gateway
        .push(push_req("c1", vec![delta_at("c1", "r2", 2000, "b")]))
        .await
        .unwrap();
    assert_eq!(response.accepted_count, 1);

    // the first delta went to object storage
    let objects = store.list_objects("lakesync/gw1/").await.unwrap();
    assert_eq!(objects.len(), 1);
}

#[tokio::test]
async fn test_backpressure_reject_mode() {
    use lakesync_gateway::BackpressureMode;

    let probe = delta_at("c1", "r1", 1000, "a");
    let gateway = pinned_gateway(
        2000,
        GatewayConfig::new("gw1")
            .with_max_buffer_bytes(probe.encoded_size() + 1)
            .with_backpressure(BackpressureMode::Reject),
        Arc::new(MemoryObjectStore::new()),
    );
    gateway.push(push_req("c1", vec![probe])).await.unwrap();
    let result = gateway
        .push(push_req("c1", vec![delta_at("c1", "r2", 2000, "b")]))
        .await;
    assert!(matches!(result, Err(SyncError::BufferFull { .. })));
}
