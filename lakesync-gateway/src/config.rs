//! Configuration for a sync gateway.

use std::time::Duration;

use lakesync_core::TableSchema;

/// On-disk encoding of a flushed buffer snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushFormat {
    Json,
    Parquet,
}

impl FlushFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FlushFormat::Json => "json",
            FlushFormat::Parquet => "parquet",
        }
    }
}

/// Write-through semantics of the shared buffer's backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyMode {
    /// Backing-store failures are logged; durability is recovered by the
    /// next flush.
    Eventual,
    /// Backing-store failures surface as `SharedWriteFailed`.
    Strong,
}

/// What a push does when the buffer is at its byte bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureMode {
    /// Synchronously flush, then retry the insert once.
    FlushAndRetry,
    /// Fail the push with `BufferFull`.
    Reject,
}

/// Gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Identity of the logical gateway.
    pub gateway_id: String,

    /// Flush trigger by buffered byte size.
    pub max_buffer_bytes: usize,

    /// Flush trigger by age of the oldest buffered delta.
    pub max_buffer_age_ms: u64,

    /// Encoding of flushed snapshots.
    pub flush_format: FlushFormat,

    /// Required for Parquet flushes and catalogue commits.
    pub table_schema: Option<TableSchema>,

    /// Object-key prefix for flushed snapshots.
    pub store_prefix: String,

    /// Shared-buffer write-through semantics.
    pub consistency_mode: ConsistencyMode,

    /// Behaviour at the buffer byte bound.
    pub backpressure: BackpressureMode,

    /// Whether pulls exclude deltas authored by the requesting client.
    pub exclude_own_client: bool,

    /// Deadline applied to adapter and catalogue calls.
    pub op_timeout: Duration,
}

impl GatewayConfig {
    /// Create config with sensible defaults
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            max_buffer_bytes: 4 * 1024 * 1024,
            max_buffer_age_ms: 30_000,
            flush_format: FlushFormat::Json,
            table_schema: None,
            store_prefix: "lakesync".to_string(),
            consistency_mode: ConsistencyMode::Eventual,
            backpressure: BackpressureMode::FlushAndRetry,
            exclude_own_client: true,
            op_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    pub fn with_max_buffer_age_ms(mut self, ms: u64) -> Self {
        self.max_buffer_age_ms = ms;
        self
    }

    pub fn with_flush_format(mut self, format: FlushFormat) -> Self {
        self.flush_format = format;
        self
    }

    pub fn with_table_schema(mut self, schema: TableSchema) -> Self {
        self.table_schema = Some(schema);
        self
    }

    pub fn with_store_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.store_prefix = prefix.into();
        self
    }

    pub fn with_consistency_mode(mut self, mode: ConsistencyMode) -> Self {
        self.consistency_mode = mode;
        self
    }

    pub fn with_backpressure(mut self, mode: BackpressureMode) -> Self {
        self.backpressure = mode;
        self
    }

    pub fn with_exclude_own_client(mut self, exclude: bool) -> Self {
        self.exclude_own_client = exclude;
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }
}
