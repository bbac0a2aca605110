//! Error types for LakeSync.
//!
//! All fallible operations return `Result<T, SyncError>`.
//! No panics, no unwraps in production code paths.

use thiserror::Error;

/// Unified error type for all sync-gateway operations
#[derive(Error, Debug)]
pub enum SyncError {
    // ─── Clock Errors ───

    #[error("clock drift: remote wall {remote_ms}ms exceeds local wall {local_ms}ms beyond the drift bound")]
    ClockDrift { remote_ms: u64, local_ms: u64 },

    // ─── Schema Errors ───

    #[error("schema mismatch: column '{column}' is not in the schema for table '{table}'")]
    SchemaMismatch { table: String, column: String },

    #[error("schema required: {0}")]
    SchemaRequired(String),

    // ─── Buffer Errors ───

    #[error("buffer full: {bytes} bytes buffered, max {max_bytes}")]
    BufferFull { bytes: usize, max_bytes: usize },

    #[error("shared buffer write failed: {0}")]
    SharedWriteFailed(String),

    // ─── Adapter Errors ───

    #[error("source adapter not found: {0}")]
    AdapterNotFound(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    // ─── Flush / Catalogue Errors ───

    #[error("flush failed: {0}")]
    Flush(String),

    #[error("catalogue commit failed: {0}")]
    Catalog(String),

    #[error("flush queue publish failed: {0}")]
    FlushQueue(String),

    // ─── Scheduler Errors ───

    #[error("scheduler is disabled by configuration")]
    SchedulerDisabled,

    #[error("scheduler is already running")]
    SchedulerAlreadyRunning,

    #[error("scheduler is not running")]
    SchedulerNotRunning,

    #[error("scheduler busy: a maintenance run is in flight")]
    SchedulerBusy,

    #[error("maintenance task provider failed: {0}")]
    SchedulerTaskProvider(String),

    // ─── Auth Errors ───

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: required role '{required}'")]
    Forbidden { required: String },

    // ─── Infrastructure Errors ───

    #[error("deadline exceeded after {ms}ms during {op}")]
    Timeout { op: String, ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
