//! # LakeSync Gateway
//!
//! The sync gateway and delta storage engine: ingests row-level change
//! deltas from many clients, orders them under a hybrid logical clock,
//! buffers and de-duplicates them, flushes them to columnar object
//! storage with an Iceberg-style catalogue, and serves paginated pulls.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 SyncGateway                    │
//! │   push ─► HLC recv ─► SharedBuffer ─► flush    │
//! │   pull ◄─ buffer page / source adapters        │
//! ├──────────────┬───────────────┬─────────────────┤
//! │ SharedBuffer │ FlushPublisher│ Compaction      │
//! │ (size/age    │ + Materialise │ Scheduler       │
//! │  bounded)    │ Processor     │ (skip-if-busy)  │
//! ├──────────────┴───────────────┴─────────────────┤
//! │   ObjectStore  ·  Catalog  ·  DatabaseAdapter  │
//! └────────────────────────────────────────────────┘
//! ```

pub mod buffer;
pub mod compaction;
pub mod config;
pub mod flow;
pub mod flush_queue;
pub mod gateway;
pub mod scheduler;

// Re-exports for convenience
pub use buffer::{BufferPage, SharedBuffer};
pub use compaction::{
    CompactionRunner, CompactionStats, MaintenanceReport, MaintenanceRunner, MaintenanceTask,
    MaintenanceTaskProvider,
};
pub use config::{BackpressureMode, ConsistencyMode, FlushFormat, GatewayConfig};
pub use flow::{FlowConfig, FlowDirection, FlowEntry, FlowState};
pub use flush_queue::{
    FlushPublisher, JobQueue, MaterialiseFailure, MaterialiseJob, MaterialiseProcessor,
    Materialiser, MemoryJobQueue, ProcessOutcome,
};
pub use gateway::{
    FlushReport, GatewayBuilder, PullRequest, PullResponse, PushRequest, PushResponse,
    SyncGateway, CATALOG_NAMESPACE,
};
pub use scheduler::{CompactionScheduler, SchedulerConfig};
