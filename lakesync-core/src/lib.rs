//! # LakeSync Core
//!
//! Core types for the LakeSync sync gateway and delta storage engine:
//! the hybrid logical clock, row-level deltas with content-addressed
//! identity, delta extraction, table schemas, sync rules, and wire
//! frames.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               lakesync-core                 │
//! ├──────────┬──────────┬───────────┬───────────┤
//! │ HlcClock │ RowDelta │ TableSchema│ SyncRules│
//! │ (causal  │ (content-│ (append-  │ (bucket   │
//! │  order)  │  hashed) │  only)    │  filters) │
//! ├──────────┴──────────┴───────────┴───────────┤
//! │       SyncError / Result (typed errors)     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every fallible operation returns `Result<T, SyncError>`.

pub mod delta;
pub mod error;
pub mod extract;
pub mod frame;
pub mod hlc;
pub mod rules;
pub mod schema;
pub mod value;

// Re-exports for convenience
pub use delta::{ColumnDelta, DeltaOp, RowDelta};
pub use error::{Result, SyncError};
pub use extract::{extract, ExtractContext, RowState};
pub use frame::SyncFrame;
pub use hlc::{HlcClock, HlcTimestamp, SystemClock, WallClock, MAX_COUNTER, MAX_DRIFT_MS};
pub use rules::{BucketDef, FilterOp, RuleFilter, RulesContext, SyncRules};
pub use schema::{ColumnDef, ColumnType, TableSchema};
pub use value::ColumnValue;
