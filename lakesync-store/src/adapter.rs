//! Database adapters: per-engine persistent delta stores.
//!
//! An adapter owns its connection pool and exposes idempotent insert,
//! since-HLC queries, and last-writer-wins state materialisation. The
//! gateway talks to adapters only through this trait.

use async_trait::async_trait;

use lakesync_core::{HlcTimestamp, Result, RowDelta, RowState, TableSchema};

/// Per-engine persistent store of deltas.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Insert deltas, ignoring any whose `delta_id` is already stored.
    /// Returns the number actually inserted.
    async fn insert_deltas(&self, deltas: &[RowDelta]) -> Result<usize>;

    /// Deltas with HLC strictly greater than `since`, ascending by HLC
    /// (ties broken by `delta_id` byte order), optionally restricted to
    /// the given tables.
    async fn query_deltas_since(
        &self,
        since: HlcTimestamp,
        tables: Option<&[String]>,
    ) -> Result<Vec<RowDelta>>;

    /// Materialise the current state of a row under LWW column
    /// semantics: for each column, the value written at the highest HLC
    /// wins; a DELETE newer than every INSERT/UPDATE yields `None`.
    async fn get_latest_state(&self, table: &str, row_id: &str) -> Result<Option<RowState>>;

    /// Create delta and user tables if missing. Idempotent.
    async fn ensure_schema(&self, schema: &TableSchema) -> Result<()>;

    /// Release the adapter's resources.
    async fn close(&self) -> Result<()>;
}

/// Materialise a row from an HLC-ascending delta slice. Shared by
/// adapter implementations and the compaction runner.
pub fn materialize_row(deltas: &[&RowDelta]) -> Option<RowState> {
    use lakesync_core::DeltaOp;

    let mut state = RowState::new();
    let mut column_hlc: std::collections::BTreeMap<String, HlcTimestamp> = Default::default();
    let mut deleted_at: Option<HlcTimestamp> = None;
    let mut written_at: Option<HlcTimestamp> = None;

    for delta in deltas {
        match delta.op {
            DeltaOp::Delete => {
                if deleted_at.map_or(true, |at| delta.hlc > at) {
                    deleted_at = Some(delta.hlc);
                }
            }
            DeltaOp::Insert | DeltaOp::Update => {
                if written_at.map_or(true, |at| delta.hlc > at) {
                    written_at = Some(delta.hlc);
                }
                for cell in &delta.columns {
                    let newer = column_hlc
                        .get(&cell.column)
                        .map_or(true, |at| delta.hlc > *at);
                    if newer {
                        column_hlc.insert(cell.column.clone(), delta.hlc);
                        state.insert(cell.column.clone(), cell.value.clone());
                    }
                }
            }
        }
    }

    match (written_at, deleted_at) {
        (None, _) => None,
        (Some(written), Some(deleted)) if deleted > written => None,
        (Some(_), _) => Some(state),
    }
}
