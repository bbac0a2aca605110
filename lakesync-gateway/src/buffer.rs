//! The gateway's bounded in-memory delta log.
//!
//! Entries are kept sorted by `(hlc, delta_id)` and de-duplicated by
//! delta id. A running byte counter and the minimum buffered HLC drive
//! the size and age flush triggers. The buffer is mutated only through
//! the gateway's serialized entry points; a `tokio` mutex guards the log
//! across suspension points.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use lakesync_core::{HlcTimestamp, Result, RowDelta, RulesContext, SyncError};
use lakesync_store::DatabaseAdapter;

use crate::config::ConsistencyMode;

/// Sorted, bounded delta log.
struct DeltaLog {
    entries: BTreeMap<(HlcTimestamp, String), RowDelta>,
    ids: HashSet<String>,
    bytes: usize,
    max_bytes: usize,
    max_age_ms: u64,
}

impl DeltaLog {
    fn new(max_bytes: usize, max_age_ms: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            ids: HashSet::new(),
            bytes: 0,
            max_bytes,
            max_age_ms,
        }
    }

    /// Insert unless the delta id is already buffered. `Ok(false)` marks
    /// a duplicate; `BufferFull` marks a byte-bound breach.
    fn insert(&mut self, delta: &RowDelta) -> Result<bool> {
        if self.ids.contains(&delta.delta_id) {
            return Ok(false);
        }
        let size = delta.encoded_size();
        if !self.entries.is_empty() && self.bytes + size > self.max_bytes {
            return Err(SyncError::BufferFull {
                bytes: self.bytes,
                max_bytes: self.max_bytes,
            });
        }
        self.ids.insert(delta.delta_id.clone());
        self.bytes += size;
        self.entries
            .insert((delta.hlc, delta.delta_id.clone()), delta.clone());
        Ok(true)
    }

    fn min_hlc(&self) -> Option<HlcTimestamp> {
        self.entries.keys().next().map(|(hlc, _)| *hlc)
    }

    fn flush_due(&self, now_ms: u64) -> bool {
        if self.bytes >= self.max_bytes {
            return true;
        }
        self.min_hlc()
            .map_or(false, |oldest| oldest.wall_ms() + self.max_age_ms <= now_ms)
    }

    fn drain(&mut self) -> Vec<RowDelta> {
        self.ids.clear();
        self.bytes = 0;
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

/// Outcome of one pull page.
#[derive(Debug, Clone)]
pub struct BufferPage {
    pub deltas: Vec<RowDelta>,
    pub has_more: bool,
}

/// The shared buffer: the bounded log plus optional write-through to a
/// durable backing store.
pub struct SharedBuffer {
    log: Mutex<DeltaLog>,
    backing: Option<Arc<dyn DatabaseAdapter>>,
    mode: ConsistencyMode,
}

impl SharedBuffer {
    pub fn new(
        max_bytes: usize,
        max_age_ms: u64,
        backing: Option<Arc<dyn DatabaseAdapter>>,
        mode: ConsistencyMode,
    ) -> Self {
        Self {
            log: Mutex::new(DeltaLog::new(max_bytes, max_age_ms)),
            backing,
            mode,
        }
    }

    /// Write accepted deltas through to the backing store.
    ///
    /// Eventual mode logs failures and proceeds; durability is recovered
    /// by the next flush. Strong mode surfaces `SharedWriteFailed`.
    pub async fn write_through(&self, deltas: &[RowDelta]) -> Result<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        match backing.insert_deltas(deltas).await {
            Ok(inserted) => {
                debug!(inserted, "write-through to backing store");
                Ok(())
            }
            Err(e) => match self.mode {
                ConsistencyMode::Eventual => {
                    warn!(error = %e, "backing store write failed, continuing");
                    Ok(())
                }
                ConsistencyMode::Strong => Err(SyncError::SharedWriteFailed(e.to_string())),
            },
        }
    }

    /// Insert one delta. `Ok(false)` marks a duplicate.
    pub async fn insert(&self, delta: &RowDelta) -> Result<bool> {
        self.log.lock().await.insert(delta)
    }

    /// Whether either flush trigger has fired.
    pub async fn flush_due(&self, now_ms: u64) -> bool {
        self.log.lock().await.flush_due(now_ms)
    }

    /// Take the whole buffered sequence under an exclusive acquisition.
    pub async fn drain(&self) -> Vec<RowDelta> {
        self.log.lock().await.drain()
    }

    /// Put a failed flush snapshot back.
    pub async fn reinsert(&self, deltas: Vec<RowDelta>) {
        let mut log = self.log.lock().await;
        for delta in &deltas {
            // Duplicates are fine here; a push may have re-delivered some
            // of the snapshot while the flush was in flight.
            if log.ids.contains(&delta.delta_id) {
                continue;
            }
            log.ids.insert(delta.delta_id.clone());
            log.bytes += delta.encoded_size();
            log.entries
                .insert((delta.hlc, delta.delta_id.clone()), delta.clone());
        }
    }

    /// One pull page: deltas after `since` in `(hlc, delta_id)` order,
    /// filtered, with a has-more flag. The snapshot is stable at entry;
    /// appends racing the pull are not observed.
    pub async fn page(
        &self,
        since: HlcTimestamp,
        max_deltas: usize,
        exclude_client: Option<&str>,
        rules: Option<&RulesContext>,
    ) -> BufferPage {
        let log = self.log.lock().await;
        let mut deltas = Vec::new();
        let mut has_more = false;
        for delta in log
            .entries
            .range((since, String::new())..)
            .map(|(_, d)| d)
            .filter(|d| d.hlc > since)
            .filter(|d| exclude_client.map_or(true, |c| d.client_id != c))
            .filter(|d| rules.map_or(true, |r| r.matches(d)))
        {
            if deltas.len() == max_deltas {
                has_more = true;
                break;
            }
            deltas.push(delta.clone());
        }
        BufferPage { deltas, has_more }
    }

    pub async fn len(&self) -> usize {
        self.log.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.lock().await.entries.is_empty()
    }

    pub async fn byte_size(&self) -> usize {
        self.log.lock().await.bytes
    }

    pub async fn min_hlc(&self) -> Option<HlcTimestamp> {
        self.log.lock().await.min_hlc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakesync_core::{ColumnDelta, ColumnValue, DeltaOp};

    fn delta(hlc: u64, row: &str) -> RowDelta {
        RowDelta::new(
            DeltaOp::Insert,
            "todos",
            row,
            "c1",
            HlcTimestamp::encode(hlc, 0),
            vec![ColumnDelta::new("title", ColumnValue::Str(row.into()))],
        )
    }

    fn buffer(max_bytes: usize) -> SharedBuffer {
        SharedBuffer::new(max_bytes, 60_000, None, ConsistencyMode::Eventual)
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_dropped() {
        let buf = buffer(1 << 20);
        let d = delta(1000, "r1");
        assert!(buf.insert(&d).await.unwrap());
        assert!(!buf.insert(&d).await.unwrap());
        assert_eq!(buf.len().await, 1);
    }

    #[tokio::test]
    async fn test_page_is_hlc_ascending() {
        let buf = buffer(1 << 20);
        for (hlc, row) in [(3000, "r3"), (1000, "r1"), (2000, "r2")] {
            buf.insert(&delta(hlc, row)).await.unwrap();
        }
        let page = buf.page(HlcTimestamp::ZERO, 10, None, None).await;
        let hlcs: Vec<u64> = page.deltas.iter().map(|d| d.hlc.wall_ms()).collect();
        assert_eq!(hlcs, vec![1000, 2000, 3000]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_page_ties_break_by_delta_id() {
        let buf = buffer(1 << 20);
        let a = delta(1000, "ra");
        let b = delta(1000, "rb");
        buf.insert(&b).await.unwrap();
        buf.insert(&a).await.unwrap();
        let page = buf.page(HlcTimestamp::ZERO, 10, None, None).await;
        let mut expected = vec![a.delta_id.clone(), b.delta_id.clone()];
        expected.sort();
        let got: Vec<String> = page.deltas.iter().map(|d| d.delta_id.clone()).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_pagination_has_more_and_cursor() {
        let buf = buffer(1 << 20);
        for i in 1..=10u64 {
            buf.insert(&delta(i * 1000, &format!("r{i}"))).await.unwrap();
        }
        let first = buf.page(HlcTimestamp::ZERO, 5, None, None).await;
        assert_eq!(first.deltas.len(), 5);
        assert!(first.has_more);

        let cursor = first.deltas.last().map(|d| d.hlc).unwrap_or(HlcTimestamp::ZERO);
        let second = buf.page(cursor, 5, None, None).await;
        assert_eq!(second.deltas.len(), 5);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_exclude_own_client() {
        let buf = buffer(1 << 20);
        buf.insert(&delta(1000, "r1")).await.unwrap();
        let page = buf.page(HlcTimestamp::ZERO, 10, Some("c1"), None).await;
        assert!(page.deltas.is_empty());
        let page = buf.page(HlcTimestamp::ZERO, 10, Some("other"), None).await;
        assert_eq!(page.deltas.len(), 1);
    }

    #[tokio::test]
    async fn test_byte_bound_breach() {
        let small = delta(1000, "r1");
        let buf = buffer(small.encoded_size() + 1);
        buf.insert(&small).await.unwrap();
        match buf.insert(&delta(2000, "r2")).await {
            Err(SyncError::BufferFull { .. }) => {}
            other => panic!("expected BufferFull, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_flush_due_by_size_and_age() {
        let d = delta(1000, "r1");
        let buf = SharedBuffer::new(d.encoded_size(), 5_000, None, ConsistencyMode::Eventual);
        buf.insert(&d).await.unwrap();
        // size bound reached exactly
        assert!(buf.flush_due(1000).await);

        let buf = buffer(1 << 20);
        buf.insert(&delta(1000, "r1")).await.unwrap();
        assert!(!buf.flush_due(2000).await);
        // oldest entry is 60s old
        assert!(buf.flush_due(1000 + 60_000).await);
    }

    #[tokio::test]
    async fn test_drain_and_reinsert() {
        let buf = buffer(1 << 20);
        buf.insert(&delta(1000, "r1")).await.unwrap();
        buf.insert(&delta(2000, "r2")).await.unwrap();

        let snapshot = buf.drain().await;
        assert_eq!(snapshot.len(), 2);
        assert!(buf.is_empty().await);
        assert_eq!(buf.byte_size().await, 0);

        buf.reinsert(snapshot).await;
        assert_eq!(buf.len().await, 2);
        assert!(buf.byte_size().await > 0);
    }
}
