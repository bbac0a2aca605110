//! Claim-check hand-off between flush and materialisation.
//!
//! Queue messages have a size cap, so the publisher parks the full flush
//! payload in object storage and enqueues only a lightweight reference.
//! The consumer fetches the payload, feeds every configured materialiser,
//! and acks or nacks the reference. The processor is total: it reports
//! failures through events and the queue, never by raising.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use lakesync_core::{Result, RowDelta, SyncError, TableSchema};
use lakesync_store::{FlushManifest, ObjectStore};

/// Lightweight queue reference to a parked flush payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialiseJob {
    pub object_key: String,
    pub gateway_id: String,
    pub delta_count: usize,
}

/// Minimal ack/nack queue surface.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: MaterialiseJob) -> Result<()>;

    /// Pop the next pending job into the in-flight set.
    async fn dequeue(&self) -> Result<Option<MaterialiseJob>>;

    /// Drop a completed job.
    async fn ack(&self, job: &MaterialiseJob) -> Result<()>;

    /// Return a failed job to the pending queue for retry.
    async fn nack(&self, job: &MaterialiseJob) -> Result<()>;
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<MaterialiseJob>,
    in_flight: HashMap<String, MaterialiseJob>,
}

/// In-process job queue.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: MaterialiseJob) -> Result<()> {
        self.state.lock().pending.push_back(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<MaterialiseJob>> {
        let mut state = self.state.lock();
        let job = state.pending.pop_front();
        if let Some(job) = &job {
            state.in_flight.insert(job.object_key.clone(), job.clone());
        }
        Ok(job)
    }

    async fn ack(&self, job: &MaterialiseJob) -> Result<()> {
        self.state.lock().in_flight.remove(&job.object_key);
        Ok(())
    }

    async fn nack(&self, job: &MaterialiseJob) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(job) = state.in_flight.remove(&job.object_key) {
            state.pending.push_back(job);
        }
        Ok(())
    }
}

/// Publisher half of the claim check.
pub struct FlushPublisher {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
    gateway_id: String,
}

impl FlushPublisher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        gateway_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            gateway_id: gateway_id.into(),
        }
    }

    /// Park the payload in object storage, then enqueue the reference.
    /// Returns the payload's object key.
    pub async fn publish(&self, manifest: &FlushManifest) -> Result<String> {
        let key = format!(
            "materialise-jobs/{}/{}-{}.json",
            self.gateway_id,
            Utc::now().timestamp_millis(),
            Uuid::new_v4()
        );
        let payload = manifest.to_json_bytes()?;
        self.store
            .put_object(&key, Bytes::from(payload), Some("application/json"))
            .await
            .map_err(|e| SyncError::FlushQueue(e.to_string()))?;

        self.queue
            .enqueue(MaterialiseJob {
                object_key: key.clone(),
                gateway_id: self.gateway_id.clone(),
                delta_count: manifest.entries.len(),
            })
            .await
            .map_err(|e| SyncError::FlushQueue(e.to_string()))?;

        debug!(key = %key, deltas = manifest.entries.len(), "published materialise job");
        Ok(key)
    }
}

/// A downstream system deltas are applied into.
#[async_trait]
pub trait Materialiser: Send + Sync {
    fn name(&self) -> &str;

    async fn materialise(&self, deltas: &[RowDelta], schemas: &[TableSchema]) -> Result<()>;
}

/// Failure event emitted per affected table when materialisation fails.
#[derive(Debug, Clone)]
pub struct MaterialiseFailure {
    pub table: String,
    pub delta_count: usize,
    pub error: String,
}

type FailureHook = Arc<dyn Fn(MaterialiseFailure) + Send + Sync>;

/// Result of one consumer step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Queue was empty.
    Idle,
    /// Payload applied and acked.
    Done { delta_count: usize },
    /// Payload nacked for retry.
    Retried,
}

/// Consumer half of the claim check.
pub struct MaterialiseProcessor {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
    materialisers: Vec<Arc<dyn Materialiser>>,
    on_failure: Option<FailureHook>,
}

impl MaterialiseProcessor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        materialisers: Vec<Arc<dyn Materialiser>>,
    ) -> Self {
        Self {
            store,
            queue,
            materialisers,
            on_failure: None,
        }
    }

    /// Install a failure hook invoked once per affected table.
    pub fn with_failure_hook(
        mut self,
        hook: impl Fn(MaterialiseFailure) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Process one queued job. Total: every failure path nacks and
    /// reports instead of raising.
    pub async fn process_next(&self) -> ProcessOutcome {
        let job = match self.queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => return ProcessOutcome::Idle,
            Err(e) => {
                warn!(error = %e, "dequeue failed");
                return ProcessOutcome::Idle;
            }
        };

        match self.apply(&job).await {
            Ok(delta_count) => {
                if let Err(e) = self.store.delete_object(&job.object_key).await {
                    // The payload was applied; redelivery is the safe
                    // direction, so keep the ack.
                    warn!(key = %job.object_key, error = %e, "payload cleanup failed");
                }
                if let Err(e) = self.queue.ack(&job).await {
                    warn!(key = %job.object_key, error = %e, "ack failed");
                }
                info!(key = %job.object_key, delta_count, "materialised flush payload");
                ProcessOutcome::Done { delta_count }
            }
            Err((error, manifest)) => {
                if let Err(e) = self.queue.nack(&job).await {
                    warn!(key = %job.object_key, error = %e, "nack failed");
                }
                self.emit_failures(&job, manifest.as_ref(), &error);
                warn!(key = %job.object_key, error = %error, "materialisation failed, job requeued");
                ProcessOutcome::Retried
            }
        }
    }

    /// Fetch, decode, and fan out one payload. On failure, returns the
    /// decoded manifest too (when available) so failures can be reported
    /// per table.
    async fn apply(
        &self,
        job: &MaterialiseJob,
    ) -> std::result::Result<usize, (SyncError, Option<FlushManifest>)> {
        let payload = self
            .store
            .get_object(&job.object_key)
            .await
            .map_err(|e| (e, None))?;

        let manifest = FlushManifest::from_json_bytes(&payload).map_err(|e| (e, None))?;

        for materialiser in &self.materialisers {
            if let Err(e) = materialiser
                .materialise(&manifest.entries, &manifest.schemas)
                .await
            {
                let error = SyncError::FlushQueue(format!(
                    "materialiser '{}' failed: {e}",
                    materialiser.name()
                ));
                return Err((error, Some(manifest)));
            }
        }
        Ok(manifest.entries.len())
    }

    fn emit_failures(
        &self,
        job: &MaterialiseJob,
        manifest: Option<&FlushManifest>,
        error: &SyncError,
    ) {
        let Some(hook) = &self.on_failure else {
            return;
        };
        match manifest {
            Some(manifest) => {
                let mut per_table: HashMap<&str, usize> = HashMap::new();
                for delta in &manifest.entries {
                    *per_table.entry(delta.table.as_str()).or_default() += 1;
                }
                for (table, delta_count) in per_table {
                    hook(MaterialiseFailure {
                        table: table.to_string(),
                        delta_count,
                        error: error.to_string(),
                    });
                }
            }
            None => hook(MaterialiseFailure {
                table: String::new(),
                delta_count: job.delta_count,
                error: error.to_string(),
            }),
        }
    }
}
