//! Periodic maintenance driver with skip-if-busy semantics.
//!
//! One maintenance run may be in flight at a time. Ticks that land while
//! a run is active are skipped outright (no queueing); `stop` clears the
//! timer and waits for the in-flight run to finish before resolving.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lakesync_core::{Result, SyncError};

use crate::compaction::{MaintenanceReport, MaintenanceRunner, MaintenanceTaskProvider};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(60_000),
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

struct TimerState {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background maintenance scheduler
pub struct CompactionScheduler {
    config: SchedulerConfig,
    provider: Arc<dyn MaintenanceTaskProvider>,
    runner: Arc<dyn MaintenanceRunner>,
    in_flight: Arc<AsyncMutex<()>>,
    timer: Mutex<Option<TimerState>>,
}

impl CompactionScheduler {
    pub fn new(
        config: SchedulerConfig,
        provider: Arc<dyn MaintenanceTaskProvider>,
        runner: Arc<dyn MaintenanceRunner>,
    ) -> Self {
        Self {
            config,
            provider,
            runner,
            in_flight: Arc::new(AsyncMutex::new(())),
            timer: Mutex::new(None),
        }
    }

    /// Arm the timer. Fails when disabled or already running.
    pub fn start(&self) -> Result<()> {
        if !self.config.enabled {
            return Err(SyncError::SchedulerDisabled);
        }
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return Err(SyncError::SchedulerAlreadyRunning);
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let provider = Arc::clone(&self.provider);
        let runner = Arc::clone(&self.runner);
        let in_flight = Arc::clone(&self.in_flight);
        let interval = self.config.interval;

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        // Skip-if-busy: a tick that lands during a run is
                        // dropped, never queued.
                        match Arc::clone(&in_flight).try_lock_owned() {
                            Ok(slot) => {
                                let provider = Arc::clone(&provider);
                                let runner = Arc::clone(&runner);
                                tokio::spawn(async move {
                                    run_cycle(slot, provider, runner).await;
                                });
                            }
                            Err(_) => debug!("maintenance run in flight, tick skipped"),
                        }
                    }
                }
            }
        });

        *timer = Some(TimerState { shutdown, handle });
        info!(interval_ms = interval.as_millis() as u64, "maintenance scheduler started");
        Ok(())
    }

    /// Run one maintenance cycle immediately. Refuses while a run is in
    /// flight.
    pub async fn run_once(&self) -> Result<MaintenanceReport> {
        let _slot = self
            .in_flight
            .clone()
            .try_lock_owned()
            .map_err(|_| SyncError::SchedulerBusy)?;

        let task = self
            .provider
            .next_task()
            .await
            .map_err(|e| SyncError::SchedulerTaskProvider(e.to_string()))?;

        match task {
            Some(task) => self.runner.run(task).await,
            None => Ok(MaintenanceReport::default()),
        }
    }

    /// Clear the timer and wait for any in-flight run to complete.
    pub async fn stop(&self) -> Result<()> {
        let state = self
            .timer
            .lock()
            .take()
            .ok_or(SyncError::SchedulerNotRunning)?;

        let _ = state.shutdown.send(true);
        if let Err(e) = state.handle.await {
            warn!(error = %e, "scheduler timer task ended abnormally");
        }
        // Acquiring the slot proves the in-flight run (if any) finished.
        let _slot = self.in_flight.lock().await;
        info!("maintenance scheduler stopped");
        Ok(())
    }

    /// Whether the timer is armed.
    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }
}

async fn run_cycle(
    slot: OwnedMutexGuard<()>,
    provider: Arc<dyn MaintenanceTaskProvider>,
    runner: Arc<dyn MaintenanceRunner>,
) {
    let _slot = slot;
    let task = match provider.next_task().await {
        Ok(Some(task)) => task,
        Ok(None) => {
            debug!("no maintenance task available");
            return;
        }
        Err(e) => {
            error!(error = %SyncError::SchedulerTaskProvider(e.to_string()), "task provider failed");
            return;
        }
    };

    match runner.run(task).await {
        Ok(report) => info!(
            base = report.compaction.base_files_written,
            deletes = report.compaction.delete_files_written,
            compacted = report.compaction.delta_files_compacted,
            "maintenance run complete"
        ),
        Err(e) => error!(error = %e, "maintenance run failed"),
    }
}

impl Drop for CompactionScheduler {
    fn drop(&mut self) {
        if let Some(state) = self.timer.lock().take() {
            state.handle.abort();
        }
    }
}
