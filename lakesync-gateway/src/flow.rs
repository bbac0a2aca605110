//! Flow registry: named source-to-store pipelines and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lakesync_core::{Result, SyncError};

/// Direction a flow moves deltas in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    Push,
    Pull,
    Bidirectional,
}

/// Static description of a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub name: String,
    pub source: String,
    pub store: String,
    #[serde(default)]
    pub materialise: Vec<String>,
    pub direction: FlowDirection,
}

/// Lifecycle state of a registered flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    Idle,
    Running,
    Stopped,
    Failed,
}

/// A registered flow plus its runtime bookkeeping.
#[derive(Debug, Clone)]
pub struct FlowEntry {
    pub config: FlowConfig,
    pub state: FlowState,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub deltas_processed: u64,
}

impl FlowEntry {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            state: FlowState::Idle,
            last_activity_at: None,
            deltas_processed: 0,
        }
    }

    /// `idle -> running` and `stopped -> running`; running is idempotent.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            FlowState::Idle | FlowState::Stopped | FlowState::Running => {
                self.state = FlowState::Running;
                self.last_activity_at = Some(Utc::now());
                Ok(())
            }
            FlowState::Failed => Err(SyncError::Config(format!(
                "flow '{}' has failed and cannot be restarted",
                self.config.name
            ))),
        }
    }

    /// `running -> stopped`; stopping a non-running flow is a no-op.
    pub fn stop(&mut self) {
        if self.state == FlowState::Running {
            self.state = FlowState::Stopped;
            self.last_activity_at = Some(Utc::now());
        }
    }

    pub fn fail(&mut self) {
        self.state = FlowState::Failed;
        self.last_activity_at = Some(Utc::now());
    }

    pub fn record_activity(&mut self, deltas: u64) {
        self.deltas_processed += deltas;
        self.last_activity_at = Some(Utc::now());
    }
}

/// Validate a flow config before registration.
pub fn validate_flow(config: &FlowConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(SyncError::Config("flow name must not be empty".into()));
    }
    if config.source.trim().is_empty() || config.store.trim().is_empty() {
        return Err(SyncError::Config(format!(
            "flow '{}' needs a non-empty source and store",
            config.name
        )));
    }
    Ok(())
}
