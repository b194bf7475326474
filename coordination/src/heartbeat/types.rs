//! Heartbeat record types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coordinator health, escalating with consecutive stale sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Alive,
    Warning,
    Critical,
    Dead,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Alive => "alive",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// Persisted heartbeat record for one coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub coordinator_id: String,
    pub last_heartbeat: DateTime<Utc>,
    /// Monotonic beat counter. 0 after registration, 1 on the first beat.
    pub sequence: u64,
    /// Caller-supplied loop iteration, opaque to the monitor.
    pub iteration: u64,
    pub warning_count: u32,
    pub health: HealthStatus,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HeartbeatRecord {
    pub fn new(coordinator_id: impl Into<String>) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            last_heartbeat: Utc::now(),
            sequence: 0,
            iteration: 0,
            warning_count: 0,
            health: HealthStatus::Alive,
            metadata: HashMap::new(),
        }
    }
}

/// Per-category deletion counts from a dead-coordinator cleanup.
///
/// All counts are zero when the cleanup already ran; repeats are not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub heartbeats_deleted: usize,
    pub signals_deleted: usize,
    pub acks_deleted: usize,
    pub assignments_released: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.heartbeats_deleted + self.signals_deleted + self.acks_deleted
            + self.assignments_released
    }
}
