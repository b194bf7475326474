//! Heartbeat failure detection.
//!
//! Coordinators register once, then beat on every loop iteration. A periodic
//! sweep escalates anyone whose heartbeat goes stale: one missed threshold is
//! a WARNING, two is CRITICAL, and at `max_warnings` the coordinator is
//! declared dead and its store state is cleaned up. Recovery is explicit and
//! only valid from DEAD.

pub mod monitor;
pub mod types;

pub use monitor::{HeartbeatMonitor, SharedHeartbeatMonitor};
pub use types::{CleanupReport, HealthStatus, HeartbeatRecord};

use crate::identity::ValidationError;
use crate::store::StoreError;

/// Error type for heartbeat operations
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("coordinator already registered: {0}")]
    AlreadyRegistered(String),

    #[error("unknown coordinator: {0}")]
    UnknownCoordinator(String),

    #[error("coordinator is dead: {0}")]
    DeadCoordinator(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for heartbeat operations
pub type HeartbeatResult<T> = Result<T, HeartbeatError>;
