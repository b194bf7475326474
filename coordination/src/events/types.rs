//! Coordination event types.
//!
//! One variant per logical event name in the coordination protocol. Events
//! are broadcast on the bus and mirrored to the audit channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::heartbeat::HealthStatus;
use crate::signal::SignalType;

/// Unique identifier for audit records.
pub type EventId = String;

/// All coordination events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    /// A coordinator joined the protocol.
    HeartbeatRegistered {
        coordinator_id: String,
        agent_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A coordinator refreshed its heartbeat.
    HeartbeatUpdated {
        coordinator_id: String,
        sequence: u64,
        iteration: u64,
        timestamp: DateTime<Utc>,
    },

    /// The monitor sweep found a heartbeat older than the stale threshold.
    HeartbeatStale {
        coordinator_id: String,
        warning_count: u32,
        age_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A coordinator escalated to WARNING or CRITICAL.
    CoordinatorWarning {
        coordinator_id: String,
        health: HealthStatus,
        warning_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A coordinator was declared dead (by escalation or explicitly).
    CoordinatorDead {
        coordinator_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A dead coordinator was explicitly brought back.
    CoordinatorRecovered {
        coordinator_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Dead-coordinator cleanup finished; counts may all be zero on repeat.
    CleanupComplete {
        coordinator_id: String,
        heartbeats_deleted: usize,
        signals_deleted: usize,
        acks_deleted: usize,
        assignments_released: usize,
        timestamp: DateTime<Utc>,
    },

    /// A heartbeat arrived with a sequence gap. Reported, never fatal.
    ContinuityViolation {
        coordinator_id: String,
        expected_sequence: u64,
        received_sequence: u64,
        gap: i64,
        timestamp: DateTime<Utc>,
    },

    /// A signal envelope was written for a receiver.
    SignalSent {
        sender_id: String,
        receiver_id: String,
        signal_type: SignalType,
        message_id: String,
        duplicate: bool,
        timestamp: DateTime<Utc>,
    },

    /// A sender consumed a verified acknowledgement.
    SignalAckReceived {
        sender_id: String,
        receiver_id: String,
        signal_type: SignalType,
        delivery_time_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A consensus round reached the pass threshold.
    ConsensusAchieved {
        round_id: String,
        consensus_score: f64,
        pass_ratio: f64,
        total_votes: usize,
        timestamp: DateTime<Utc>,
    },

    /// A validator was excluded from a round as malicious.
    MaliciousExcluded {
        round_id: String,
        agent_id: String,
        reason: ExclusionReason,
        timestamp: DateTime<Utc>,
    },
}

impl CoordinationEvent {
    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CoordinationEvent::HeartbeatRegistered { timestamp, .. } => *timestamp,
            CoordinationEvent::HeartbeatUpdated { timestamp, .. } => *timestamp,
            CoordinationEvent::HeartbeatStale { timestamp, .. } => *timestamp,
            CoordinationEvent::CoordinatorWarning { timestamp, .. } => *timestamp,
            CoordinationEvent::CoordinatorDead { timestamp, .. } => *timestamp,
            CoordinationEvent::CoordinatorRecovered { timestamp, .. } => *timestamp,
            CoordinationEvent::CleanupComplete { timestamp, .. } => *timestamp,
            CoordinationEvent::ContinuityViolation { timestamp, .. } => *timestamp,
            CoordinationEvent::SignalSent { timestamp, .. } => *timestamp,
            CoordinationEvent::SignalAckReceived { timestamp, .. } => *timestamp,
            CoordinationEvent::ConsensusAchieved { timestamp, .. } => *timestamp,
            CoordinationEvent::MaliciousExcluded { timestamp, .. } => *timestamp,
        }
    }

    /// Get the logical event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            CoordinationEvent::HeartbeatRegistered { .. } => "heartbeat:registered",
            CoordinationEvent::HeartbeatUpdated { .. } => "heartbeat:updated",
            CoordinationEvent::HeartbeatStale { .. } => "heartbeat:stale",
            CoordinationEvent::CoordinatorWarning { .. } => "coordinator:warning",
            CoordinationEvent::CoordinatorDead { .. } => "coordinator:dead",
            CoordinationEvent::CoordinatorRecovered { .. } => "coordinator:recovered",
            CoordinationEvent::CleanupComplete { .. } => "cleanup:complete",
            CoordinationEvent::ContinuityViolation { .. } => "continuity:violation",
            CoordinationEvent::SignalSent { .. } => "signal:sent",
            CoordinationEvent::SignalAckReceived { .. } => "signal:ack:received",
            CoordinationEvent::ConsensusAchieved { .. } => "consensus:achieved",
            CoordinationEvent::MaliciousExcluded { .. } => "consensus:malicious-excluded",
        }
    }

    /// Get the coordinator this event is about, if it is coordinator-scoped.
    pub fn coordinator_id(&self) -> Option<&str> {
        match self {
            CoordinationEvent::HeartbeatRegistered { coordinator_id, .. } => Some(coordinator_id),
            CoordinationEvent::HeartbeatUpdated { coordinator_id, .. } => Some(coordinator_id),
            CoordinationEvent::HeartbeatStale { coordinator_id, .. } => Some(coordinator_id),
            CoordinationEvent::CoordinatorWarning { coordinator_id, .. } => Some(coordinator_id),
            CoordinationEvent::CoordinatorDead { coordinator_id, .. } => Some(coordinator_id),
            CoordinationEvent::CoordinatorRecovered { coordinator_id, .. } => Some(coordinator_id),
            CoordinationEvent::CleanupComplete { coordinator_id, .. } => Some(coordinator_id),
            CoordinationEvent::ContinuityViolation { coordinator_id, .. } => Some(coordinator_id),
            CoordinationEvent::SignalSent { receiver_id, .. } => Some(receiver_id),
            CoordinationEvent::SignalAckReceived { receiver_id, .. } => Some(receiver_id),
            CoordinationEvent::ConsensusAchieved { .. } => None,
            CoordinationEvent::MaliciousExcluded { agent_id, .. } => Some(agent_id),
        }
    }

    /// Create a new unique event ID.
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Why a validator vote was excluded as malicious.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Missing or unverifiable vote signature.
    InvalidSignature,
    /// Confidence diverged from the batch distribution.
    ConfidenceOutlier { z_score: f64 },
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::InvalidSignature => write!(f, "invalid_signature"),
            ExclusionReason::ConfidenceOutlier { z_score } => {
                write!(f, "confidence_outlier(z={z_score:.2})")
            }
        }
    }
}

/// Wire format published on the audit channel for every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event_id: EventId,
    pub coordinator_id: Option<String>,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Build the audit record for an event.
    pub fn for_event(event: &CoordinationEvent) -> Self {
        Self {
            event_id: CoordinationEvent::new_id(),
            coordinator_id: event.coordinator_id().map(String::from),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            timestamp: event.timestamp(),
        }
    }
}
