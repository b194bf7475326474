//! Signal and acknowledgement envelope types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of the derived message id in hex characters.
const MESSAGE_ID_LEN: usize = 16;

/// What a signal announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Completion,
    RetryRequest,
    Heartbeat,
    StatusUpdate,
    Error,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalType::Completion => "completion",
            SignalType::RetryRequest => "retry_request",
            SignalType::Heartbeat => "heartbeat",
            SignalType::StatusUpdate => "status_update",
            SignalType::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// One signal from a sender to a receiver.
///
/// The store holds at most one envelope per `(receiver, type)` key; a newer
/// send supersedes an older unconsumed one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub signal_type: SignalType,
    pub iteration: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SignalEnvelope {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        signal_type: SignalType,
        iteration: u64,
        payload: serde_json::Value,
    ) -> Self {
        let sender_id = sender_id.into();
        let receiver_id = receiver_id.into();
        let timestamp = Utc::now();
        let message_id = derive_message_id(&sender_id, &receiver_id, signal_type, timestamp);
        Self {
            message_id,
            sender_id,
            receiver_id,
            signal_type,
            iteration,
            timestamp,
            payload,
        }
    }
}

/// Deterministic message id: same sender, receiver, type, and timestamp
/// always derive the same id, which is how duplicates are detected.
pub fn derive_message_id(
    sender_id: &str,
    receiver_id: &str,
    signal_type: SignalType,
    timestamp: DateTime<Utc>,
) -> String {
    let input = format!(
        "{sender_id}:{receiver_id}:{signal_type}:{}",
        timestamp.timestamp_millis()
    );
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..MESSAGE_ID_LEN].to_string()
}

/// Signed acknowledgement written back by the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckEnvelope {
    pub coordinator_id: String,
    pub message_id: String,
    pub iteration: u64,
    pub timestamp: DateTime<Utc>,
    /// How long the signal sat in the store before being consumed.
    pub processing_time_ms: u64,
    /// HMAC over `coordinator_id:message_id:timestamp:iteration`.
    pub signature: String,
}

/// Outcome of a fire-and-forget send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub key: String,
    /// True when the send was dropped as an exact duplicate.
    pub duplicate: bool,
}

/// Outcome of a send that waited for an acknowledgement.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub success: bool,
    pub ack_received: bool,
    pub delivery_time_ms: u64,
    pub ack: Option<AckEnvelope>,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn delivered(ack: AckEnvelope, delivery_time_ms: u64) -> Self {
        Self {
            success: true,
            ack_received: true,
            delivery_time_ms,
            ack: Some(ack),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, delivery_time_ms: u64) -> Self {
        Self {
            success: false,
            ack_received: false,
            delivery_time_ms,
            ack: None,
            error: Some(error.into()),
        }
    }
}
