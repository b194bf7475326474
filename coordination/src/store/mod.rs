//! Coordination store abstraction.
//!
//! All three mechanisms (heartbeats, signals/ACKs, consensus audit) share one
//! external key-value store with per-key expiry and a pub/sub channel. The
//! store is a dependency, not something this crate owns: production deploys
//! plug in their own backend behind [`CoordinationStore`], and the in-process
//! [`MemoryStore`] serves embedding and tests.

mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a coordination store.
pub type SharedStore = Arc<dyn CoordinationStore>;

/// Contract required of the shared coordination store.
///
/// Mirrors the subset of a TTL key-value service the coordination core needs:
/// atomic set/get with expiry, existence checks, pattern enumeration, and a
/// fire-and-forget pub/sub channel. `scan` must be implemented with a
/// non-blocking cursor on real backends; a blocking full-keyspace listing is
/// not acceptable at production scale.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set `key` to `value`, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Get the value at `key`, if present and unexpired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete the given keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> StoreResult<usize>;

    /// Whether `key` exists (and is unexpired).
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Enumerate keys matching `pattern` (`*` wildcards).
    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Remaining time to live for `key`, `None` if the key has no expiry
    /// or does not exist.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Publish `message` on `channel`, returning the receiver count.
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize>;
}

/// Key-namespace builders.
///
/// Every dynamic segment must already be validated (see [`crate::identity`])
/// before reaching these; the builders themselves do no checking.
pub mod keys {
    /// Channel carrying the audit record of every coordination event.
    pub const AUDIT_CHANNEL: &str = "coordination:audit";

    /// Heartbeat record for one coordinator.
    pub fn heartbeat(coordinator_id: &str) -> String {
        format!("coordination:heartbeat:{coordinator_id}")
    }

    /// Current signal envelope for one receiver and signal type.
    pub fn signal(receiver_id: &str, signal_type: &str) -> String {
        format!("coordination:signal:{receiver_id}:{signal_type}")
    }

    /// Acknowledgement envelope for one receiver and signal type.
    pub fn ack(receiver_id: &str, signal_type: &str) -> String {
        format!("coordination:ack:{receiver_id}:{signal_type}")
    }

    /// Scan pattern for all signals addressed to one receiver.
    pub fn signals_to(receiver_id: &str) -> String {
        format!("coordination:signal:{receiver_id}:*")
    }

    /// Scan pattern for every signal envelope.
    pub fn all_signals() -> String {
        "coordination:signal:*".to_string()
    }

    /// Scan pattern for all ACKs owned by one coordinator.
    pub fn acks_of(coordinator_id: &str) -> String {
        format!("coordination:ack:{coordinator_id}:*")
    }

    /// Scan pattern for every ACK envelope.
    pub fn all_acks() -> String {
        "coordination:ack:*".to_string()
    }
}
