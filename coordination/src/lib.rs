//! Swarm Coordination Library
//!
//! This library provides the coordination core for multi-coordinator agent
//! swarms:
//! - Heartbeat failure detection with staged WARNING/CRITICAL/DEAD escalation
//!   and automatic cleanup of dead coordinators
//! - Reliable signal delivery between coordinators with HMAC-signed
//!   acknowledgements
//! - Byzantine-tolerant consensus validation over signed validator votes
//!
//! All three mechanisms share one TTL key-value store (any backend behind
//! [`store::CoordinationStore`]; [`store::MemoryStore`] ships for embedding
//! and tests) and announce everything they do as typed events on a broadcast
//! bus.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use swarm_coordination::config::CoordinationConfig;
//! use swarm_coordination::events::{AuditRelay, EventBus};
//! use swarm_coordination::heartbeat::HeartbeatMonitor;
//! use swarm_coordination::signal::{SignalProtocol, SignalType};
//! use swarm_coordination::store::{MemoryStore, SharedStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoordinationConfig::default();
//! config.validate()?;
//!
//! let store: SharedStore = Arc::new(MemoryStore::new());
//! let bus = EventBus::new().shared();
//! let _audit = AuditRelay::spawn(&bus, store.clone());
//!
//! let monitor = Arc::new(HeartbeatMonitor::new(store.clone(), bus.clone(), config.clone()));
//! let _sweeper = monitor.start();
//! monitor.register_coordinator("coordinator-a", &[]).await?;
//!
//! let signals = SignalProtocol::new(store, bus, config)?;
//! signals
//!     .send_signal(
//!         "coordinator-a",
//!         "coordinator-b",
//!         SignalType::StatusUpdate,
//!         1,
//!         serde_json::json!({ "phase": "indexing" }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consensus;
pub mod events;
pub mod heartbeat;
pub mod identity;
pub mod signal;
pub mod store;
pub mod telemetry;

pub use config::{ConfigError, CoordinationConfig};
pub use consensus::{ConsensusError, ConsensusResult, ConsensusValidator, ValidatorVote};
pub use events::{AuditRelay, CoordinationEvent, EventBus, SharedEventBus};
pub use heartbeat::{CleanupReport, HealthStatus, HeartbeatError, HeartbeatMonitor};
pub use signal::{DeliveryResult, SignalError, SignalProtocol, SignalType};
pub use store::{CoordinationStore, MemoryStore, SharedStore};
pub use telemetry::init_tracing;
