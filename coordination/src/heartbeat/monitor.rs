//! Heartbeat monitor.
//!
//! Tracks one record per coordinator, wrapped in its own async mutex so
//! beats for different coordinators never contend. Staleness is measured
//! against a monotonic instant, not the wall-clock timestamp that gets
//! persisted, so clock adjustments cannot fake a fresh heartbeat.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::types::{CleanupReport, HealthStatus, HeartbeatRecord};
use super::{HeartbeatError, HeartbeatResult};
use crate::config::CoordinationConfig;
use crate::events::{CoordinationEvent, SharedEventBus};
use crate::identity::validate_identifier;
use crate::store::{keys, SharedStore};

/// Shared reference to HeartbeatMonitor
pub type SharedHeartbeatMonitor = Arc<HeartbeatMonitor>;

/// In-memory state for one coordinator.
struct TrackedRecord {
    record: HeartbeatRecord,
    /// Monotonic time of the last accepted beat.
    last_seen: Instant,
    /// Set when a DEAD coordinator's cleanup failed and must be retried.
    cleanup_pending: bool,
}

/// Failure detector over registered coordinators.
pub struct HeartbeatMonitor {
    store: SharedStore,
    bus: SharedEventBus,
    config: CoordinationConfig,
    records: RwLock<HashMap<String, Arc<Mutex<TrackedRecord>>>>,
    /// agent id -> owning coordinator id
    assignments: RwLock<HashMap<String, String>>,
    sweep_active: AtomicBool,
}

impl HeartbeatMonitor {
    pub fn new(store: SharedStore, bus: SharedEventBus, config: CoordinationConfig) -> Self {
        Self {
            store,
            bus,
            config,
            records: RwLock::new(HashMap::new()),
            assignments: RwLock::new(HashMap::new()),
            sweep_active: AtomicBool::new(false),
        }
    }

    /// Create a shared reference to this monitor
    pub fn shared(self) -> SharedHeartbeatMonitor {
        Arc::new(self)
    }

    fn emit(&self, event: CoordinationEvent) {
        let _ = self.bus.publish(event);
    }

    async fn tracked(&self, coordinator_id: &str) -> Option<Arc<Mutex<TrackedRecord>>> {
        self.records.read().await.get(coordinator_id).cloned()
    }

    async fn persist(&self, record: &HeartbeatRecord) -> HeartbeatResult<()> {
        let json = serde_json::to_string(record)?;
        self.store
            .set(
                &keys::heartbeat(&record.coordinator_id),
                &json,
                Some(Duration::from_secs(self.config.heartbeat_ttl_secs)),
            )
            .await?;
        Ok(())
    }

    /// Register a coordinator and the agents assigned to it.
    pub async fn register_coordinator(
        &self,
        coordinator_id: &str,
        agents: &[String],
    ) -> HeartbeatResult<()> {
        validate_identifier(coordinator_id)?;
        for agent in agents {
            validate_identifier(agent)?;
        }

        let record = HeartbeatRecord::new(coordinator_id);
        {
            let mut records = self.records.write().await;
            if records.contains_key(coordinator_id) {
                return Err(HeartbeatError::AlreadyRegistered(coordinator_id.to_string()));
            }
            records.insert(
                coordinator_id.to_string(),
                Arc::new(Mutex::new(TrackedRecord {
                    record: record.clone(),
                    last_seen: Instant::now(),
                    cleanup_pending: false,
                })),
            );
        }

        {
            let mut assignments = self.assignments.write().await;
            for agent in agents {
                assignments.insert(agent.clone(), coordinator_id.to_string());
            }
        }

        self.persist(&record).await?;
        info!(coordinator_id, agent_count = agents.len(), "Coordinator registered");
        self.emit(CoordinationEvent::HeartbeatRegistered {
            coordinator_id: coordinator_id.to_string(),
            agent_count: agents.len(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record a heartbeat, advancing the monitor-owned sequence counter.
    pub async fn register_heartbeat(
        &self,
        coordinator_id: &str,
        iteration: u64,
        metadata: HashMap<String, serde_json::Value>,
    ) -> HeartbeatResult<HeartbeatRecord> {
        validate_identifier(coordinator_id)?;
        let tracked = self
            .tracked(coordinator_id)
            .await
            .ok_or_else(|| HeartbeatError::UnknownCoordinator(coordinator_id.to_string()))?;

        let mut guard = tracked.lock().await;
        if guard.record.health == HealthStatus::Dead {
            return Err(HeartbeatError::DeadCoordinator(coordinator_id.to_string()));
        }
        let sequence = guard.record.sequence + 1;
        self.apply_beat(&mut guard, sequence, iteration, metadata).await
    }

    /// Record a heartbeat with a caller-owned sequence counter.
    ///
    /// A gap between the expected and received counter is announced as a
    /// `continuity:violation` event; the heartbeat itself is still accepted.
    pub async fn register_heartbeat_with_sequence(
        &self,
        coordinator_id: &str,
        iteration: u64,
        sequence: u64,
        metadata: HashMap<String, serde_json::Value>,
    ) -> HeartbeatResult<HeartbeatRecord> {
        validate_identifier(coordinator_id)?;
        let tracked = self
            .tracked(coordinator_id)
            .await
            .ok_or_else(|| HeartbeatError::UnknownCoordinator(coordinator_id.to_string()))?;

        let mut guard = tracked.lock().await;
        if guard.record.health == HealthStatus::Dead {
            return Err(HeartbeatError::DeadCoordinator(coordinator_id.to_string()));
        }

        let expected = guard.record.sequence + 1;
        if sequence != expected {
            let gap = sequence as i64 - expected as i64;
            warn!(coordinator_id, expected, received = sequence, gap, "Heartbeat sequence gap");
            self.emit(CoordinationEvent::ContinuityViolation {
                coordinator_id: coordinator_id.to_string(),
                expected_sequence: expected,
                received_sequence: sequence,
                gap,
                timestamp: Utc::now(),
            });
        }
        self.apply_beat(&mut guard, sequence, iteration, metadata).await
    }

    async fn apply_beat(
        &self,
        guard: &mut TrackedRecord,
        sequence: u64,
        iteration: u64,
        metadata: HashMap<String, serde_json::Value>,
    ) -> HeartbeatResult<HeartbeatRecord> {
        guard.record.sequence = sequence;
        guard.record.iteration = iteration;
        guard.record.warning_count = 0;
        guard.record.health = HealthStatus::Alive;
        guard.record.last_heartbeat = Utc::now();
        guard.record.metadata = metadata;
        guard.last_seen = Instant::now();

        self.persist(&guard.record).await?;
        debug!(
            coordinator_id = %guard.record.coordinator_id,
            sequence,
            iteration,
            "Heartbeat recorded"
        );
        self.emit(CoordinationEvent::HeartbeatUpdated {
            coordinator_id: guard.record.coordinator_id.clone(),
            sequence,
            iteration,
            timestamp: guard.record.last_heartbeat,
        });
        Ok(guard.record.clone())
    }

    /// Age of the last accepted heartbeat.
    pub async fn check_heartbeat_freshness(&self, coordinator_id: &str) -> HeartbeatResult<Duration> {
        validate_identifier(coordinator_id)?;
        let tracked = self
            .tracked(coordinator_id)
            .await
            .ok_or_else(|| HeartbeatError::UnknownCoordinator(coordinator_id.to_string()))?;
        let guard = tracked.lock().await;
        Ok(guard.last_seen.elapsed())
    }

    /// Current health of a coordinator.
    pub async fn coordinator_health(&self, coordinator_id: &str) -> HeartbeatResult<HealthStatus> {
        let tracked = self
            .tracked(coordinator_id)
            .await
            .ok_or_else(|| HeartbeatError::UnknownCoordinator(coordinator_id.to_string()))?;
        let health = tracked.lock().await.record.health;
        Ok(health)
    }

    /// Spawn the periodic staleness sweep.
    ///
    /// If a sweep is still running when the next tick fires, that tick is
    /// skipped; sweeps never queue up.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let period = Duration::from_millis(monitor.config.monitor_interval_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if monitor.sweep_active.swap(true, Ordering::SeqCst) {
                    debug!("Sweep still in progress, skipping tick");
                    continue;
                }
                monitor.sweep().await;
                monitor.sweep_active.store(false, Ordering::SeqCst);
            }
        })
    }

    /// One staleness pass over every tracked coordinator.
    pub async fn sweep(&self) {
        let stale_after = Duration::from_millis(self.config.stale_threshold_ms);
        let snapshot: Vec<(String, Arc<Mutex<TrackedRecord>>)> = self
            .records
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        for (coordinator_id, tracked) in snapshot {
            let mut guard = tracked.lock().await;

            if guard.record.health == HealthStatus::Dead {
                if guard.cleanup_pending {
                    match self.run_cleanup(&coordinator_id).await {
                        Ok(_) => guard.cleanup_pending = false,
                        Err(e) => warn!(coordinator_id, error = %e, "Cleanup retry failed"),
                    }
                }
                continue;
            }

            let age = guard.last_seen.elapsed();
            if age < stale_after {
                continue;
            }

            guard.record.warning_count += 1;
            let warning_count = guard.record.warning_count;
            let age_ms = age.as_millis() as u64;
            warn!(coordinator_id, warning_count, age_ms, "Heartbeat stale");
            self.emit(CoordinationEvent::HeartbeatStale {
                coordinator_id: coordinator_id.clone(),
                warning_count,
                age_ms,
                timestamp: Utc::now(),
            });

            if warning_count >= self.config.max_warnings {
                let reason = format!("heartbeat timeout after {warning_count} warnings");
                self.declare_dead(&coordinator_id, &mut guard, &reason).await;
            } else {
                guard.record.health = if warning_count == 1 {
                    HealthStatus::Warning
                } else {
                    HealthStatus::Critical
                };
                self.emit(CoordinationEvent::CoordinatorWarning {
                    coordinator_id: coordinator_id.clone(),
                    health: guard.record.health,
                    warning_count,
                    timestamp: Utc::now(),
                });
                if let Err(e) = self.persist(&guard.record).await {
                    warn!(coordinator_id, error = %e, "Failed to persist escalated record");
                }
            }
        }
    }

    async fn declare_dead(&self, coordinator_id: &str, guard: &mut TrackedRecord, reason: &str) {
        guard.record.health = HealthStatus::Dead;
        error!(coordinator_id, reason, "Coordinator declared dead");
        self.emit(CoordinationEvent::CoordinatorDead {
            coordinator_id: coordinator_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        match self.run_cleanup(coordinator_id).await {
            Ok(_) => guard.cleanup_pending = false,
            Err(e) => {
                warn!(coordinator_id, error = %e, "Cleanup failed, will retry next sweep");
                guard.cleanup_pending = true;
            }
        }
    }

    /// Explicitly declare a coordinator dead and clean up after it.
    pub async fn mark_coordinator_dead(
        &self,
        coordinator_id: &str,
        reason: &str,
    ) -> HeartbeatResult<()> {
        validate_identifier(coordinator_id)?;
        let tracked = self
            .tracked(coordinator_id)
            .await
            .ok_or_else(|| HeartbeatError::UnknownCoordinator(coordinator_id.to_string()))?;
        let mut guard = tracked.lock().await;
        if guard.record.health == HealthStatus::Dead {
            return Ok(());
        }
        self.declare_dead(coordinator_id, &mut guard, reason).await;
        Ok(())
    }

    /// Delete everything a dead coordinator left in the store and release its
    /// agents. Safe to call repeatedly; repeats report zero counts.
    pub async fn cleanup_dead_coordinator(
        &self,
        coordinator_id: &str,
    ) -> HeartbeatResult<CleanupReport> {
        validate_identifier(coordinator_id)?;
        self.run_cleanup(coordinator_id).await
    }

    async fn run_cleanup(&self, coordinator_id: &str) -> HeartbeatResult<CleanupReport> {
        let mut report = CleanupReport::default();

        report.heartbeats_deleted = self
            .store
            .del(&[keys::heartbeat(coordinator_id)])
            .await?;

        report.signals_deleted = self
            .delete_owned(&keys::all_signals(), coordinator_id, "sender_id")
            .await?;
        report.acks_deleted = self
            .delete_owned(&keys::all_acks(), coordinator_id, "coordinator_id")
            .await?;

        {
            let mut assignments = self.assignments.write().await;
            let before = assignments.len();
            assignments.retain(|_, owner| owner != coordinator_id);
            report.assignments_released = before - assignments.len();
        }

        info!(
            coordinator_id,
            heartbeats = report.heartbeats_deleted,
            signals = report.signals_deleted,
            acks = report.acks_deleted,
            assignments = report.assignments_released,
            "Cleanup complete"
        );
        self.emit(CoordinationEvent::CleanupComplete {
            coordinator_id: coordinator_id.to_string(),
            heartbeats_deleted: report.heartbeats_deleted,
            signals_deleted: report.signals_deleted,
            acks_deleted: report.acks_deleted,
            assignments_released: report.assignments_released,
            timestamp: Utc::now(),
        });
        Ok(report)
    }

    /// Delete every envelope under `pattern` that is addressed to the
    /// coordinator (key segment) or was written by it (`owner_field` in the
    /// stored JSON).
    async fn delete_owned(
        &self,
        pattern: &str,
        coordinator_id: &str,
        owner_field: &str,
    ) -> HeartbeatResult<usize> {
        let prefix = format!(
            "{}:{coordinator_id}:",
            pattern.trim_end_matches(":*").trim_end_matches('*')
        );
        let mut doomed = Vec::new();
        for key in self.store.scan(pattern).await? {
            if key.starts_with(&prefix) {
                doomed.push(key);
                continue;
            }
            if let Some(value) = self.store.get(&key).await? {
                let owned = serde_json::from_str::<serde_json::Value>(&value)
                    .ok()
                    .and_then(|v| v.get(owner_field).and_then(|s| s.as_str().map(String::from)))
                    .is_some_and(|owner| owner == coordinator_id);
                if owned {
                    doomed.push(key);
                }
            }
        }
        if doomed.is_empty() {
            return Ok(0);
        }
        Ok(self.store.del(&doomed).await?)
    }

    /// Bring a DEAD coordinator back to ALIVE. Returns false for any other
    /// state, including coordinators that were never registered.
    pub async fn recover_coordinator(&self, coordinator_id: &str) -> HeartbeatResult<bool> {
        validate_identifier(coordinator_id)?;
        let Some(tracked) = self.tracked(coordinator_id).await else {
            return Ok(false);
        };
        let mut guard = tracked.lock().await;
        if guard.record.health != HealthStatus::Dead {
            return Ok(false);
        }

        guard.record.health = HealthStatus::Alive;
        guard.record.warning_count = 0;
        guard.record.last_heartbeat = Utc::now();
        guard.last_seen = Instant::now();
        guard.cleanup_pending = false;
        self.persist(&guard.record).await?;

        info!(coordinator_id, "Coordinator recovered");
        self.emit(CoordinationEvent::CoordinatorRecovered {
            coordinator_id: coordinator_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    /// Fully evict a coordinator: store cleanup plus in-memory removal.
    pub async fn unregister_coordinator(&self, coordinator_id: &str) -> HeartbeatResult<()> {
        validate_identifier(coordinator_id)?;
        if self.tracked(coordinator_id).await.is_none() {
            return Err(HeartbeatError::UnknownCoordinator(coordinator_id.to_string()));
        }
        self.run_cleanup(coordinator_id).await?;
        self.records.write().await.remove(coordinator_id);
        info!(coordinator_id, "Coordinator unregistered");
        Ok(())
    }
}
