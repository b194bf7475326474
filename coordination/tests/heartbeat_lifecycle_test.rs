//! Full heartbeat lifecycle: registration, staged escalation, death,
//! cleanup, and recovery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use swarm_coordination::config::CoordinationConfig;
use swarm_coordination::events::{CoordinationEvent, EventBus, SharedEventBus};
use swarm_coordination::heartbeat::{HealthStatus, HeartbeatMonitor};
use swarm_coordination::signal::{SignalProtocol, SignalType};
use swarm_coordination::store::{MemoryStore, SharedStore};

const STALE: Duration = Duration::from_millis(121_000);

fn setup() -> (Arc<HeartbeatMonitor>, SharedEventBus, SharedStore) {
    swarm_coordination::init_tracing();
    let store: SharedStore = Arc::new(MemoryStore::new());
    let bus = EventBus::new().shared();
    let config = CoordinationConfig::with_secret("lifecycle-secret");
    let monitor = Arc::new(HeartbeatMonitor::new(store.clone(), bus.clone(), config));
    (monitor, bus, store)
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<CoordinationEvent>) -> Vec<CoordinationEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_escalation_reaches_dead_in_three_sweeps() {
    let (monitor, bus, _store) = setup();
    let mut events = bus.subscribe();

    monitor
        .register_coordinator("coord-1", &["agent-1".to_string()])
        .await
        .unwrap();
    monitor
        .register_heartbeat("coord-1", 1, HashMap::new())
        .await
        .unwrap();

    tokio::time::advance(STALE).await;
    monitor.sweep().await;
    assert_eq!(
        monitor.coordinator_health("coord-1").await.unwrap(),
        HealthStatus::Warning
    );

    tokio::time::advance(STALE).await;
    monitor.sweep().await;
    assert_eq!(
        monitor.coordinator_health("coord-1").await.unwrap(),
        HealthStatus::Critical
    );

    tokio::time::advance(STALE).await;
    monitor.sweep().await;
    assert_eq!(
        monitor.coordinator_health("coord-1").await.unwrap(),
        HealthStatus::Dead
    );

    let seen = drain(&mut events);
    let stale_count = seen
        .iter()
        .filter(|e| e.event_type() == "heartbeat:stale")
        .count();
    assert_eq!(stale_count, 3);
    assert!(seen.iter().any(|e| e.event_type() == "coordinator:dead"));
    let cleanup = seen
        .iter()
        .find_map(|e| match e {
            CoordinationEvent::CleanupComplete {
                heartbeats_deleted,
                assignments_released,
                ..
            } => Some((*heartbeats_deleted, *assignments_released)),
            _ => None,
        })
        .expect("cleanup event");
    assert_eq!(cleanup, (1, 1));

    // Dead coordinators reject further beats
    assert!(monitor
        .register_heartbeat("coord-1", 2, HashMap::new())
        .await
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_regular_beats_never_escalate() {
    let (monitor, bus, _store) = setup();
    let mut events = bus.subscribe();

    monitor.register_coordinator("coord-1", &[]).await.unwrap();
    for iteration in 1..=5 {
        monitor
            .register_heartbeat("coord-1", iteration, HashMap::new())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        monitor.sweep().await;
    }

    assert_eq!(
        monitor.coordinator_health("coord-1").await.unwrap(),
        HealthStatus::Alive
    );
    assert!(drain(&mut events)
        .iter()
        .all(|e| e.event_type() != "heartbeat:stale"));
}

#[tokio::test(start_paused = true)]
async fn test_beat_resets_escalation() {
    let (monitor, _bus, _store) = setup();
    monitor.register_coordinator("coord-1", &[]).await.unwrap();

    tokio::time::advance(STALE).await;
    monitor.sweep().await;
    assert_eq!(
        monitor.coordinator_health("coord-1").await.unwrap(),
        HealthStatus::Warning
    );

    monitor
        .register_heartbeat("coord-1", 1, HashMap::new())
        .await
        .unwrap();
    assert_eq!(
        monitor.coordinator_health("coord-1").await.unwrap(),
        HealthStatus::Alive
    );

    // Escalation starts over from the fresh beat
    tokio::time::advance(STALE).await;
    monitor.sweep().await;
    assert_eq!(
        monitor.coordinator_health("coord-1").await.unwrap(),
        HealthStatus::Warning
    );
}

#[tokio::test]
async fn test_cleanup_removes_signals_in_both_directions() {
    let (monitor, bus, store) = setup();
    monitor.register_coordinator("doomed", &[]).await.unwrap();

    let protocol = SignalProtocol::new(
        store.clone(),
        bus.clone(),
        CoordinationConfig::with_secret("lifecycle-secret"),
    )
    .unwrap();
    // One signal addressed to the coordinator, one written by it
    protocol
        .send_signal("other", "doomed", SignalType::Completion, 1, serde_json::json!({}))
        .await
        .unwrap();
    protocol
        .send_signal("doomed", "other", SignalType::StatusUpdate, 1, serde_json::json!({}))
        .await
        .unwrap();

    monitor
        .mark_coordinator_dead("doomed", "test shutdown")
        .await
        .unwrap();

    assert!(store.scan("coordination:signal:*").await.unwrap().is_empty());
    assert!(!store
        .exists("coordination:heartbeat:doomed")
        .await
        .unwrap());

    // Repeat cleanup reports nothing left and is not an error
    let repeat = monitor.cleanup_dead_coordinator("doomed").await.unwrap();
    assert_eq!(repeat.total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_restarts_the_lifecycle() {
    let (monitor, bus, _store) = setup();
    let mut events = bus.subscribe();

    monitor.register_coordinator("coord-1", &[]).await.unwrap();
    monitor
        .register_heartbeat("coord-1", 1, HashMap::new())
        .await
        .unwrap();
    monitor
        .mark_coordinator_dead("coord-1", "operator action")
        .await
        .unwrap();

    assert!(monitor.recover_coordinator("coord-1").await.unwrap());
    assert_eq!(
        monitor.coordinator_health("coord-1").await.unwrap(),
        HealthStatus::Alive
    );
    assert!(drain(&mut events)
        .iter()
        .any(|e| e.event_type() == "coordinator:recovered"));

    // Sequence continues, it does not restart
    let record = monitor
        .register_heartbeat("coord-1", 2, HashMap::new())
        .await
        .unwrap();
    assert_eq!(record.sequence, 2);

    // A recovered coordinator escalates again if it goes quiet
    tokio::time::advance(STALE).await;
    monitor.sweep().await;
    assert_eq!(
        monitor.coordinator_health("coord-1").await.unwrap(),
        HealthStatus::Warning
    );
}

#[tokio::test]
async fn test_unregister_evicts_completely() {
    let (monitor, _bus, store) = setup();
    monitor
        .register_coordinator("coord-1", &["a1".to_string()])
        .await
        .unwrap();

    monitor.unregister_coordinator("coord-1").await.unwrap();
    assert!(!store
        .exists("coordination:heartbeat:coord-1")
        .await
        .unwrap());
    // Unlike DEAD, an unregistered coordinator cannot be recovered
    assert!(!monitor.recover_coordinator("coord-1").await.unwrap());
    assert!(monitor.coordinator_health("coord-1").await.is_err());
}
