//! Event bus for coordination events.
//!
//! Pub/sub messaging over Tokio broadcast channels, with a relay that
//! mirrors every event to the store's audit channel.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{AuditRecord, CoordinationEvent};
use crate::store::{keys, SharedStore};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event bus operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Failed to send event: {0}")]
    SendFailed(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast delivery
pub struct EventBus {
    /// Broadcast sender for publishing events
    sender: broadcast::Sender<CoordinationEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CoordinationEvent) -> EventBusResult<()> {
        let event_type = event.event_type();

        // Broadcast to subscribers (ignore if no receivers)
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                Ok(())
            }
            Err(_) => {
                // No receivers is OK
                debug!(event_type, "Event published (no receivers)");
                Ok(())
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the bus has any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
pub struct EventFilter {
    /// Filter by coordinator ID
    pub coordinator_id: Option<String>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self {
            coordinator_id: None,
            event_types: None,
        }
    }

    /// Filter by coordinator ID
    pub fn coordinator(mut self, coordinator_id: &str) -> Self {
        self.coordinator_id = Some(coordinator_id.to_string());
        self
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &CoordinationEvent) -> bool {
        if let Some(ref cid) = self.coordinator_id {
            if event.coordinator_id() != Some(cid.as_str()) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<CoordinationEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<CoordinationEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<CoordinationEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

/// Relay that mirrors bus events onto the store's audit channel.
///
/// External observers that cannot hold an in-process bus subscription watch
/// the audit channel instead. Delivery is fire-and-forget: a publish failure
/// is logged and the relay keeps going.
pub struct AuditRelay {
    handle: JoinHandle<()>,
}

impl AuditRelay {
    /// Spawn the relay task.
    pub fn spawn(bus: &EventBus, store: SharedStore) -> Self {
        let mut receiver = bus.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Audit relay lagged, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let record = AuditRecord::for_event(&event);
                let payload = match serde_json::to_string(&record) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize audit record");
                        continue;
                    }
                };
                if let Err(e) = store.publish(keys::AUDIT_CHANNEL, &payload).await {
                    warn!(error = %e, event_type = record.event_type, "Audit publish failed");
                }
            }
        });
        Self { handle }
    }

    /// Stop the relay task.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for AuditRelay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
