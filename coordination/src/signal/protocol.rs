//! Signal protocol over the shared store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::crypto::SignatureKey;
use super::types::{AckEnvelope, DeliveryResult, SendReceipt, SignalEnvelope, SignalType};
use super::{SignalError, SignalResult};
use crate::config::CoordinationConfig;
use crate::events::{CoordinationEvent, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
use crate::identity::validate_identifier;
use crate::store::{keys, SharedStore};

/// Initial ACK polling delay.
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
/// Polling delay cap.
const BACKOFF_CAP: Duration = Duration::from_millis(500);

/// Shared reference to SignalProtocol
pub type SharedSignalProtocol = Arc<SignalProtocol>;

/// Signal delivery between coordinators.
pub struct SignalProtocol {
    store: SharedStore,
    bus: SharedEventBus,
    key: SignatureKey,
    config: CoordinationConfig,
}

impl SignalProtocol {
    pub fn new(
        store: SharedStore,
        bus: SharedEventBus,
        config: CoordinationConfig,
    ) -> SignalResult<Self> {
        let key = SignatureKey::new(&config.shared_secret)?;
        Ok(Self {
            store,
            bus,
            key,
            config,
        })
    }

    /// Create a shared reference to this protocol
    pub fn shared(self) -> SharedSignalProtocol {
        Arc::new(self)
    }

    fn emit(&self, event: CoordinationEvent) {
        let _ = self.bus.publish(event);
    }

    /// Write a signal for a receiver. Last write wins per `(receiver, type)`;
    /// re-sending an identical signal is a no-op flagged as a duplicate.
    pub async fn send_signal(
        &self,
        sender_id: &str,
        receiver_id: &str,
        signal_type: SignalType,
        iteration: u64,
        payload: serde_json::Value,
    ) -> SignalResult<SendReceipt> {
        validate_identifier(sender_id)?;
        validate_identifier(receiver_id)?;

        let envelope =
            SignalEnvelope::new(sender_id, receiver_id, signal_type, iteration, payload);
        let key = keys::signal(receiver_id, &signal_type.to_string());

        if let Some(existing) = self.store.get(&key).await? {
            if let Ok(existing) = serde_json::from_str::<SignalEnvelope>(&existing) {
                if existing.message_id == envelope.message_id {
                    debug!(message_id = %envelope.message_id, key, "Duplicate signal dropped");
                    self.emit(CoordinationEvent::SignalSent {
                        sender_id: sender_id.to_string(),
                        receiver_id: receiver_id.to_string(),
                        signal_type,
                        message_id: envelope.message_id.clone(),
                        duplicate: true,
                        timestamp: Utc::now(),
                    });
                    return Ok(SendReceipt {
                        message_id: envelope.message_id,
                        key,
                        duplicate: true,
                    });
                }
                debug!(
                    old = %existing.message_id,
                    new = %envelope.message_id,
                    key,
                    "Superseding unconsumed signal"
                );
            }
        }

        let json = serde_json::to_string(&envelope)?;
        self.store
            .set(
                &key,
                &json,
                Some(Duration::from_secs(self.config.signal_ttl_secs)),
            )
            .await?;

        info!(sender_id, receiver_id, %signal_type, message_id = %envelope.message_id, "Signal sent");
        self.emit(CoordinationEvent::SignalSent {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            signal_type,
            message_id: envelope.message_id.clone(),
            duplicate: false,
            timestamp: envelope.timestamp,
        });
        Ok(SendReceipt {
            message_id: envelope.message_id,
            key,
            duplicate: false,
        })
    }

    /// Return the newest unconsumed signal addressed to a receiver, without
    /// consuming it.
    pub async fn receive_signal(&self, receiver_id: &str) -> SignalResult<Option<SignalEnvelope>> {
        validate_identifier(receiver_id)?;

        let mut newest: Option<SignalEnvelope> = None;
        for key in self.store.scan(&keys::signals_to(receiver_id)).await? {
            let Some(value) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<SignalEnvelope>(&value) {
                Ok(envelope) => {
                    let is_newer = newest
                        .as_ref()
                        .map_or(true, |current| envelope.timestamp > current.timestamp);
                    if is_newer {
                        newest = Some(envelope);
                    }
                }
                Err(e) => warn!(key, error = %e, "Skipping malformed signal envelope"),
            }
        }
        Ok(newest)
    }

    /// Consume a pending signal and write back a signed acknowledgement.
    /// Returns the ACK key.
    pub async fn receive_signal_and_ack(
        &self,
        receiver_id: &str,
        signal_type: SignalType,
        iteration: u64,
    ) -> SignalResult<String> {
        validate_identifier(receiver_id)?;

        let signal_key = keys::signal(receiver_id, &signal_type.to_string());
        let value = self
            .store
            .get(&signal_key)
            .await?
            .ok_or_else(|| SignalError::SignalNotFound {
                key: signal_key.clone(),
            })?;
        let envelope: SignalEnvelope = serde_json::from_str(&value)?;

        let now = Utc::now();
        let processing_time_ms = (now - envelope.timestamp).num_milliseconds().max(0) as u64;
        let ts_millis = now.timestamp_millis().to_string();
        let iteration_str = iteration.to_string();
        let signature = self.key.sign(&[
            receiver_id,
            &envelope.message_id,
            &ts_millis,
            &iteration_str,
        ]);

        let ack = AckEnvelope {
            coordinator_id: receiver_id.to_string(),
            message_id: envelope.message_id.clone(),
            iteration,
            timestamp: now,
            processing_time_ms,
            signature,
        };

        let ack_key = keys::ack(receiver_id, &signal_type.to_string());
        let json = serde_json::to_string(&ack)?;
        self.store
            .set(
                &ack_key,
                &json,
                Some(Duration::from_secs(self.config.ack_ttl_secs)),
            )
            .await?;
        self.store.del(&[signal_key]).await?;

        info!(
            receiver_id,
            message_id = %envelope.message_id,
            processing_time_ms,
            "Signal consumed and acknowledged"
        );
        Ok(ack_key)
    }

    /// Send a signal and wait for its acknowledgement.
    ///
    /// Polls with exponential backoff up to `timeout` (the configured ACK
    /// timeout when `None`). Timing out or losing the receiver is reported
    /// in the [`DeliveryResult`], not as an error; retry policy belongs to
    /// the caller.
    pub async fn send_signal_with_ack(
        &self,
        sender_id: &str,
        receiver_id: &str,
        signal_type: SignalType,
        iteration: u64,
        payload: serde_json::Value,
        timeout: Option<Duration>,
    ) -> SignalResult<DeliveryResult> {
        validate_identifier(sender_id)?;
        validate_identifier(receiver_id)?;

        // Subscribe before sending so a death between send and first poll
        // is not missed.
        let mut dead_watch = Some(self.bus.subscribe_filtered(
            EventFilter::new()
                .coordinator(receiver_id)
                .types(vec!["coordinator:dead"]),
        ));

        let receipt = self
            .send_signal(sender_id, receiver_id, signal_type, iteration, payload)
            .await?;
        let ack_key = keys::ack(receiver_id, &signal_type.to_string());

        let started = Instant::now();
        let deadline =
            started + timeout.unwrap_or(Duration::from_millis(self.config.ack_timeout_ms));
        let mut backoff = BACKOFF_INITIAL;

        loop {
            if let Some(ack) = self.poll_ack(&ack_key, &receipt.message_id).await? {
                let delivery_time_ms = started.elapsed().as_millis() as u64;
                self.verify_ack(receiver_id, &ack)?;
                self.store.del(&[ack_key.clone()]).await?;
                self.emit(CoordinationEvent::SignalAckReceived {
                    sender_id: sender_id.to_string(),
                    receiver_id: receiver_id.to_string(),
                    signal_type,
                    delivery_time_ms,
                    timestamp: Utc::now(),
                });
                info!(sender_id, receiver_id, delivery_time_ms, "Delivery confirmed");
                return Ok(DeliveryResult::delivered(ack, delivery_time_ms));
            }

            let now = Instant::now();
            if now >= deadline {
                let elapsed = started.elapsed().as_millis() as u64;
                warn!(sender_id, receiver_id, %signal_type, "ACK timeout");
                return Ok(DeliveryResult::failed("ACK timeout", elapsed));
            }
            let delay = backoff.min(deadline - now);

            let mut watch_lost = false;
            match dead_watch.as_mut() {
                Some(watch) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        event = recv_dead(watch) => match event {
                            DeadWatch::Dead => {
                                let elapsed = started.elapsed().as_millis() as u64;
                                warn!(sender_id, receiver_id, "Receiver declared dead, abandoning delivery");
                                return Ok(DeliveryResult::failed("receiver dead", elapsed));
                            }
                            DeadWatch::Lost => watch_lost = true,
                        },
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            if watch_lost {
                dead_watch = None;
            }
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    async fn poll_ack(
        &self,
        ack_key: &str,
        message_id: &str,
    ) -> SignalResult<Option<AckEnvelope>> {
        let Some(value) = self.store.get(ack_key).await? else {
            return Ok(None);
        };
        let ack: AckEnvelope = serde_json::from_str(&value)?;
        // An ACK for a superseded signal is left for its own sender
        if ack.message_id != message_id {
            return Ok(None);
        }
        Ok(Some(ack))
    }

    fn verify_ack(&self, receiver_id: &str, ack: &AckEnvelope) -> SignalResult<()> {
        let ts_millis = ack.timestamp.timestamp_millis().to_string();
        let iteration = ack.iteration.to_string();
        let parts = [receiver_id, ack.message_id.as_str(), &ts_millis, &iteration];
        if !self.key.verify(&parts, &ack.signature) {
            return Err(SignalError::InvalidAckSignature {
                message_id: ack.message_id.clone(),
            });
        }
        Ok(())
    }
}

/// Outcome of waiting on the dead-coordinator watch.
enum DeadWatch {
    Dead,
    Lost,
}

async fn recv_dead(watch: &mut FilteredReceiver) -> DeadWatch {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match watch.recv().await {
            Ok(_) => return DeadWatch::Dead,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return DeadWatch::Lost,
        }
    }
}
