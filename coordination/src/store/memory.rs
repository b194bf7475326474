//! In-process coordination store.
//!
//! Backs the [`CoordinationStore`] contract with a map guarded by an async
//! lock. Expiry is lazy: expired entries are dropped when touched or scanned.
//! Pub/sub uses one broadcast channel per subscribed channel name.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;

use super::{CoordinationStore, StoreResult};

/// Broadcast capacity per pub/sub channel.
const CHANNEL_CAPACITY: usize = 256;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-memory TTL key-value store with pub/sub.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a pub/sub channel. Only available on the concrete type;
    /// the trait side is publish-only.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Match `key` against a pattern where `*` matches any run of characters.
    fn matches(pattern: &str, key: &str) -> bool {
        let segments: Vec<&str> = pattern.split('*').collect();
        if segments.len() == 1 {
            return pattern == key;
        }
        let mut rest = key;
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                continue;
            }
            if i == 0 {
                match rest.strip_prefix(segment) {
                    Some(r) => rest = r,
                    None => return false,
                }
            } else if i == segments.len() - 1 {
                return rest.ends_with(segment);
            } else {
                match rest.find(segment) {
                    Some(pos) => rest = &rest[pos + segment.len()..],
                    None => return false,
                }
            }
        }
        true
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn del(&self, keys: &[String]) -> StoreResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut deleted = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| !entry.expired(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| Self::matches(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|entry| {
            entry
                .expires_at
                .filter(|_| !entry.expired(now))
                .map(|at| at - now)
        }))
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<usize> {
        let channels = self.channels.lock().await;
        match channels.get(channel) {
            Some(sender) => Ok(sender.send(message.to_string()).unwrap_or(0)),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = MemoryStore::new();
        store.set("k1", "v1", None).await.unwrap();

        assert_eq!(store.get("k1").await.unwrap(), Some("v1".to_string()));
        assert!(store.exists("k1").await.unwrap());

        let deleted = store
            .del(&["k1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.get("k1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("k1", "v1", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(store.ttl("k1").await.unwrap().unwrap() <= Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k1").await.unwrap(), None);
        assert!(!store.exists("k1").await.unwrap());
        assert_eq!(store.ttl("k1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_not_scanned() {
        let store = MemoryStore::new();
        store
            .set("coordination:signal:a:completion", "1", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        store
            .set("coordination:signal:b:completion", "2", None)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        let keys = store.scan("coordination:signal:*").await.unwrap();
        assert_eq!(keys, vec!["coordination:signal:b:completion".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_patterns() {
        let store = MemoryStore::new();
        for key in [
            "coordination:heartbeat:c1",
            "coordination:signal:c1:completion",
            "coordination:signal:c2:error",
            "coordination:ack:c1:completion",
        ] {
            store.set(key, "x", None).await.unwrap();
        }

        let signals = store.scan("coordination:signal:*").await.unwrap();
        assert_eq!(signals.len(), 2);

        let c1_signals = store.scan("coordination:signal:c1:*").await.unwrap();
        assert_eq!(c1_signals, vec!["coordination:signal:c1:completion".to_string()]);

        let exact = store.scan("coordination:heartbeat:c1").await.unwrap();
        assert_eq!(exact.len(), 1);

        let middle = store.scan("coordination:*:c1:completion").await.unwrap();
        assert_eq!(middle.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let store = MemoryStore::new();

        // No subscribers yet: message is dropped, not an error
        assert_eq!(store.publish("ch", "lost").await.unwrap(), 0);

        let mut rx = store.subscribe("ch").await;
        assert_eq!(store.publish("ch", "hello").await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn test_pattern_matching() {
        assert!(MemoryStore::matches("a:*", "a:b"));
        assert!(MemoryStore::matches("a:*:c", "a:b:c"));
        assert!(MemoryStore::matches("*", "anything"));
        assert!(!MemoryStore::matches("a:*:c", "a:b:d"));
        assert!(!MemoryStore::matches("a:b", "a:bc"));
    }
}
