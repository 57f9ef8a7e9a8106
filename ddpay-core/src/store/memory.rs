use super::{EphemeralStore, StoreError, StoreEvent, StoreEventKind, glob_match};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-process ephemeral store backed by DashMap.
///
/// Expiry is lazy on access; [`purge_expired`](MemoryStore::purge_expired)
/// (or the janitor task) sweeps keys nobody reads and publishes their
/// `Expired` notifications. Contents are lost on restart.
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            entries: DashMap::new(),
            events_tx,
        }
    }

    fn publish(&self, key: &str, kind: StoreEventKind) {
        // Nobody listening is fine.
        let _ = self.events_tx.send(StoreEvent {
            key: key.to_owned(),
            kind,
        });
    }

    /// Remove `key` if it has expired by `now`. Returns whether it was removed.
    fn evict_if_expired(&self, key: &str, now: Instant) -> bool {
        let evicted = self
            .entries
            .remove_if(key, |_, stored| stored.is_expired(now))
            .is_some();
        if evicted {
            self.publish(key, StoreEventKind::Expired);
        }
        evicted
    }

    /// Drop every expired key. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|key| self.evict_if_expired(key, now))
            .count()
    }

    /// Spawn a task that purges expired keys every `interval` until shutdown.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("MemoryStore janitor shutting down");
                            break;
                        }
                    }

                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(purged, "Purged expired keys");
                        }
                    }
                }
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        if self.evict_if_expired(key, now) {
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|stored| stored.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_owned(),
            StoredValue {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        self.publish(key, StoreEventKind::Set);
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut live = Vec::new();
        let mut expired = Vec::new();
        for entry in self.entries.iter() {
            if !glob_match(pattern, entry.key()) {
                continue;
            }
            if entry.value().is_expired(now) {
                expired.push(entry.key().clone());
            } else {
                live.push(entry.key().clone());
            }
        }
        // Evict after the iterator's shard locks are released.
        for key in &expired {
            self.evict_if_expired(key, now);
        }
        Ok(live)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.publish(key, StoreEventKind::Del);
        }
        Ok(existed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        if self.evict_if_expired(key, now) {
            return Ok(None);
        }
        Ok(self
            .entries
            .get(key)
            .map(|stored| stored.expires_at.saturating_duration_since(now)))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_values_expire_after_ttl() {
        let store = MemoryStore::new();
        store.set("bsc_1_a", "v".into(), MINUTE).await.unwrap();
        assert_eq!(store.get("bsc_1_a").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(MINUTE / 2).await;
        assert_eq!(store.ttl("bsc_1_a").await.unwrap(), Some(MINUTE / 2));

        tokio::time::advance(MINUTE).await;
        assert_eq!(store.get("bsc_1_a").await.unwrap(), None);
        assert_eq!(store.ttl("bsc_1_a").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_skips_expired_and_unmatched_keys() {
        let store = MemoryStore::new();
        store.set("bsc_1_a", "1".into(), MINUTE).await.unwrap();
        store.set("bsc_1_b", "2".into(), 3 * MINUTE).await.unwrap();
        store.set("bsc_2_a", "3".into(), 3 * MINUTE).await.unwrap();

        tokio::time::advance(2 * MINUTE).await;
        let keys = store.scan("bsc_1_*").await.unwrap();
        assert_eq!(keys, vec!["bsc_1_b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_cover_set_del_and_expiry() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();

        store.set("k1", "v".into(), MINUTE).await.unwrap();
        store.set("k2", "v".into(), MINUTE).await.unwrap();
        assert!(store.del("k1").await.unwrap());
        assert!(!store.del("k1").await.unwrap());
        tokio::time::advance(2 * MINUTE).await;
        assert_eq!(store.purge_expired(), 1);

        let kinds: Vec<(String, StoreEventKind)> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| (e.key, e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("k1".to_string(), StoreEventKind::Set),
                ("k2".to_string(), StoreEventKind::Set),
                ("k1".to_string(), StoreEventKind::Del),
                ("k2".to_string(), StoreEventKind::Expired),
            ]
        );
    }
}
