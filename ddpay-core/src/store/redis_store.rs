//! Redis-backed ephemeral store.
//!
//! Values are plain strings written with `SET .. PX`. Change notifications
//! come from Redis keyspace events on the `__keyspace@{db}__:` channels, so
//! the server needs `notify-keyspace-events` to cover generic, string and
//! expiry events (`Kg$x`). `connect` tries to enable that and only warns
//! when the server refuses `CONFIG SET`.

use super::{EphemeralStore, StoreError, StoreEvent, StoreEventKind};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 1024;
const SCAN_BATCH: usize = 256;
const KEYSPACE_EVENTS: &str = "Kg$x";
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Channel prefix of keyspace notifications for database `db`.
fn keyspace_prefix(db: i64) -> String {
    format!("__keyspace@{db}__:")
}

/// Map one keyspace notification to a store event.
///
/// Operations other than `set`, `del` and `expired` are ignored.
fn keyspace_event(prefix: &str, channel: &str, operation: &str) -> Option<StoreEvent> {
    let key = channel.strip_prefix(prefix)?;
    let kind = match operation {
        "set" => StoreEventKind::Set,
        "del" => StoreEventKind::Del,
        "expired" => StoreEventKind::Expired,
        _ => return None,
    };
    Some(StoreEvent {
        key: key.to_owned(),
        kind,
    })
}

/// Interpret a `PTTL` reply. Missing keys and keys without expiry are `None`.
fn ttl_from_pttl(millis: i64) -> Option<Duration> {
    u64::try_from(millis).ok().map(Duration::from_millis)
}

/// Ephemeral store shared by every gateway process pointed at one Redis.
pub struct RedisStore {
    client: Client,
    connection: ConnectionManager,
    db: i64,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl RedisStore {
    /// Connect to `url` (`redis://` or `rediss://`, optional `/db`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let db = client.get_connection_info().redis.db;
        let connection = ConnectionManager::new(client.clone()).await?;
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let store = Self {
            client,
            connection,
            db,
            events_tx,
        };
        store.enable_keyspace_events().await;
        info!(db, "Connected to Redis store");
        Ok(store)
    }

    async fn enable_keyspace_events(&self) {
        let mut conn = self.connection.clone();
        let result: Result<(), RedisError> = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg(KEYSPACE_EVENTS)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(
                error = %e,
                required = KEYSPACE_EVENTS,
                "Could not enable keyspace notifications, configure notify-keyspace-events on the server"
            );
        }
    }

    /// Forward keyspace notifications to subscribers until shutdown,
    /// resubscribing after connection loss.
    pub fn spawn_notifications(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Redis notification task shutting down");
                            break;
                        }
                    }

                    result = store.follow_keyspace() => {
                        match result {
                            Ok(()) => warn!("Redis notification stream ended, resubscribing"),
                            Err(e) => warn!(error = %e, "Redis notification subscription failed"),
                        }
                        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    }
                }
            }
        })
    }

    async fn follow_keyspace(&self) -> Result<(), RedisError> {
        let prefix = keyspace_prefix(self.db);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(format!("{prefix}*")).await?;
        debug!(pattern = %format!("{prefix}*"), "Subscribed to keyspace notifications");

        let mut messages = pubsub.on_message();
        while let Some(message) = messages.next().await {
            let operation: String = match message.get_payload() {
                Ok(operation) => operation,
                Err(e) => {
                    debug!(error = %e, "Skipping non-text keyspace notification");
                    continue;
                }
            };
            if let Some(event) = keyspace_event(&prefix, message.get_channel_name(), &operation) {
                // Nobody listening is fine.
                let _ = self.events_tx.send(event);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.connection.clone();
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(ttl_from_pttl(millis))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }
}
