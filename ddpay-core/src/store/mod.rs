//! Ephemeral key-value store abstraction.
//!
//! Pending orders live only here. The store is a flat map of string keys to
//! string values with per-key TTL, glob scans, and a change-notification
//! stream. There are no cross-key transactions.
//!
//! [`MemoryStore`] serves a single process; [`RedisStore`] lets several
//! gateway processes share orders.

#[cfg(test)]
mod flaky;
mod memory;
mod pattern;
mod redis_store;

pub use memory::MemoryStore;
pub use pattern::glob_match;
pub use redis_store::RedisStore;

#[cfg(test)]
pub(crate) use flaky::FlakyStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the command.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Set,
    Del,
    Expired,
}

/// Change notification published for every write, delete, or expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: String,
    pub kind: StoreEventKind,
}

/// Capabilities the engine consumes from the ephemeral store.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Read a live value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// List live keys matching a glob pattern (`*` and `?`).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining time to live of a key, `None` if absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
