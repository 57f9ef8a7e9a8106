//! Store double whose operations can be made to fail.

use super::{EphemeralStore, MemoryStore, StoreError, StoreEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
pub(crate) struct FlakyStore {
    pub(crate) inner: MemoryStore,
    pub(crate) fail_sets: AtomicBool,
    pub(crate) fail_scans: AtomicBool,
}

impl FlakyStore {
    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EphemeralStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        Self::check(&self.fail_sets)?;
        self.inner.set(key, value, ttl).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        Self::check(&self.fail_scans)?;
        self.inner.scan(pattern).await
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.del(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.inner.ttl(key).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}
