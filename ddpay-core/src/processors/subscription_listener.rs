//! Starts chain watchers when orders appear in the store.
//!
//! Every write to an order key is decoded into a validated
//! [`SubscriptionDescriptor`]; a valid pending order makes sure the watcher
//! of its chain runs. One watcher serves every merchant on its chain, so
//! most notifications find it already running.

use crate::entities::pending_order::{PendingOrder, chain_pattern};
use crate::processors::watcher_registry::WatcherRegistry;
use crate::store::{EphemeralStore, StoreEvent, StoreEventKind, glob_match};
use alloy::primitives::Address;
use ddpay_sdk::objects::Chain;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("key {0:?} does not name a chain")]
    UnrecognizedKey(String),

    #[error("malformed descriptor: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("descriptor chain {body} does not match key chain {key}")]
    ChainMismatch { key: Chain, body: Chain },

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("amount {0} is not positive")]
    NonPositiveAmount(Decimal),

    #[error("descriptor expired at {0}")]
    Expired(OffsetDateTime),
}

/// A pending payment on an EVM chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmSubscription {
    pub merchant_id: u32,
    pub chain: Chain,
    /// Exact amount expected on-chain.
    pub amount: Decimal,
    pub address: Address,
    pub expires_at: OffsetDateTime,
}

/// What a watcher must look for, per chain family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionDescriptor {
    Evm(EvmSubscription),
}

impl SubscriptionDescriptor {
    pub fn chain(&self) -> Chain {
        match self {
            SubscriptionDescriptor::Evm(sub) => sub.chain,
        }
    }

    /// Decode the value stored under `key`.
    ///
    /// Settled orders need no watching and yield `Ok(None)`.
    pub fn decode(
        key: &str,
        raw: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Self>, DescriptorError> {
        let key_chain = key
            .split_once('_')
            .and_then(|(prefix, _)| prefix.parse::<Chain>().ok())
            .ok_or_else(|| DescriptorError::UnrecognizedKey(key.to_owned()))?;

        let order = PendingOrder::decode(raw)?;
        if !order.is_pending() {
            return Ok(None);
        }
        if order.chain != key_chain {
            return Err(DescriptorError::ChainMismatch {
                key: key_chain,
                body: order.chain,
            });
        }
        let address = order
            .address
            .parse::<Address>()
            .map_err(|_| DescriptorError::InvalidAddress(order.address.clone()))?;
        if order.actual_amount <= Decimal::ZERO {
            return Err(DescriptorError::NonPositiveAmount(order.actual_amount));
        }
        if order.expires_at <= now {
            return Err(DescriptorError::Expired(order.expires_at));
        }

        Ok(Some(SubscriptionDescriptor::Evm(EvmSubscription {
            merchant_id: order.merchant_id,
            chain: order.chain,
            amount: order.actual_amount,
            address,
            expires_at: order.expires_at,
        })))
    }
}

pub struct SubscriptionListener {
    store: Arc<dyn EphemeralStore>,
    registry: Arc<WatcherRegistry>,
    patterns: Vec<String>,
}

impl SubscriptionListener {
    pub fn new(store: Arc<dyn EphemeralStore>, registry: Arc<WatcherRegistry>) -> Self {
        let patterns = registry
            .configured_chains()
            .into_iter()
            .map(chain_pattern)
            .collect();
        Self {
            store,
            registry,
            patterns,
        }
    }

    fn is_watched_key(&self, key: &str) -> bool {
        self.patterns.iter().any(|pattern| glob_match(pattern, key))
    }

    /// Handle one written key. Returns whether it started a watcher.
    pub async fn on_key(&self, key: &str) -> bool {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!(key, error = %e, "Failed to read subscribed key");
                return false;
            }
        };

        let descriptor = match SubscriptionDescriptor::decode(key, &raw, OffsetDateTime::now_utc()) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => return false,
            Err(e) => {
                warn!(key, error = %e, "Rejected subscription descriptor");
                return false;
            }
        };

        let chain = descriptor.chain();
        match self.registry.ensure_running(chain) {
            Ok(started) => {
                if started {
                    info!(chain = %chain, key, "Started chain watcher for new order");
                }
                started
            }
            Err(e) => {
                error!(chain = %chain, key, error = %e, "Failed to start chain watcher");
                false
            }
        }
    }

    /// Check every order already in the store.
    ///
    /// Covers orders written before the listener subscribed and any
    /// notifications lost to lag.
    pub async fn resume_pending(&self) -> usize {
        let mut started = 0;
        for pattern in &self.patterns {
            let keys = match self.store.scan(pattern).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Failed to scan pending orders");
                    continue;
                }
            };
            for key in keys {
                if self.on_key(&key).await {
                    started += 1;
                }
            }
        }
        started
    }

    /// Follow store notifications until shutdown.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut events = self.store.subscribe();
        let resumed = self.resume_pending().await;
        info!(
            patterns = ?self.patterns,
            resumed,
            "Subscription listener started"
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Subscription listener shutting down");
                        break;
                    }
                }

                event = events.recv() => match event {
                    Ok(StoreEvent { key, kind: StoreEventKind::Set }) => {
                        if self.is_watched_key(&key) {
                            self.on_key(&key).await;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Store notifications lagged, rescanning");
                        self.resume_pending().await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Store notification stream closed");
                        break;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::chain_watcher::tests::pending_order;
    use crate::processors::watcher_registry::tests::registry;
    use crate::store::MemoryStore;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(1800);

    #[test]
    fn test_decode_valid_descriptor() {
        let order = pending_order("A1", "10.01");
        let now = OffsetDateTime::now_utc();
        let descriptor = SubscriptionDescriptor::decode("bsc_42_A1", &order.encode().unwrap(), now)
            .unwrap()
            .unwrap();
        let SubscriptionDescriptor::Evm(sub) = descriptor;
        assert_eq!(sub.chain, Chain::Bsc);
        assert_eq!(sub.merchant_id, 42);
        assert_eq!(sub.amount, order.actual_amount);
        assert_eq!(sub.address.to_checksum(None), order.address);
    }

    #[test]
    fn test_decode_rejects_invalid_descriptors() {
        let now = OffsetDateTime::now_utc();
        let order = pending_order("A1", "10.01");

        assert!(matches!(
            SubscriptionDescriptor::decode("bsc_42_A1", "{not json", now),
            Err(DescriptorError::Malformed(_))
        ));
        assert!(matches!(
            SubscriptionDescriptor::decode("doge_42_A1", &order.encode().unwrap(), now),
            Err(DescriptorError::UnrecognizedKey(_))
        ));
        assert!(matches!(
            SubscriptionDescriptor::decode("pol_42_A1", &order.encode().unwrap(), now),
            Err(DescriptorError::ChainMismatch {
                key: Chain::Polygon,
                body: Chain::Bsc
            })
        ));

        let bad_address = PendingOrder {
            address: "0xnothex".into(),
            ..order.clone()
        };
        assert!(matches!(
            SubscriptionDescriptor::decode("bsc_42_A1", &bad_address.encode().unwrap(), now),
            Err(DescriptorError::InvalidAddress(_))
        ));

        let zero = PendingOrder {
            actual_amount: Decimal::ZERO,
            ..order.clone()
        };
        assert!(matches!(
            SubscriptionDescriptor::decode("bsc_42_A1", &zero.encode().unwrap(), now),
            Err(DescriptorError::NonPositiveAmount(_))
        ));

        let later = now + Duration::from_secs(3600);
        assert!(matches!(
            SubscriptionDescriptor::decode("bsc_42_A1", &order.encode().unwrap(), later),
            Err(DescriptorError::Expired(_))
        ));
    }

    #[test]
    fn test_decode_ignores_settled_orders() {
        let settled = pending_order("A1", "10.01")
            .into_settled(OffsetDateTime::now_utc(), Duration::from_secs(3600));
        let decoded = SubscriptionDescriptor::decode(
            "bsc_42_A1",
            &settled.encode().unwrap(),
            OffsetDateTime::now_utc(),
        )
        .unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn test_resume_starts_watchers_for_existing_orders() {
        let store = Arc::new(MemoryStore::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (registry, builds) = registry(store.clone(), shutdown_rx);
        let registry = Arc::new(registry);

        let order = pending_order("A1", "10.01");
        store
            .set(&order.key(), order.encode().unwrap(), TTL)
            .await
            .unwrap();
        // Unwatched prefix.
        store.set("pol_42_A1", "{}".into(), TTL).await.unwrap();

        let listener = SubscriptionListener::new(store.clone(), registry.clone());
        assert_eq!(listener.resume_pending().await, 1);
        assert_eq!(listener.resume_pending().await, 0);
        assert!(registry.get(Chain::Bsc).is_some());
        assert_eq!(builds.load(std::sync::atomic::Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        registry.join_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_starts_watcher_on_order_write() {
        let store = Arc::new(MemoryStore::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (registry, builds) = registry(store.clone(), shutdown_rx.clone());
        let registry = Arc::new(registry);

        let listener = SubscriptionListener::new(store.clone(), registry.clone());
        let handle = tokio::spawn(listener.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.get(Chain::Bsc).is_none());

        // Malformed value on a watched key starts nothing.
        store.set("bsc_42_bad", "garbage".into(), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.get(Chain::Bsc).is_none());

        for order_id in ["A1", "A2"] {
            let order = pending_order(order_id, "10.01");
            store
                .set(&order.key(), order.encode().unwrap(), TTL)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.get(Chain::Bsc).is_some());
        assert!(registry.get(Chain::ArbitrumOne).is_none());
        assert_eq!(builds.load(std::sync::atomic::Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        registry.join_all().await;
    }
}
