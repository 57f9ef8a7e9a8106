//! Pending order allocation.
//!
//! Many orders of one merchant share a single receiving address, so each
//! pending order is told apart on-chain by a small offset added to the
//! requested amount. The offset is the smallest multiple of the configured
//! step not held by another pending order on the same address.

use crate::config::{ChainConfig, OrderConfig};
use crate::entities::pending_order::{PendingOrder, merchant_pattern, order_key};
use crate::orders::offset::next_offset;
use crate::store::{EphemeralStore, StoreError};
use crate::utils::amount::to_minor_units;
use crate::wallet::deriver::MAX_ACCOUNT_INDEX;
use crate::wallet::{DirectoryError, MerchantWalletDirectory};
use alloy::primitives::Address;
use dashmap::DashMap;
use ddpay_sdk::objects::{Chain, CreateOrderRequest, OrderResult, PaymentStatus};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order request: {0}")]
    InvalidRequest(String),

    #[error("chain {0} is not configured")]
    UnsupportedChain(Chain),

    #[error("order {0} already exists")]
    DuplicateOrder(String),

    #[error("order not found")]
    NotFound,

    #[error("wallet resolution failed: {0}")]
    Wallet(#[from] DirectoryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("order record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Creates pending orders and answers status queries.
pub struct OrderEngine {
    store: Arc<dyn EphemeralStore>,
    directory: MerchantWalletDirectory,
    chains: HashMap<Chain, ChainConfig>,
    config: OrderConfig,
    /// Serializes offset allocation per receiving address within this process.
    address_locks: DashMap<(Chain, Address), Arc<Mutex<()>>>,
}

impl OrderEngine {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        directory: MerchantWalletDirectory,
        chains: impl IntoIterator<Item = ChainConfig>,
        config: OrderConfig,
    ) -> Self {
        Self {
            store,
            directory,
            chains: chains.into_iter().map(|c| (c.chain, c)).collect(),
            config,
            address_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &OrderConfig {
        &self.config
    }

    fn validate(&self, request: &CreateOrderRequest) -> Result<&ChainConfig, OrderError> {
        let chain = self
            .chains
            .get(&request.chain)
            .ok_or(OrderError::UnsupportedChain(request.chain))?;
        if request.order_id.trim().is_empty() {
            return Err(OrderError::InvalidRequest("order id is empty".into()));
        }
        if request.merchant_id > MAX_ACCOUNT_INDEX {
            return Err(OrderError::InvalidRequest(format!(
                "merchant id {} exceeds {MAX_ACCOUNT_INDEX}",
                request.merchant_id
            )));
        }
        if request.amount <= Decimal::ZERO {
            return Err(OrderError::InvalidRequest(format!(
                "amount {} must be positive",
                request.amount
            )));
        }
        Ok(chain)
    }

    fn address_lock(&self, chain: Chain, address: Address) -> Arc<Mutex<()>> {
        self.address_locks
            .entry((chain, address))
            .or_default()
            .clone()
    }

    /// Offsets held by pending orders on `address`.
    async fn pending_offsets(
        &self,
        chain: Chain,
        merchant_id: u32,
        address: &str,
    ) -> Result<Vec<Decimal>, OrderError> {
        let keys = self.store.scan(&merchant_pattern(chain, merchant_id)).await?;
        let mut offsets = Vec::with_capacity(keys.len());
        for key in keys {
            // Expired between scan and read.
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match PendingOrder::decode(&raw) {
                Ok(order) if order.is_pending() && order.address.eq_ignore_ascii_case(address) => {
                    offsets.push(order.offset);
                }
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable order record"),
            }
        }
        Ok(offsets)
    }

    /// Allocate a pending order on the merchant's receiving address.
    #[tracing::instrument(
        skip_all,
        err,
        fields(merchant_id = request.merchant_id, chain = %request.chain, order_id = %request.order_id)
    )]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderResult, OrderError> {
        let chain_config = self.validate(&request)?;
        let wallet = self
            .directory
            .get_or_create(request.merchant_id, request.chain)
            .await?;
        let address = wallet.address.to_checksum(None);
        let key = order_key(request.chain, request.merchant_id, &request.order_id);

        let lock = self.address_lock(request.chain, wallet.address);
        let _guard = lock.lock().await;

        if self.store.get(&key).await?.is_some() {
            return Err(OrderError::DuplicateOrder(key));
        }

        let used = self
            .pending_offsets(request.chain, request.merchant_id, &address)
            .await?;
        let offset = next_offset(used, self.config.offset_step);
        // Past 28 significant digits an addition rounds and can swallow the offset.
        let actual_amount = request
            .amount
            .checked_add(offset)
            .filter(|actual| *actual - request.amount == offset)
            .ok_or_else(|| {
                OrderError::InvalidRequest(format!(
                    "amount {} cannot carry offset {offset}",
                    request.amount
                ))
            })?;
        if to_minor_units(actual_amount, chain_config.token_decimals).is_none() {
            return Err(OrderError::InvalidRequest(format!(
                "amount {actual_amount} exceeds {} decimals",
                chain_config.token_decimals
            )));
        }

        let now = OffsetDateTime::now_utc();
        let order = PendingOrder {
            merchant_id: request.merchant_id,
            chain: request.chain,
            order_id: request.order_id,
            amount: request.amount,
            offset,
            actual_amount,
            address,
            derivation_path: wallet.derivation_path,
            notify_url: request.notify_url,
            redirect_url: request.redirect_url,
            status: PaymentStatus::Pending,
            created_at: now,
            expires_at: now + self.config.ttl,
        };
        self.store.set(&key, order.encode()?, self.config.ttl).await?;

        let remaining = match self.store.ttl(&key).await {
            Ok(Some(ttl)) => ttl,
            Ok(None) => self.config.ttl,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read back order TTL");
                self.config.ttl
            }
        };

        info!(
            trade_id = %key,
            %actual_amount,
            address = %order.address,
            "Created pending order"
        );

        Ok(OrderResult {
            payment_url: self.config.payment_url(&order.order_id),
            trade_id: key,
            order_id: order.order_id,
            amount: order.amount,
            actual_amount,
            address: order.address,
            expiration_secs: remaining.as_secs(),
        })
    }

    /// Read an order by trade id. Expired and unknown ids are both `NotFound`.
    pub async fn get_order_status(&self, trade_id: &str) -> Result<PendingOrder, OrderError> {
        let raw = self
            .store
            .get(trade_id)
            .await?
            .ok_or(OrderError::NotFound)?;
        Ok(PendingOrder::decode(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::chain_config;
    use crate::store::{FlakyStore, MemoryStore};
    use crate::wallet::deriver::tests::TEST_MNEMONIC;
    use crate::wallet::{MemoryWalletRepository, WalletDeriver};
    use std::str::FromStr;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use url::Url;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn engine(store: Arc<dyn EphemeralStore>) -> OrderEngine {
        let deriver = WalletDeriver::init_global(TEST_MNEMONIC).unwrap();
        let directory =
            MerchantWalletDirectory::new(Arc::new(MemoryWalletRepository::new()), deriver);
        OrderEngine::new(
            store,
            directory,
            [chain_config(Chain::Bsc)],
            OrderConfig::new(Url::parse("https://pay.example/pay").unwrap()),
        )
    }

    fn request(order_id: &str, amount: &str) -> CreateOrderRequest {
        CreateOrderRequest {
            merchant_id: 42,
            chain: Chain::Bsc,
            order_id: order_id.into(),
            amount: dec(amount),
            notify_url: "https://shop.example/notify".into(),
            redirect_url: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_order_gets_one_step_offset() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let result = engine.create_order(request("A1", "10.00")).await.unwrap();

        assert_eq!(result.trade_id, "bsc_42_A1");
        assert_eq!(result.actual_amount, dec("10.01"));
        assert_eq!(result.expiration_secs, 30 * 60);
        assert_eq!(result.payment_url, "https://pay.example/pay/A1");
        let expected = WalletDeriver::global().unwrap().derive_account(42).unwrap();
        assert_eq!(result.address, expected.address.to_checksum(None));
    }

    #[tokio::test]
    async fn test_sequential_orders_get_distinct_offsets() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut offsets = Vec::new();
        for (i, amount) in ["10.00", "10.00", "25.50"].into_iter().enumerate() {
            let result = engine
                .create_order(request(&format!("A{i}"), amount))
                .await
                .unwrap();
            offsets.push(result.actual_amount - result.amount);
        }
        assert_eq!(offsets, vec![dec("0.01"), dec("0.02"), dec("0.03")]);
    }

    #[tokio::test]
    async fn test_concurrent_orders_get_distinct_offsets() {
        let engine = Arc::new(engine(Arc::new(MemoryStore::new())));
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.create_order(request(&format!("C{i}"), "1")).await })
            })
            .collect();

        let mut offsets = Vec::new();
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            offsets.push(result.actual_amount - result.amount);
        }
        offsets.sort();
        assert_eq!(
            offsets,
            ["0.01", "0.02", "0.03", "0.04", "0.05"].map(dec).to_vec()
        );
    }

    #[tokio::test]
    async fn test_settled_orders_release_their_offset() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let first = engine.create_order(request("A1", "5")).await.unwrap();
        engine.create_order(request("A2", "5")).await.unwrap();

        let settled = engine
            .get_order_status(&first.trade_id)
            .await
            .unwrap()
            .into_settled(OffsetDateTime::now_utc(), Duration::from_secs(3600));
        store
            .set(&first.trade_id, settled.encode().unwrap(), Duration::from_secs(3600))
            .await
            .unwrap();

        let third = engine.create_order(request("A3", "5")).await.unwrap();
        assert_eq!(third.actual_amount, dec("5.01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_round_trip_and_expiry() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let created = engine.create_order(request("A1", "10.00")).await.unwrap();

        let order = engine.get_order_status(&created.trade_id).await.unwrap();
        assert_eq!(order.amount, dec("10.00"));
        assert_eq!(order.actual_amount, dec("10.01"));
        assert_eq!(order.address, created.address);
        assert_eq!(order.chain, Chain::Bsc);
        assert_eq!(order.status, PaymentStatus::Pending);

        tokio::time::advance(Duration::from_secs(30 * 60 + 1)).await;
        assert!(matches!(
            engine.get_order_status(&created.trade_id).await,
            Err(OrderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_unknown_trade_id_is_not_found() {
        let engine = engine(Arc::new(MemoryStore::new()));
        assert!(matches!(
            engine.get_order_status("bsc_42_missing").await,
            Err(OrderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests() {
        let engine = engine(Arc::new(MemoryStore::new()));
        engine.create_order(request("A1", "1")).await.unwrap();

        assert!(matches!(
            engine.create_order(request("A1", "1")).await,
            Err(OrderError::DuplicateOrder(key)) if key == "bsc_42_A1"
        ));
        assert!(matches!(
            engine.create_order(request("A2", "0")).await,
            Err(OrderError::InvalidRequest(_))
        ));
        assert!(matches!(
            engine.create_order(request(" ", "1")).await,
            Err(OrderError::InvalidRequest(_))
        ));
        let mut polygon = request("A3", "1");
        polygon.chain = Chain::Polygon;
        assert!(matches!(
            engine.create_order(polygon).await,
            Err(OrderError::UnsupportedChain(Chain::Polygon))
        ));
    }

    #[tokio::test]
    async fn test_rejects_merchant_beyond_derivable_range() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut oversized = request("A1", "1");
        oversized.merchant_id = 3_000_000_000;
        assert!(matches!(
            engine.create_order(oversized).await,
            Err(OrderError::InvalidRequest(_))
        ));

        let mut last = request("A1", "1");
        last.merchant_id = MAX_ACCOUNT_INDEX;
        assert!(engine.create_order(last).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_amounts_that_cannot_hold_the_offset() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());

        let mut at_max = request("A1", "1");
        at_max.amount = Decimal::MAX;
        assert!(matches!(
            engine.create_order(at_max).await,
            Err(OrderError::InvalidRequest(_))
        ));

        // 28 significant digits leave no room for two more decimal places.
        assert!(matches!(
            engine
                .create_order(request("A2", "1000000000000000000000000000"))
                .await,
            Err(OrderError::InvalidRequest(_))
        ));
        assert!(store.scan("bsc_42_*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_leaves_no_record() {
        let store = Arc::new(FlakyStore::default());
        let engine = engine(store.clone());
        store.fail_sets.store(true, Ordering::SeqCst);

        assert!(matches!(
            engine.create_order(request("A1", "1")).await,
            Err(OrderError::Store(_))
        ));
        assert!(store.inner.scan("bsc_42_*").await.unwrap().is_empty());

        store.fail_sets.store(false, Ordering::SeqCst);
        store.fail_scans.store(true, Ordering::SeqCst);
        assert!(matches!(
            engine.create_order(request("A1", "1")).await,
            Err(OrderError::Store(_))
        ));
        assert!(store.inner.get("bsc_42_A1").await.unwrap().is_none());
    }
}
