//! Durable storage of merchant wallets.

use crate::entities::ChainName;
use crate::entities::merchant_wallet::{
    GetMerchantWallet, MerchantWalletRecord, UpsertMerchantWallet,
};
use crate::framework::DatabaseProcessor;
use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use ddpay_sdk::objects::Chain;
use kanau::processor::Processor;
use thiserror::Error;

/// Errors raised by a wallet repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row no longer decodes into a wallet.
    #[error("corrupt wallet record: {0}")]
    Corrupt(String),
}

/// The receiving wallet of a merchant on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerchantWallet {
    pub merchant_id: u32,
    pub chain: Chain,
    pub address: Address,
    pub derivation_path: String,
    pub created_at: time::PrimitiveDateTime,
}

/// A wallet about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMerchantWallet {
    pub merchant_id: u32,
    pub chain: Chain,
    pub address: Address,
    pub derivation_path: String,
}

/// Storage of at most one wallet per (merchant, chain).
#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find(
        &self,
        merchant_id: u32,
        chain: Chain,
    ) -> Result<Option<MerchantWallet>, RepositoryError>;

    /// Persist a wallet unless one exists for the same (merchant, chain).
    ///
    /// Returns the stored wallet, which is the pre-existing one on conflict.
    async fn upsert(&self, wallet: NewMerchantWallet) -> Result<MerchantWallet, RepositoryError>;
}

impl TryFrom<MerchantWalletRecord> for MerchantWallet {
    type Error = RepositoryError;

    fn try_from(record: MerchantWalletRecord) -> Result<Self, Self::Error> {
        let merchant_id = u32::try_from(record.merchant_id).map_err(|_| {
            RepositoryError::Corrupt(format!("merchant id {} out of range", record.merchant_id))
        })?;
        let address = record.address.parse::<Address>().map_err(|e| {
            RepositoryError::Corrupt(format!("address {:?}: {e}", record.address))
        })?;
        Ok(Self {
            merchant_id,
            chain: record.chain.into(),
            address,
            derivation_path: record.derivation_path,
            created_at: record.created_at,
        })
    }
}

#[async_trait]
impl WalletRepository for DatabaseProcessor {
    async fn find(
        &self,
        merchant_id: u32,
        chain: Chain,
    ) -> Result<Option<MerchantWallet>, RepositoryError> {
        self.process(GetMerchantWallet {
            merchant_id,
            chain: chain.into(),
        })
        .await?
        .map(MerchantWallet::try_from)
        .transpose()
    }

    async fn upsert(&self, wallet: NewMerchantWallet) -> Result<MerchantWallet, RepositoryError> {
        let record = self
            .process(UpsertMerchantWallet {
                merchant_id: wallet.merchant_id,
                chain: ChainName::from(wallet.chain),
                address: wallet.address.to_checksum(None),
                derivation_path: wallet.derivation_path,
            })
            .await?;
        MerchantWallet::try_from(record)
    }
}

/// In-memory wallet repository. Lost on restart; meant for development
/// and tests.
#[derive(Debug, Default)]
pub struct MemoryWalletRepository {
    wallets: DashMap<(u32, Chain), MerchantWallet>,
}

impl MemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

#[async_trait]
impl WalletRepository for MemoryWalletRepository {
    async fn find(
        &self,
        merchant_id: u32,
        chain: Chain,
    ) -> Result<Option<MerchantWallet>, RepositoryError> {
        Ok(self
            .wallets
            .get(&(merchant_id, chain))
            .map(|wallet| wallet.clone()))
    }

    async fn upsert(&self, wallet: NewMerchantWallet) -> Result<MerchantWallet, RepositoryError> {
        let now = time::OffsetDateTime::now_utc();
        let stored = self
            .wallets
            .entry((wallet.merchant_id, wallet.chain))
            .or_insert_with(|| MerchantWallet {
                merchant_id: wallet.merchant_id,
                chain: wallet.chain,
                address: wallet.address,
                derivation_path: wallet.derivation_path,
                created_at: time::PrimitiveDateTime::new(now.date(), now.time()),
            })
            .clone();
        Ok(stored)
    }
}
