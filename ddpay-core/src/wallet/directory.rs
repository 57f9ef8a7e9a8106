use crate::wallet::deriver::{DeriveError, WalletDeriver, derivation_path};
use crate::wallet::repository::{
    MerchantWallet, NewMerchantWallet, RepositoryError, WalletRepository,
};
use ddpay_sdk::objects::Chain;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Derive(#[from] DeriveError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Resolves the receiving wallet of a merchant, deriving and persisting it
/// on first use.
#[derive(Clone)]
pub struct MerchantWalletDirectory {
    repository: Arc<dyn WalletRepository>,
    deriver: &'static WalletDeriver,
}

impl MerchantWalletDirectory {
    pub fn new(repository: Arc<dyn WalletRepository>, deriver: &'static WalletDeriver) -> Self {
        Self {
            repository,
            deriver,
        }
    }

    /// Return the merchant's wallet on `chain`, creating it if missing.
    ///
    /// Derivation is deterministic, so racing first uses compute the same
    /// address and the repository upsert keeps a single row.
    pub async fn get_or_create(
        &self,
        merchant_id: u32,
        chain: Chain,
    ) -> Result<MerchantWallet, DirectoryError> {
        if let Some(wallet) = self.repository.find(merchant_id, chain).await? {
            return Ok(wallet);
        }

        let account = self.deriver.derive_account(merchant_id)?;
        let wallet = self
            .repository
            .upsert(NewMerchantWallet {
                merchant_id,
                chain,
                address: account.address,
                derivation_path: derivation_path(merchant_id),
            })
            .await?;

        info!(
            merchant_id,
            %chain,
            address = %wallet.address,
            "Created merchant wallet"
        );
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::deriver::tests::TEST_MNEMONIC;
    use crate::wallet::repository::MemoryWalletRepository;

    fn directory(repository: Arc<MemoryWalletRepository>) -> MerchantWalletDirectory {
        let deriver = WalletDeriver::init_global(TEST_MNEMONIC).unwrap();
        MerchantWalletDirectory::new(repository, deriver)
    }

    #[tokio::test]
    async fn test_creates_once_and_reuses() {
        let repository = Arc::new(MemoryWalletRepository::new());
        let directory = directory(repository.clone());

        let first = directory.get_or_create(42, Chain::Bsc).await.unwrap();
        let again = directory.get_or_create(42, Chain::Bsc).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.derivation_path, "m/44'/60'/0'/0/42");
        assert_eq!(repository.len(), 1);

        // Same index on another chain yields the same address in its own row.
        let other_chain = directory.get_or_create(42, Chain::Polygon).await.unwrap();
        assert_eq!(other_chain.address, first.address);
        assert_eq!(repository.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_keeps_one_record() {
        let repository = Arc::new(MemoryWalletRepository::new());
        let directory = directory(repository.clone());

        let (a, b) = tokio::join!(
            directory.get_or_create(7, Chain::ArbitrumOne),
            directory.get_or_create(7, Chain::ArbitrumOne)
        );
        assert_eq!(a.unwrap().address, b.unwrap().address);
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_merchants_get_distinct_addresses() {
        let directory = directory(Arc::new(MemoryWalletRepository::new()));
        let a = directory.get_or_create(1, Chain::Bsc).await.unwrap();
        let b = directory.get_or_create(2, Chain::Bsc).await.unwrap();
        assert_ne!(a.address, b.address);
    }
}
