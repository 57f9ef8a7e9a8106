//! Merchant receiving wallets: derivation and the durable directory.

pub mod deriver;
pub mod directory;
pub mod repository;

pub use deriver::{DeriveError, DerivedAccount, WalletDeriver, derivation_path};
pub use directory::{DirectoryError, MerchantWalletDirectory};
pub use repository::{
    MemoryWalletRepository, MerchantWallet, NewMerchantWallet, RepositoryError, WalletRepository,
};
