//! Deterministic account derivation from the master mnemonic.
//!
//! Every merchant gets the account at `m/44'/60'/0'/0/{merchant_id}`. The
//! private key is a pure function of (mnemonic, index), so it is recomputed
//! on demand and never persisted. The seed stretch runs once, in
//! [`WalletDeriver::new`]; the deriver keeps only the extended key of the
//! shared parent path, never the phrase.

use alloy::primitives::{Address, hex};
use alloy::signers::k256::ecdsa::SigningKey;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::local::coins_bip39::{English, Mnemonic};
use coins_bip32::Bip32Error;
use coins_bip32::xkeys::{Parent, XPriv};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Path shared by every merchant account.
const ACCOUNT_PARENT_PATH: &str = "m/44'/60'/0'/0";

/// Highest non-hardened BIP-32 child index.
pub const MAX_ACCOUNT_INDEX: u32 = (1 << 31) - 1;

static GLOBAL_DERIVER: OnceLock<WalletDeriver> = OnceLock::new();

/// Errors raised while deriving accounts.
#[derive(Debug, Error)]
pub enum DeriveError {
    /// The mnemonic failed word-list or checksum validation.
    #[error("invalid mnemonic")]
    InvalidMnemonic,

    /// `end < start` in a bulk derivation.
    #[error("invalid range: end {end} is below start {start}")]
    InvalidRange { start: u32, end: u32 },

    /// The index does not fit a non-hardened derivation step.
    #[error("account index {0} is out of range")]
    IndexOutOfRange(u32),

    /// The process-wide deriver was used before `init_global`.
    #[error("wallet deriver is not initialized")]
    NotInitialized,

    /// Key derivation itself failed.
    #[error("derivation failed at index {index}: {source}")]
    Derivation {
        index: u32,
        #[source]
        source: Bip32Error,
    },
}

/// An account derived for one merchant index.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedAccount {
    pub index: u32,
    pub address: Address,
    /// 0x-prefixed hex secp256k1 secret.
    pub private_key: String,
}

impl fmt::Debug for DerivedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedAccount")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Derivation path of a merchant account.
pub fn derivation_path(index: u32) -> String {
    format!("{ACCOUNT_PARENT_PATH}/{index}")
}

/// Derives merchant accounts from a validated mnemonic.
pub struct WalletDeriver {
    /// Extended private key at `m/44'/60'/0'/0`.
    parent: XPriv,
}

impl fmt::Debug for WalletDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletDeriver").finish_non_exhaustive()
    }
}

impl WalletDeriver {
    /// Validate the mnemonic and derive the shared parent key from it.
    pub fn new(mnemonic: &str) -> Result<Self, DeriveError> {
        let phrase = mnemonic.split_whitespace().collect::<Vec<_>>().join(" ");
        let parent = Mnemonic::<English>::new_from_phrase(&phrase)
            .and_then(|mnemonic| mnemonic.derive_key(ACCOUNT_PARENT_PATH, None))
            .map_err(|_| DeriveError::InvalidMnemonic)?;
        Ok(Self { parent })
    }

    /// Initialize the process-wide deriver.
    ///
    /// Only the first successful call takes effect; later calls return the
    /// already installed deriver whatever mnemonic they pass.
    pub fn init_global(mnemonic: &str) -> Result<&'static WalletDeriver, DeriveError> {
        if let Some(deriver) = GLOBAL_DERIVER.get() {
            return Ok(deriver);
        }
        let deriver = Self::new(mnemonic)?;
        Ok(GLOBAL_DERIVER.get_or_init(|| deriver))
    }

    /// The process-wide deriver.
    pub fn global() -> Result<&'static WalletDeriver, DeriveError> {
        GLOBAL_DERIVER.get().ok_or(DeriveError::NotInitialized)
    }

    /// Derive the account at `m/44'/60'/0'/0/{index}`.
    pub fn derive_account(&self, index: u32) -> Result<DerivedAccount, DeriveError> {
        if index > MAX_ACCOUNT_INDEX {
            return Err(DeriveError::IndexOutOfRange(index));
        }
        let child = self
            .parent
            .derive_child(index)
            .map_err(|source| DeriveError::Derivation { index, source })?;
        let signing_key: &SigningKey = child.as_ref();
        let signer = PrivateKeySigner::from_signing_key(signing_key.clone());

        Ok(DerivedAccount {
            index,
            address: signer.address(),
            private_key: hex::encode_prefixed(signer.to_bytes()),
        })
    }

    /// Derive every account in `start..=end`.
    pub fn derive_range(&self, start: u32, end: u32) -> Result<Vec<DerivedAccount>, DeriveError> {
        if end < start {
            return Err(DeriveError::InvalidRange { start, end });
        }
        (start..=end).map(|index| self.derive_account(index)).collect()
    }
}
