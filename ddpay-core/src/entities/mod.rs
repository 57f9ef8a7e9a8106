pub mod merchant_wallet;
pub mod pending_order;

use ddpay_sdk::objects::Chain as SdkChain;

/// Chain name for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `ddpay_sdk::objects::Chain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "chain_name")]
pub enum ChainName {
    #[sqlx(rename = "bsc")]
    Bsc,
    #[sqlx(rename = "arb")]
    ArbitrumOne,
    #[sqlx(rename = "pol")]
    Polygon,
    #[sqlx(rename = "eth")]
    Ethereum,
    #[sqlx(rename = "base")]
    Base,
}

impl From<ChainName> for SdkChain {
    fn from(value: ChainName) -> Self {
        match value {
            ChainName::Bsc => SdkChain::Bsc,
            ChainName::ArbitrumOne => SdkChain::ArbitrumOne,
            ChainName::Polygon => SdkChain::Polygon,
            ChainName::Ethereum => SdkChain::Ethereum,
            ChainName::Base => SdkChain::Base,
        }
    }
}

impl From<SdkChain> for ChainName {
    fn from(value: SdkChain) -> Self {
        match value {
            SdkChain::Bsc => ChainName::Bsc,
            SdkChain::ArbitrumOne => ChainName::ArbitrumOne,
            SdkChain::Polygon => ChainName::Polygon,
            SdkChain::Ethereum => ChainName::Ethereum,
            SdkChain::Base => ChainName::Base,
        }
    }
}
