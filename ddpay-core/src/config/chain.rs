//! Per-chain watcher configuration.

use alloy::primitives::Address;
use ddpay_sdk::objects::Chain;
use std::time::Duration;
use url::Url;

/// How a watcher retrieves token transfers from a block.
///
/// Chosen once per chain; both strategies share the same confirmation-depth
/// and retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanStrategy {
    /// `eth_getBlockByNumber` with full transactions, decoding `transfer` calldata.
    #[default]
    FullBlock,
    /// `eth_getLogs` filtered by the ERC-20 `Transfer` topic.
    TransferLogs,
}

/// Retry budget for blocks whose fetch or decode failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts tolerated before a block is dead-lettered.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(8),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Whether a block that has failed `failures` times may be queued again.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_retries.is_none_or(|max| failures <= max)
    }
}

/// Validated configuration of one watched chain.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain: Chain,
    pub rpc_url: Url,
    /// Token contract whose transfers settle orders.
    pub token_contract: Address,
    /// Decimals of the token's minor unit.
    pub token_decimals: u8,
    /// Blocks behind head considered final.
    pub confirmations: u64,
    pub poll_delay: Duration,
    /// Size of the block-processor pool.
    pub workers: usize,
    pub rpc_timeout: Duration,
    pub strategy: ScanStrategy,
    pub retry: RetryPolicy,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::primitives::address;

    /// BSC-USD on BNB Smart Chain.
    pub(crate) const TEST_TOKEN: Address = address!("55d398326f99059fF775485246999027B3197955");

    pub(crate) fn chain_config(chain: Chain) -> ChainConfig {
        ChainConfig {
            chain,
            rpc_url: Url::parse("http://127.0.0.1:8545").unwrap(),
            token_contract: TEST_TOKEN,
            token_decimals: 18,
            confirmations: 20,
            poll_delay: Duration::from_secs(2),
            workers: 2,
            rpc_timeout: Duration::from_secs(5),
            strategy: ScanStrategy::FullBlock,
            retry: RetryPolicy::default(),
        }
    }
}
