//! Token transfer retrieval for one block.
//!
//! Two interchangeable strategies: decoding `transfer(address,uint256)`
//! calldata from full blocks, or reading `Transfer` event logs. A chain is
//! configured with exactly one of them.

use crate::config::{ChainConfig, ScanStrategy};
use crate::processors::rpc::{RpcClient, RpcError};
use alloy::consensus::Transaction as _;
use alloy::network::TransactionResponse as _;
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::{Block, Log};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

/// A token transfer observed on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub tx_hash: B256,
    pub from: Address,
    pub to: Address,
    /// Amount in the token's minor unit.
    pub amount: U256,
    pub block_number: u64,
    pub timestamp: OffsetDateTime,
}

/// Where a chain watcher reads chain state from.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, RpcError>;

    /// Transfers of the configured token contained in block `number`.
    async fn fetch_transfers(&self, number: u64) -> Result<Vec<TokenTransfer>, RpcError>;
}

fn block_time(timestamp: u64) -> Result<OffsetDateTime, RpcError> {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .ok_or_else(|| RpcError::Malformed(format!("block timestamp {timestamp}")))
}

/// Decodes `transfer` calls sent to the token contract.
pub struct FullBlockSource {
    client: RpcClient,
    token_contract: Address,
}

impl FullBlockSource {
    pub fn new(client: RpcClient, token_contract: Address) -> Self {
        Self {
            client,
            token_contract,
        }
    }
}

/// Decode a call to `token_contract` as `transfer(address,uint256)`.
///
/// Calls that carry the `transfer` selector but fail ABI decoding are
/// skipped; they reverted on-chain or never moved tokens.
pub fn decode_transfer_call(
    tx_hash: B256,
    to: Option<Address>,
    input: &[u8],
    token_contract: Address,
) -> Option<IERC20::transferCall> {
    if to != Some(token_contract) || !input.starts_with(&IERC20::transferCall::SELECTOR) {
        return None;
    }
    match IERC20::transferCall::abi_decode(input) {
        Ok(call) => Some(call),
        Err(e) => {
            debug!(tx_hash = %tx_hash, error = %e, "Skipping undecodable transfer call");
            None
        }
    }
}

/// Extract token transfers from a block's transactions.
pub fn transfers_in_block(
    block: &Block,
    token_contract: Address,
) -> Result<Vec<TokenTransfer>, RpcError> {
    let number = block.header.number;
    let timestamp = block_time(block.header.timestamp)?;

    let transfers = block
        .transactions
        .txns()
        .filter_map(|tx| {
            let tx_hash = tx.tx_hash();
            let call = decode_transfer_call(tx_hash, tx.to(), tx.input(), token_contract)?;
            Some(TokenTransfer {
                tx_hash,
                from: tx.from(),
                to: call.to,
                amount: call.amount,
                block_number: number,
                timestamp,
            })
        })
        .collect();
    Ok(transfers)
}

#[async_trait]
impl BlockSource for FullBlockSource {
    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        self.client.block_number().await
    }

    async fn fetch_transfers(&self, number: u64) -> Result<Vec<TokenTransfer>, RpcError> {
        let block = self.client.block_with_transactions(number).await?;
        transfers_in_block(&block, self.token_contract)
    }
}

/// Reads `Transfer` logs emitted by the token contract.
pub struct TransferLogSource {
    client: RpcClient,
    token_contract: Address,
}

impl TransferLogSource {
    pub fn new(client: RpcClient, token_contract: Address) -> Self {
        Self {
            client,
            token_contract,
        }
    }
}

/// Decode `Transfer` logs, dropping reorged logs, foreign contracts and
/// logs without a transaction hash or block number.
pub fn transfers_in_logs(
    logs: &[Log],
    token_contract: Address,
    timestamp: OffsetDateTime,
) -> Vec<TokenTransfer> {
    logs.iter()
        .filter(|log| !log.removed && log.address() == token_contract)
        .filter_map(|log| {
            let (Some(tx_hash), Some(block_number)) = (log.transaction_hash, log.block_number)
            else {
                debug!("Skipping Transfer log without a mined position");
                return None;
            };
            let event =
                IERC20::Transfer::decode_raw_log(log.topics().iter().copied(), &log.data().data)
                    .ok()?;
            Some(TokenTransfer {
                tx_hash,
                from: event.from,
                to: event.to,
                amount: event.value,
                block_number,
                timestamp,
            })
        })
        .collect()
}

#[async_trait]
impl BlockSource for TransferLogSource {
    async fn latest_block_number(&self) -> Result<u64, RpcError> {
        self.client.block_number().await
    }

    async fn fetch_transfers(&self, number: u64) -> Result<Vec<TokenTransfer>, RpcError> {
        let logs = self
            .client
            .logs(self.token_contract, IERC20::Transfer::SIGNATURE_HASH, number)
            .await?;
        let Some(first) = logs.first() else {
            return Ok(Vec::new());
        };
        // Nodes that report the block time on logs save a header fetch.
        let timestamp = match first.block_timestamp {
            Some(timestamp) => timestamp,
            None => self.client.block_timestamp(number).await?,
        };
        Ok(transfers_in_logs(&logs, self.token_contract, block_time(timestamp)?))
    }
}

/// Build the block source a chain is configured for.
pub fn source_for(config: &ChainConfig) -> Arc<dyn BlockSource> {
    let client = RpcClient::new(config.rpc_url.clone(), config.rpc_timeout);
    match config.strategy {
        ScanStrategy::FullBlock => Arc::new(FullBlockSource::new(client, config.token_contract)),
        ScanStrategy::TransferLogs => {
            Arc::new(TransferLogSource::new(client, config.token_contract))
        }
    }
}
