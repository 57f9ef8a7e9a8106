//! EVM node access through an alloy HTTP provider.
//!
//! Every call is bounded by the chain's RPC timeout.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Block, Filter, Log};
use alloy::transports::TransportError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use url::Url;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{method} timed out after {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("malformed RPC data: {0}")]
    Malformed(String),
}

/// Node client of one chain.
#[derive(Clone)]
pub struct RpcClient {
    provider: Arc<dyn Provider + Send + Sync>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(rpc_url: Url, timeout: Duration) -> Self {
        let provider = ProviderBuilder::new().connect_http(rpc_url);
        Self {
            provider: Arc::new(provider),
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        method: &'static str,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, RpcError> {
        match timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RpcError::Timeout {
                method,
                timeout: self.timeout,
            }),
        }
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        self.bounded("eth_blockNumber", async {
            self.provider.get_block_number().await
        })
        .await
    }

    /// Block `number` with full transaction objects.
    pub async fn block_with_transactions(&self, number: u64) -> Result<Block, RpcError> {
        let block = self
            .bounded("eth_getBlockByNumber", async {
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .full()
                    .await
            })
            .await?;
        block.ok_or(RpcError::BlockNotFound(number))
    }

    /// Unix timestamp of block `number`.
    pub async fn block_timestamp(&self, number: u64) -> Result<u64, RpcError> {
        let block = self
            .bounded("eth_getBlockByNumber", async {
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .await
            })
            .await?;
        block
            .map(|block| block.header.timestamp)
            .ok_or(RpcError::BlockNotFound(number))
    }

    /// Logs of `contract` with first topic `topic0` in block `number`.
    pub async fn logs(
        &self,
        contract: Address,
        topic0: B256,
        number: u64,
    ) -> Result<Vec<Log>, RpcError> {
        let filter = Filter::new()
            .address(contract)
            .event_signature(topic0)
            .from_block(number)
            .to_block(number);
        self.bounded("eth_getLogs", async { self.provider.get_logs(&filter).await })
            .await
    }
}
