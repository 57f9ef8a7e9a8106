use super::types::TransferEvent;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("settlement receiver dropped")]
    Closed,
    #[error("settlement hook failed: {0}")]
    Failed(String),
}

/// Callback invoked once per matched transfer, before the order is marked
/// settled in the store.
#[async_trait]
pub trait SettlementHook: Send + Sync {
    async fn on_transfer_matched(&self, event: &TransferEvent) -> Result<(), HookError>;
}

#[async_trait]
impl SettlementHook for mpsc::Sender<TransferEvent> {
    async fn on_transfer_matched(&self, event: &TransferEvent) -> Result<(), HookError> {
        self.send(event.clone()).await.map_err(|_| HookError::Closed)
    }
}

/// Hook that only records matches in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

#[async_trait]
impl SettlementHook for LoggingHook {
    async fn on_transfer_matched(&self, event: &TransferEvent) -> Result<(), HookError> {
        info!(
            chain = %event.chain,
            trade_id = %event.trade_id,
            tx_hash = %event.tx_hash,
            value = %event.value,
            "Transfer matched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::settlement_channel;
    use alloy::primitives::{Address, B256, U256};
    use ddpay_sdk::objects::Chain;
    use rust_decimal::Decimal;
    use time::OffsetDateTime;

    fn event() -> TransferEvent {
        TransferEvent {
            chain: Chain::Bsc,
            trade_id: "bsc_42_A1".into(),
            tx_hash: B256::repeat_byte(0xab),
            from: Address::repeat_byte(0x01),
            to: Address::repeat_byte(0x02),
            amount: U256::from(1001u64),
            value: Decimal::new(1001, 2),
            block_number: 100,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn test_channel_hook_forwards_events() {
        let (tx, mut rx) = settlement_channel();
        tx.on_transfer_matched(&event()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event());

        drop(rx);
        assert!(matches!(
            tx.on_transfer_matched(&event()).await,
            Err(HookError::Closed)
        ));
    }
}
