//! Settlement event types.

use alloy::primitives::{Address, B256, U256};
use ddpay_sdk::objects::Chain;
use rust_decimal::Decimal;
use time::OffsetDateTime;

/// A token transfer that settled a pending order.
///
/// Transient: handed to the settlement hook and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub chain: Chain,
    /// Store key of the settled order.
    pub trade_id: String,
    pub tx_hash: B256,
    pub from: Address,
    pub to: Address,
    /// Raw amount in the token's minor unit.
    pub amount: U256,
    /// `amount` scaled back to token units; equals the order's actual amount.
    pub value: Decimal,
    pub block_number: u64,
    pub timestamp: OffsetDateTime,
}
