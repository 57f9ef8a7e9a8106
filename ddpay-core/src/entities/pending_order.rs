//! Pending order records kept in the ephemeral store.
//!
//! Keys follow `{chain}_{merchant_id}_{order_id}` so that every order on one
//! merchant address is reachable with a single prefix scan.

use ddpay_sdk::objects::{Chain, OrderStatusResponse, PaymentStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Store key of an order.
pub fn order_key(chain: Chain, merchant_id: u32, order_id: &str) -> String {
    format!("{chain}_{merchant_id}_{order_id}")
}

/// Pattern matching every order of one merchant on one chain.
pub fn merchant_pattern(chain: Chain, merchant_id: u32) -> String {
    format!("{chain}_{merchant_id}_*")
}

/// Pattern matching every order on one chain.
pub fn chain_pattern(chain: Chain) -> String {
    format!("{chain}_*_*")
}

/// A payment intent awaiting its on-chain transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub merchant_id: u32,
    pub chain: Chain,
    pub order_id: String,
    /// Amount the merchant asked for.
    pub amount: Decimal,
    /// Disambiguating increment, a multiple of the offset step.
    pub offset: Decimal,
    /// `amount + offset`; the only amount ever matched on-chain.
    pub actual_amount: Decimal,
    /// Receiving address (EIP-55).
    pub address: String,
    pub derivation_path: String,
    #[serde(default)]
    pub notify_url: String,
    #[serde(default)]
    pub redirect_url: String,
    pub status: PaymentStatus,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
}

impl PendingOrder {
    pub fn key(&self) -> String {
        order_key(self.chain, self.merchant_id, &self.order_id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The same record marked as paid, expiring `settled_ttl` after `now`.
    pub fn into_settled(self, now: OffsetDateTime, settled_ttl: Duration) -> Self {
        Self {
            status: PaymentStatus::Success,
            expires_at: now + settled_ttl,
            ..self
        }
    }

    /// Reduced view for status polling.
    pub fn to_status_response(&self) -> OrderStatusResponse {
        OrderStatusResponse {
            merchant_id: self.merchant_id,
            chain: self.chain,
            amount: self.amount,
            actual_amount: self.actual_amount,
            address: self.address.clone(),
            status: self.status,
        }
    }
}
