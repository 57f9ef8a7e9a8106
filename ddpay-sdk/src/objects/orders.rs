use crate::objects::blockchains::Chain;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Request payload for creating a new payment order.
///
/// The aliases accept the field names used by the legacy merchant API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(alias = "pid")]
    pub merchant_id: u32,
    #[serde(alias = "trade_type")]
    pub chain: Chain,
    pub order_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub notify_url: String,
    #[serde(default)]
    pub redirect_url: String,
}

/// Response returned after an order has been allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Key of the pending order, used to poll its status.
    pub trade_id: String,
    /// Merchant-provided order identifier.
    pub order_id: String,
    /// Amount the merchant asked for.
    pub amount: Decimal,
    /// Amount the payer must send, including the disambiguating offset.
    pub actual_amount: Decimal,
    /// Receiving address.
    pub address: String,
    /// Seconds until the pending order expires.
    pub expiration_secs: u64,
    pub payment_url: String,
}

/// Settlement state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
}

/// Public view of an order returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    pub merchant_id: u32,
    pub chain: Chain,
    pub amount: Decimal,
    pub actual_amount: Decimal,
    pub address: String,
    pub status: PaymentStatus,
}
