//! Order engine configuration.

use rust_decimal::Decimal;
use std::time::Duration;
use url::Url;

/// Settings for pending-order allocation.
#[derive(Debug, Clone)]
pub struct OrderConfig {
    /// Lifetime of a pending order in the ephemeral store.
    pub ttl: Duration,
    /// Lifetime of a settled order, kept so late status polls still succeed.
    pub settled_ttl: Duration,
    /// Granularity of the amount offset.
    pub offset_step: Decimal,
    /// Base URL of the hosted payment page.
    pub payment_page_base: Url,
}

impl OrderConfig {
    /// 30 minute pending TTL, 1 hour settled TTL, 0.01 offset step.
    pub fn new(payment_page_base: Url) -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            settled_ttl: Duration::from_secs(60 * 60),
            offset_step: Decimal::new(1, 2),
            payment_page_base,
        }
    }

    /// Hosted payment page for an order.
    pub fn payment_url(&self, order_id: &str) -> String {
        format!(
            "{}/{}",
            self.payment_page_base.as_str().trim_end_matches('/'),
            urlencoding::encode(order_id)
        )
    }
}
