//! Settlement events.
//!
//! A chain watcher builds a [`TransferEvent`] for every transfer that
//! matches a pending order and hands it to the registered
//! [`SettlementHook`]. Delivery downstream (webhooks, notifications) is
//! outside the engine; the server drains the settlement channel.

pub mod channels;
pub mod hook;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, SettlementReceiver, SettlementSender, settlement_channel,
};
pub use hook::{HookError, LoggingHook, SettlementHook};
pub use types::TransferEvent;
