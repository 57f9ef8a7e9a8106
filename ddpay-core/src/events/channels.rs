//! Settlement channel factory and handles.

use super::types::TransferEvent;
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for settled transfers.
pub type SettlementSender = mpsc::Sender<TransferEvent>;
/// Receiver handle for settled transfers.
pub type SettlementReceiver = mpsc::Receiver<TransferEvent>;

/// Create a new settlement channel.
///
/// The sender doubles as a [`SettlementHook`](super::SettlementHook), so
/// watchers can publish into it and downstream notification drains the
/// receiver.
pub fn settlement_channel() -> (SettlementSender, SettlementReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
