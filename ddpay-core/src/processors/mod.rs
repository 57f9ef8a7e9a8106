//! Chain watching.
//!
//! - `rpc`: alloy provider wrapper for EVM nodes, with per-call timeouts
//! - `block_source`: per-block token transfer retrieval, by calldata or by logs
//! - `chain_watcher`: height monitor and worker pool for one chain
//! - `watcher_registry`: one watcher per configured chain, started on demand
//! - `subscription_listener`: starts watchers as orders are written

pub mod block_source;
pub mod chain_watcher;
pub mod rpc;
pub mod subscription_listener;
pub mod watcher_registry;

pub use block_source::{
    BlockSource, FullBlockSource, TokenTransfer, TransferLogSource, source_for,
};
pub use chain_watcher::{ChainWatcher, ScanStatsSnapshot, WatcherStatus, plan_range};
pub use rpc::{RpcClient, RpcError};
pub use subscription_listener::{
    DescriptorError, EvmSubscription, SubscriptionDescriptor, SubscriptionListener,
};
pub use watcher_registry::{SourceFactory, WatchError, WatcherRegistry};
