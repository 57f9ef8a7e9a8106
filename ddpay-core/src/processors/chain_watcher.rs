//! Per-chain block scanner.
//!
//! A `ChainWatcher` owns everything one chain needs: the scan cursor, the
//! queue of block numbers awaiting processing, retry bookkeeping and
//! counters. Two kinds of task share it:
//!
//! - the height monitor, which every poll delay queues the blocks between
//!   the cursor and `head - confirmations`
//! - a fixed pool of workers, which fetch each queued block, match its
//!   token transfers against pending orders and settle the matches
//!
//! Workers may finish blocks out of order. Matching is idempotent per
//! block: a settled order is no longer pending, so re-processing a block
//! cannot settle it twice.

use crate::config::ChainConfig;
use crate::entities::pending_order::{PendingOrder, chain_pattern};
use crate::events::{SettlementHook, TransferEvent};
use crate::processors::block_source::{BlockSource, TokenTransfer};
use crate::processors::rpc::RpcError;
use crate::store::EphemeralStore;
use crate::utils::amount::to_minor_units;
use crate::utils::retry_backoff::retry_delay;
use alloy::primitives::{Address, U256};
use dashmap::{DashMap, DashSet};
use ddpay_sdk::objects::Chain;
use serde::Serialize;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Blocks to queue given the cursor and the current head.
///
/// The first call (no cursor yet) starts right at the confirmed height.
/// Returns `None` when nothing new is confirmed.
pub fn plan_range(cursor: Option<u64>, head: u64, confirmations: u64) -> Option<RangeInclusive<u64>> {
    let target = head.checked_sub(confirmations)?;
    let cursor = cursor.unwrap_or_else(|| target.saturating_sub(1));
    (target > cursor).then(|| cursor + 1..=target)
}

/// Unbounded FIFO of block numbers shared by the monitor and the workers.
struct ScanQueue {
    tx: mpsc::UnboundedSender<u64>,
    rx: Mutex<mpsc::UnboundedReceiver<u64>>,
    len: AtomicUsize,
}

impl ScanQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    fn push(&self, block: u64) {
        // Count first: a worker may pop the block before `send` returns.
        self.len.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(block).is_err() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
    }

    async fn pop(&self) -> Option<u64> {
        let block = self.rx.lock().await.recv().await;
        if block.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        block
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct ScanStats {
    blocks_scanned: AtomicU64,
    blocks_succeeded: AtomicU64,
    blocks_failed: AtomicU64,
    transfers_matched: AtomicU64,
    dead_letters: AtomicU64,
}

/// Point-in-time copy of a watcher's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanStatsSnapshot {
    /// Processing attempts, retries included.
    pub blocks_scanned: u64,
    pub blocks_succeeded: u64,
    pub blocks_failed: u64,
    pub transfers_matched: u64,
    pub dead_letters: u64,
}

/// Observable state of a watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherStatus {
    pub chain: Chain,
    pub cursor: Option<u64>,
    pub queued: usize,
    pub stats: ScanStatsSnapshot,
}

/// A pending order awaiting its transfer, as seen by one block pass.
struct WatchedOrder {
    key: String,
    order: PendingOrder,
    amount: U256,
}

pub struct ChainWatcher {
    config: ChainConfig,
    source: Arc<dyn BlockSource>,
    store: Arc<dyn EphemeralStore>,
    hook: Arc<dyn SettlementHook>,
    settled_ttl: Duration,
    /// Last block handed to the queue.
    cursor: Mutex<Option<u64>>,
    queue: ScanQueue,
    /// Failed attempts per block still being retried.
    attempts: DashMap<u64, u32>,
    dead_letters: DashSet<u64>,
    stats: ScanStats,
}

impl ChainWatcher {
    pub fn new(
        config: ChainConfig,
        source: Arc<dyn BlockSource>,
        store: Arc<dyn EphemeralStore>,
        hook: Arc<dyn SettlementHook>,
        settled_ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            source,
            store,
            hook,
            settled_ttl,
            cursor: Mutex::new(None),
            queue: ScanQueue::new(),
            attempts: DashMap::new(),
            dead_letters: DashSet::new(),
            stats: ScanStats::default(),
        })
    }

    pub fn chain(&self) -> Chain {
        self.config.chain
    }

    /// Start the height monitor and the worker pool.
    ///
    /// The returned handle completes once every task has observed shutdown.
    pub fn spawn(self: &Arc<Self>, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let chain = self.config.chain;
        let mut tasks = JoinSet::new();
        tasks.spawn(Arc::clone(self).run_height_monitor(shutdown_rx.clone()));
        for worker in 0..self.config.workers.max(1) {
            tasks.spawn(Arc::clone(self).run_worker(worker, shutdown_rx.clone()));
        }

        info!(
            chain = %chain,
            workers = self.config.workers.max(1),
            confirmations = self.config.confirmations,
            strategy = ?self.config.strategy,
            "Chain watcher started"
        );

        tokio::spawn(async move {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(chain = %chain, error = %e, "Chain watcher task failed");
                }
            }
            info!(chain = %chain, "Chain watcher stopped");
        })
    }

    async fn run_height_monitor(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let chain = self.config.chain;
        let mut ticker = tokio::time::interval(self.config.poll_delay);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(chain = %chain, "Height monitor shutting down");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.poll_head().await {
                        warn!(chain = %chain, error = %e, "Failed to fetch chain head");
                    }
                }
            }
        }
    }

    /// Fetch the head once and queue newly confirmed blocks.
    ///
    /// Returns how many blocks were queued.
    pub async fn poll_head(&self) -> Result<u64, RpcError> {
        let head = self.source.latest_block_number().await?;
        let mut cursor = self.cursor.lock().await;
        let Some(range) = plan_range(*cursor, head, self.config.confirmations) else {
            return Ok(0);
        };

        let (start, end) = (*range.start(), *range.end());
        for block in range {
            self.queue.push(block);
        }
        *cursor = Some(end);

        debug!(
            chain = %self.config.chain,
            head,
            from = start,
            to = end,
            "Queued confirmed blocks"
        );
        Ok(end - start + 1)
    }

    async fn run_worker(self: Arc<Self>, worker: usize, mut shutdown_rx: watch::Receiver<bool>) {
        let chain = self.config.chain;
        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(chain = %chain, worker, "Block worker shutting down");
                        break;
                    }
                }

                next = self.queue.pop() => {
                    let Some(block) = next else {
                        break;
                    };
                    self.handle_block(block).await;
                }
            }
        }
    }

    async fn handle_block(self: &Arc<Self>, block: u64) {
        match self.process_block(block).await {
            Ok(matched) => {
                self.attempts.remove(&block);
                self.stats.blocks_succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(chain = %self.config.chain, block, matched, "Block processed");
            }
            Err(e) => self.on_block_failed(block, e),
        }
    }

    /// Schedule a failed block for another attempt, or dead-letter it once
    /// the retry budget is spent.
    fn on_block_failed(self: &Arc<Self>, block: u64, error: RpcError) {
        let chain = self.config.chain;
        self.stats.blocks_failed.fetch_add(1, Ordering::Relaxed);
        let failures = {
            let mut attempts = self.attempts.entry(block).or_insert(0);
            *attempts += 1;
            *attempts
        };

        if !self.config.retry.allows(failures) {
            self.attempts.remove(&block);
            self.dead_letters.insert(block);
            self.stats.dead_letters.fetch_add(1, Ordering::Relaxed);
            error!(
                chain = %chain,
                block,
                failures,
                error = %error,
                "Block dead-lettered after exhausting retries"
            );
            return;
        }

        let delay = retry_delay(&self.config.retry, failures);
        warn!(
            chain = %chain,
            block,
            failures,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "Block processing failed, will retry"
        );

        // Wait off the worker so it can keep draining the queue.
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            watcher.queue.push(block);
        });
    }

    /// Fetch one block and settle every pending order it pays.
    ///
    /// Returns the number of orders settled. Only retrieval errors fail the
    /// block; store and callback problems are logged.
    pub async fn process_block(&self, block: u64) -> Result<usize, RpcError> {
        self.stats.blocks_scanned.fetch_add(1, Ordering::Relaxed);
        let transfers = self.source.fetch_transfers(block).await?;
        if transfers.is_empty() {
            return Ok(0);
        }

        let mut watched = self.watched_orders().await;
        let mut matched = 0;
        for transfer in transfers {
            let Some(candidates) = watched.get_mut(&transfer.to) else {
                continue;
            };
            let Some(position) = candidates.iter().position(|w| w.amount == transfer.amount)
            else {
                debug!(
                    chain = %self.config.chain,
                    tx_hash = %transfer.tx_hash,
                    to = %transfer.to,
                    amount = %transfer.amount,
                    "Transfer to watched address matches no pending amount"
                );
                continue;
            };
            // Removed so a second identical transfer in this block cannot settle it again.
            let entry = candidates.swap_remove(position);
            self.settle(entry, &transfer).await;
            matched += 1;
        }
        Ok(matched)
    }

    /// Pending orders on this chain keyed by receiving address.
    ///
    /// A failed scan yields an empty map: the block is then treated as paying
    /// nobody rather than failing.
    async fn watched_orders(&self) -> HashMap<Address, Vec<WatchedOrder>> {
        let chain = self.config.chain;
        let keys = match self.store.scan(&chain_pattern(chain)).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(chain = %chain, error = %e, "Order scan failed, matching against nothing");
                return HashMap::new();
            }
        };

        let mut watched: HashMap<Address, Vec<WatchedOrder>> = HashMap::new();
        for key in keys {
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(chain = %chain, key = %key, error = %e, "Failed to read order");
                    continue;
                }
            };
            let order = match PendingOrder::decode(&raw) {
                Ok(order) if order.is_pending() => order,
                Ok(_) => continue,
                Err(e) => {
                    warn!(chain = %chain, key = %key, error = %e, "Failed to decode order");
                    continue;
                }
            };
            let Ok(address) = order.address.parse::<Address>() else {
                warn!(chain = %chain, key = %key, "Order has an invalid address");
                continue;
            };
            let Some(amount) = to_minor_units(order.actual_amount, self.config.token_decimals)
            else {
                warn!(chain = %chain, key = %key, "Order amount is not representable on-chain");
                continue;
            };
            watched
                .entry(address)
                .or_default()
                .push(WatchedOrder { key, order, amount });
        }
        watched
    }

    /// Invoke the hook, then mark the order paid.
    ///
    /// A failing hook does not keep the order pending; a failed status write
    /// leaves it pending for the next pass over a block that pays it.
    async fn settle(&self, entry: WatchedOrder, transfer: &TokenTransfer) {
        let chain = self.config.chain;
        let event = TransferEvent {
            chain,
            trade_id: entry.key.clone(),
            tx_hash: transfer.tx_hash,
            from: transfer.from,
            to: transfer.to,
            amount: transfer.amount,
            value: entry.order.actual_amount,
            block_number: transfer.block_number,
            timestamp: transfer.timestamp,
        };

        if let Err(e) = self.hook.on_transfer_matched(&event).await {
            warn!(chain = %chain, trade_id = %entry.key, error = %e, "Settlement hook failed");
        }

        let settled = entry
            .order
            .into_settled(OffsetDateTime::now_utc(), self.settled_ttl);
        match settled.encode() {
            Ok(value) => {
                if let Err(e) = self.store.set(&entry.key, value, self.settled_ttl).await {
                    error!(chain = %chain, trade_id = %entry.key, error = %e, "Failed to mark order settled");
                }
            }
            Err(e) => {
                error!(chain = %chain, trade_id = %entry.key, error = %e, "Failed to encode settled order");
            }
        }

        self.stats.transfers_matched.fetch_add(1, Ordering::Relaxed);
        info!(
            chain = %chain,
            trade_id = %entry.key,
            tx_hash = %transfer.tx_hash,
            block = transfer.block_number,
            value = %event.value,
            "Transfer matched, order settled"
        );
    }

    pub fn stats(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            blocks_scanned: self.stats.blocks_scanned.load(Ordering::Relaxed),
            blocks_succeeded: self.stats.blocks_succeeded.load(Ordering::Relaxed),
            blocks_failed: self.stats.blocks_failed.load(Ordering::Relaxed),
            transfers_matched: self.stats.transfers_matched.load(Ordering::Relaxed),
            dead_letters: self.stats.dead_letters.load(Ordering::Relaxed),
        }
    }

    pub async fn status(&self) -> WatcherStatus {
        WatcherStatus {
            chain: self.config.chain,
            cursor: *self.cursor.lock().await,
            queued: self.queue.len(),
            stats: self.stats(),
        }
    }

    /// Blocks that exhausted their retries, ascending.
    pub fn dead_letters(&self) -> Vec<u64> {
        let mut blocks: Vec<u64> = self.dead_letters.iter().map(|b| *b).collect();
        blocks.sort_unstable();
        blocks
    }
}
