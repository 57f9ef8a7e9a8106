use crate::config::ChainConfig;
use crate::events::SettlementHook;
use crate::processors::block_source::{BlockSource, source_for};
use crate::processors::chain_watcher::{ChainWatcher, WatcherStatus};
use crate::store::EphemeralStore;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ddpay_sdk::objects::Chain;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("chain {0} is not configured")]
    UnconfiguredChain(Chain),
}

/// Builds the block source of a chain when its watcher starts.
pub type SourceFactory = Arc<dyn Fn(&ChainConfig) -> Arc<dyn BlockSource> + Send + Sync>;

/// One watcher per configured chain, started on demand.
pub struct WatcherRegistry {
    chains: HashMap<Chain, ChainConfig>,
    store: Arc<dyn EphemeralStore>,
    hook: Arc<dyn SettlementHook>,
    settled_ttl: Duration,
    source_factory: SourceFactory,
    shutdown_rx: watch::Receiver<bool>,
    watchers: DashMap<Chain, Arc<ChainWatcher>>,
    handles: DashMap<Chain, JoinHandle<()>>,
}

impl WatcherRegistry {
    pub fn new(
        chains: impl IntoIterator<Item = ChainConfig>,
        store: Arc<dyn EphemeralStore>,
        hook: Arc<dyn SettlementHook>,
        settled_ttl: Duration,
        source_factory: SourceFactory,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chains: chains.into_iter().map(|c| (c.chain, c)).collect(),
            store,
            hook,
            settled_ttl,
            source_factory,
            shutdown_rx,
            watchers: DashMap::new(),
            handles: DashMap::new(),
        }
    }

    /// Registry whose watchers read an RPC node with the configured strategy.
    pub fn with_rpc_sources(
        chains: impl IntoIterator<Item = ChainConfig>,
        store: Arc<dyn EphemeralStore>,
        hook: Arc<dyn SettlementHook>,
        settled_ttl: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self::new(
            chains,
            store,
            hook,
            settled_ttl,
            Arc::new(source_for),
            shutdown_rx,
        )
    }

    pub fn is_configured(&self, chain: Chain) -> bool {
        self.chains.contains_key(&chain)
    }

    pub fn configured_chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self.chains.keys().copied().collect();
        chains.sort();
        chains
    }

    /// Start the watcher of `chain` unless it already runs.
    ///
    /// Returns `true` when this call started it.
    pub fn ensure_running(&self, chain: Chain) -> Result<bool, WatchError> {
        let Entry::Vacant(slot) = self.watchers.entry(chain) else {
            return Ok(false);
        };
        let config = self
            .chains
            .get(&chain)
            .ok_or(WatchError::UnconfiguredChain(chain))?
            .clone();
        let source = (self.source_factory)(&config);
        let watcher = ChainWatcher::new(
            config,
            source,
            Arc::clone(&self.store),
            Arc::clone(&self.hook),
            self.settled_ttl,
        );
        let handle = watcher.spawn(self.shutdown_rx.clone());
        slot.insert(watcher);
        self.handles.insert(chain, handle);
        Ok(true)
    }

    pub fn get(&self, chain: Chain) -> Option<Arc<ChainWatcher>> {
        self.watchers.get(&chain).map(|w| Arc::clone(w.value()))
    }

    /// Status of every running watcher, ordered by chain.
    pub async fn statuses(&self) -> Vec<WatcherStatus> {
        let mut watchers: Vec<Arc<ChainWatcher>> =
            self.watchers.iter().map(|w| Arc::clone(w.value())).collect();
        watchers.sort_by_key(|w| w.chain());

        let mut statuses = Vec::with_capacity(watchers.len());
        for watcher in watchers {
            statuses.push(watcher.status().await);
        }
        statuses
    }

    /// Wait for every started watcher to stop. Call after signalling shutdown.
    pub async fn join_all(&self) {
        let chains: Vec<Chain> = self.handles.iter().map(|h| *h.key()).collect();
        for chain in chains {
            let Some((_, handle)) = self.handles.remove(&chain) else {
                continue;
            };
            if let Err(e) = handle.await {
                error!(chain = %chain, error = %e, "Chain watcher panicked");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::chain_config;
    use crate::events::LoggingHook;
    use crate::processors::chain_watcher::tests::ScriptedSource;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registry over BSC and Arbitrum backed by one scripted source.
    pub(crate) fn registry(
        store: Arc<dyn EphemeralStore>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (WatcherRegistry, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(ScriptedSource::default());
        let counter = Arc::clone(&builds);
        let factory: SourceFactory = Arc::new(
            move |_config: &ChainConfig| -> Arc<dyn BlockSource> {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::clone(&source) as Arc<dyn BlockSource>
            },
        );
        let registry = WatcherRegistry::new(
            [chain_config(Chain::Bsc), chain_config(Chain::ArbitrumOne)],
            store,
            Arc::new(LoggingHook),
            Duration::from_secs(3600),
            factory,
            shutdown_rx,
        );
        (registry, builds)
    }

    #[tokio::test]
    async fn test_ensure_running_is_idempotent() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (registry, builds) = registry(Arc::new(MemoryStore::new()), shutdown_rx);

        assert!(registry.ensure_running(Chain::Bsc).unwrap());
        assert!(!registry.ensure_running(Chain::Bsc).unwrap());
        assert!(registry.ensure_running(Chain::ArbitrumOne).unwrap());
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        assert!(matches!(
            registry.ensure_running(Chain::Polygon),
            Err(WatchError::UnconfiguredChain(Chain::Polygon))
        ));
        assert!(registry.get(Chain::Polygon).is_none());

        let chains: Vec<Chain> = registry.statuses().await.iter().map(|s| s.chain).collect();
        assert_eq!(chains, vec![Chain::Bsc, Chain::ArbitrumOne]);

        shutdown_tx.send(true).unwrap();
        registry.join_all().await;
    }
}
