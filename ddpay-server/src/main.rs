//! DDPay Server
//!
//! A custodial stablecoin payment gateway: one derived receiving address per
//! merchant and chain, orders told apart by an amount offset.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::{Parser, ValueEnum};
use config::{ConfigLoader, StoreConfig, get_database_url};
use ddpay_core::events::{SettlementReceiver, settlement_channel};
use ddpay_core::framework::DatabaseProcessor;
use ddpay_core::orders::OrderEngine;
use ddpay_core::processors::{SubscriptionListener, WatcherRegistry};
use ddpay_core::store::{EphemeralStore, MemoryStore, RedisStore};
use ddpay_core::wallet::{MerchantWalletDirectory, WalletDeriver};
use server::{build_router, run_server};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired keys are purged from the in-process store.
const STORE_JANITOR_INTERVAL: Duration = Duration::from_secs(30);

const SETTLEMENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// DDPay - custodial stablecoin payment gateway
#[derive(Parser, Debug)]
#[command(name = "ddpay-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./ddpay-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// BIP-39 mnemonic all merchant wallets are derived from
    #[arg(long, env = "DDPAY_MNEMONIC", hide_env_values = true)]
    mnemonic: String,

    /// Which parts of the gateway this process runs
    #[arg(long, value_enum, default_value = "all")]
    role: Role,
}

/// Split of work between gateway processes sharing a Redis store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// HTTP API and chain watchers
    All,
    /// HTTP API only
    Api,
    /// Chain watchers only
    Watcher,
}

impl Role {
    fn serves_http(self) -> bool {
        matches!(self, Role::All | Role::Api)
    }

    fn runs_watchers(self) -> bool {
        matches!(self, Role::All | Role::Watcher)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting ddpay-server v{}", env!("CARGO_PKG_VERSION"));

    let loaded_config = ConfigLoader::new(&args.config, args.listen)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    let listen_addr = loaded_config.server.listen;
    tracing::info!(
        chains = loaded_config.chains.len(),
        "Configuration loaded from {:?}",
        args.config
    );

    let deriver = WalletDeriver::init_global(&args.mnemonic).map_err(|e| {
        tracing::error!("Failed to initialize wallet deriver: {}", e);
        e
    })?;

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (store, store_task) = open_store(&loaded_config.store, shutdown_rx.clone()).await?;
    if args.role != Role::All && loaded_config.store == StoreConfig::Memory {
        tracing::warn!(
            role = ?args.role,
            "The in-process store is not shared; orders created here are only settled by this process"
        );
    }

    let (settlement_tx, settlement_rx) = settlement_channel();
    let drain = tokio::spawn(drain_settlements(settlement_rx));

    let registry = Arc::new(WatcherRegistry::with_rpc_sources(
        loaded_config.chains.clone(),
        store.clone(),
        Arc::new(settlement_tx),
        loaded_config.orders.settled_ttl,
        shutdown_rx.clone(),
    ));
    let listener = args.role.runs_watchers().then(|| {
        tokio::spawn(
            SubscriptionListener::new(store.clone(), registry.clone()).run(shutdown_rx.clone()),
        )
    });

    let directory = MerchantWalletDirectory::new(
        Arc::new(DatabaseProcessor {
            pool: db_pool.clone(),
        }),
        deriver,
    );
    let engine = Arc::new(OrderEngine::new(
        store,
        directory,
        loaded_config.chains,
        loaded_config.orders,
    ));

    let result = if args.role.serves_http() {
        let router = build_router(AppState::new(engine, registry.clone()));
        tracing::info!("Starting HTTP server on {}", listen_addr);
        run_server(router, listen_addr).await
    } else {
        tracing::info!("Running chain watchers only");
        shutdown::shutdown_signal().await;
        Ok(())
    };

    tracing::info!("Stopping background tasks...");
    // Fails only when every receiver is gone, which means nothing is left to stop.
    let _ = shutdown_tx.send(true);
    if let Some(listener) = listener {
        if let Err(e) = listener.await {
            tracing::error!("Subscription listener panicked: {}", e);
        }
    }
    registry.join_all().await;
    if let Err(e) = store_task.await {
        tracing::error!("Store background task panicked: {}", e);
    }
    // The settlement senders live in the registry's watchers.
    drop(registry);
    match tokio::time::timeout(SETTLEMENT_DRAIN_TIMEOUT, drain).await {
        Ok(Err(e)) => tracing::error!("Settlement drain panicked: {}", e),
        Err(_) => tracing::warn!("Settlement drain did not finish in time"),
        Ok(Ok(())) => {}
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Open the configured store and start its background task: the expiry
/// janitor for the in-process store, keyspace notifications for Redis.
async fn open_store(
    config: &StoreConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<(Arc<dyn EphemeralStore>, JoinHandle<()>)> {
    match config {
        StoreConfig::Memory => {
            tracing::info!("Using in-process order store");
            let store = Arc::new(MemoryStore::new());
            let janitor = store.spawn_janitor(STORE_JANITOR_INTERVAL, shutdown_rx);
            Ok((store as Arc<dyn EphemeralStore>, janitor))
        }
        StoreConfig::Redis { url } => {
            tracing::info!(
                host = url.host_str().unwrap_or_default(),
                "Connecting to Redis order store..."
            );
            let store = Arc::new(RedisStore::connect(url.as_str()).await.map_err(|e| {
                tracing::error!("Failed to connect to Redis: {}", e);
                e
            })?);
            let notifications = store.spawn_notifications(shutdown_rx);
            Ok((store as Arc<dyn EphemeralStore>, notifications))
        }
    }
}

/// Log settled transfers. Merchant notification is delivered elsewhere.
async fn drain_settlements(mut settlements: SettlementReceiver) {
    while let Some(event) = settlements.recv().await {
        tracing::info!(
            chain = %event.chain,
            trade_id = %event.trade_id,
            tx_hash = %event.tx_hash,
            from = %event.from,
            value = %event.value,
            block = event.block_number,
            "Order settled"
        );
    }
    tracing::debug!("Settlement channel closed");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
