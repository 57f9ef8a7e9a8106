//! Configuration module for ddpay-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables, and converts it into the engine's
//! validated runtime types.

pub mod file;

use crate::config::file::{
    ChainFileConfig, FileConfig, StoreBackend, StoreFileConfig, StrategyName,
};
use alloy::primitives::Address;
use ddpay_core::config::{ChainConfig, OrderConfig, RetryPolicy, ScanStrategy};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Largest token precision accepted.
const MAX_TOKEN_DECIMALS: u8 = 36;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Server settings after CLI overrides.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Validated ephemeral store selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Redis { url: Url },
}

/// Loaded configuration result containing all parts.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub orders: OrderConfig,
    pub store: StoreConfig,
    pub chains: Vec<ChainConfig>,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read, validate and convert the configuration file.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        self.load_str(&config_content)
    }

    fn load_str(&self, config_content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        build_loaded_config(file_config)
    }
}

fn build_loaded_config(file_config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let orders = &file_config.orders;
    if orders.offset_step <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(format!(
            "orders.offset_step must be positive, got {}",
            orders.offset_step
        )));
    }
    if orders.ttl_secs == 0 || orders.settled_ttl_secs == 0 {
        return Err(ConfigError::ValidationError(
            "orders.ttl_secs and orders.settled_ttl_secs must be positive".into(),
        ));
    }

    let store = convert_store(file_config.store)?;

    let mut seen = HashSet::new();
    let mut chains = Vec::with_capacity(file_config.chains.len());
    for chain in file_config.chains {
        if !seen.insert(chain.chain) {
            return Err(ConfigError::ValidationError(format!(
                "chain {} is configured more than once",
                chain.chain
            )));
        }
        chains.push(convert_chain(chain)?);
    }

    let mut order_config = OrderConfig::new(file_config.orders.payment_page_base);
    order_config.ttl = Duration::from_secs(file_config.orders.ttl_secs);
    order_config.settled_ttl = Duration::from_secs(file_config.orders.settled_ttl_secs);
    order_config.offset_step = file_config.orders.offset_step;

    Ok(LoadedConfig {
        server: ServerConfig {
            listen: file_config.server.listen,
        },
        orders: order_config,
        store,
        chains,
    })
}

fn convert_store(store: StoreFileConfig) -> Result<StoreConfig, ConfigError> {
    match (store.backend, store.url) {
        (StoreBackend::Memory, None) => Ok(StoreConfig::Memory),
        (StoreBackend::Memory, Some(_)) => Err(ConfigError::ValidationError(
            "store.url is only used by the redis backend".into(),
        )),
        (StoreBackend::Redis, None) => Err(ConfigError::ValidationError(
            "store.url is required by the redis backend".into(),
        )),
        (StoreBackend::Redis, Some(url)) => match url.scheme() {
            "redis" | "rediss" => Ok(StoreConfig::Redis { url }),
            scheme => Err(ConfigError::ValidationError(format!(
                "store.url scheme must be redis or rediss, got {scheme}"
            ))),
        },
    }
}

fn convert_chain(c: ChainFileConfig) -> Result<ChainConfig, ConfigError> {
    let chain = c.chain;
    let invalid = |reason: String| ConfigError::ValidationError(format!("chain {chain}: {reason}"));

    let token_contract = c
        .token_contract
        .parse::<Address>()
        .map_err(|e| invalid(format!("invalid token_contract {:?}: {e}", c.token_contract)))?;
    if c.workers == 0 {
        return Err(invalid("workers must be at least 1".into()));
    }
    if c.poll_delay_ms == 0 {
        return Err(invalid("poll_delay_ms must be positive".into()));
    }
    if c.rpc_timeout_secs == 0 {
        return Err(invalid("rpc_timeout_secs must be positive".into()));
    }
    if c.token_decimals > MAX_TOKEN_DECIMALS {
        return Err(invalid(format!(
            "token_decimals {} exceeds {MAX_TOKEN_DECIMALS}",
            c.token_decimals
        )));
    }
    if c.retry.base_delay_ms > c.retry.max_delay_ms {
        return Err(invalid("retry.base_delay_ms exceeds retry.max_delay_ms".into()));
    }

    Ok(ChainConfig {
        chain: c.chain,
        rpc_url: c.rpc_url,
        token_contract,
        token_decimals: c.token_decimals,
        confirmations: c.confirmations,
        poll_delay: Duration::from_millis(c.poll_delay_ms),
        workers: c.workers,
        rpc_timeout: Duration::from_secs(c.rpc_timeout_secs),
        strategy: match c.strategy {
            StrategyName::FullBlock => ScanStrategy::FullBlock,
            StrategyName::TransferLogs => ScanStrategy::TransferLogs,
        },
        retry: RetryPolicy {
            max_retries: c.retry.max_retries,
            base_delay: Duration::from_millis(c.retry.base_delay_ms),
            max_delay: Duration::from_millis(c.retry.max_delay_ms),
        },
    })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
