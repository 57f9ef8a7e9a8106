//! TOML file configuration structures.
//!
//! These structs directly map to the `ddpay-config.toml` file format.

use ddpay_sdk::objects::Chain;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub orders: OrdersConfig,
    #[serde(default)]
    pub store: StoreFileConfig,
    #[serde(default)]
    pub chains: Vec<ChainFileConfig>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Pending order settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_settled_ttl_secs")]
    pub settled_ttl_secs: u64,
    #[serde(default = "default_offset_step")]
    pub offset_step: Decimal,
    /// Base URL of the hosted payment page; the order id is appended.
    pub payment_page_base: Url,
}

fn default_ttl_secs() -> u64 {
    30 * 60
}

fn default_settled_ttl_secs() -> u64 {
    60 * 60
}

fn default_offset_step() -> Decimal {
    Decimal::new(1, 2)
}

/// Ephemeral store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Where pending orders are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreFileConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Redis URL, e.g. `redis://127.0.0.1:6379/0`. Required by the redis backend.
    #[serde(default)]
    pub url: Option<Url>,
}

/// How blocks are read on a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    #[default]
    FullBlock,
    TransferLogs,
}

/// One watched chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainFileConfig {
    pub chain: Chain,
    pub rpc_url: Url,
    /// Token contract address (hex).
    pub token_contract: String,
    pub token_decimals: u8,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default)]
    pub strategy: StrategyName,
    #[serde(default)]
    pub retry: RetryFileConfig,
}

fn default_confirmations() -> u64 {
    20
}

fn default_poll_delay_ms() -> u64 {
    2000
}

fn default_workers() -> usize {
    8
}

fn default_rpc_timeout_secs() -> u64 {
    5
}

/// Retry budget of failed blocks. Omitting `max_retries` retries forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryFileConfig {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryFileConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(8),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}
