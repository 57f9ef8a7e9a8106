//! Runtime configuration types for the DDPay engine.
//!
//! These are the validated forms. Parsing the TOML file and checking it is
//! the server crate's job.

mod chain;
mod orders;

pub use chain::{ChainConfig, RetryPolicy, ScanStrategy};
pub use orders::OrderConfig;

#[cfg(test)]
pub(crate) use chain::tests::{TEST_TOKEN, chain_config};
