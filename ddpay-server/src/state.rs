//! Application state shared across all request handlers.

use ddpay_core::orders::OrderEngine;
use ddpay_core::processors::WatcherRegistry;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// Cloning is cheap; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<OrderEngine>,
    pub registry: Arc<WatcherRegistry>,
}

impl AppState {
    pub fn new(engine: Arc<OrderEngine>, registry: Arc<WatcherRegistry>) -> Self {
        Self { engine, registry }
    }
}
