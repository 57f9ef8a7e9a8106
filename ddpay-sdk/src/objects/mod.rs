pub mod blockchains;
pub mod orders;

pub use blockchains::{Chain, ChainKind, UnknownChain};
pub use orders::{CreateOrderRequest, OrderResult, OrderStatusResponse, PaymentStatus};
