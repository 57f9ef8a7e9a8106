pub mod amount;
pub mod retry_backoff;
