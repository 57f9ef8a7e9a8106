//! Order/offset engine.

pub mod engine;
pub mod offset;

pub use engine::{OrderEngine, OrderError};
pub use offset::next_offset;
