//! Connection module - broker connection lifecycle.
//!
//! - [`ConnectionManager`] - lazily created, health-checked connection and
//!   channel per [`ConnectionKey`]
//! - [`WorkerPool`] - dedicated worker threads per connection

mod manager;
mod pool;

pub use manager::{ConnectionKey, ConnectionManager};
pub use pool::WorkerPool;
