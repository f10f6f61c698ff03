//! Backend records and the round-robin pool.

mod pool;
mod record;

pub use pool::{BackendPool, PoolError};
pub use record::{BackendRecord, parse_backend_uri};
