//! Request forwarding and retry handling.

mod forwarder;
mod retry;

pub use forwarder::{ClientAddr, Forwarder, HttpForwarder, ProxyBody, TransportError};
pub use retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, RetryContext, RetryHandler, RetryPolicy};
