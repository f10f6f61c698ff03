//! Reaction to forwarding failures.
//!
//! A transport failure is retried against the same backend a bounded number
//! of times. Once the retry budget is spent the backend is taken out of
//! rotation until a health probe revives it.

use crate::backend::{BackendPool, BackendRecord};
use crate::metrics::MetricsCollector;
use crate::proxy::{Forwarder, ProxyBody, TransportError};
use bytes::Bytes;
use hyper::{Request, Response};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default pause before each retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Bounded same-backend retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Pause before each retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Per-request retry state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryContext {
    retries: u32,
}

impl RetryContext {
    /// Fresh context for a newly arrived request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries performed so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Drives forwarding attempts for one request against one backend.
#[derive(Debug, Clone)]
pub struct RetryHandler {
    policy: RetryPolicy,
    metrics: MetricsCollector,
}

impl RetryHandler {
    /// Create a new retry handler.
    pub fn new(policy: RetryPolicy, metrics: MetricsCollector) -> Self {
        Self { policy, metrics }
    }

    /// Forward `req` to `backend`, retrying transport failures.
    ///
    /// The backend's liveness flag is not consulted between attempts. When
    /// the last allowed attempt fails the backend is marked dead in `pool`
    /// and the final transport error is returned.
    pub async fn forward<F: Forwarder>(
        &self,
        pool: &BackendPool<F>,
        backend: &BackendRecord<F>,
        req: &Request<Bytes>,
        ctx: &mut RetryContext,
    ) -> Result<Response<ProxyBody>, TransportError> {
        loop {
            let err = match backend.forwarder().forward(req).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            warn!(
                backend = %backend.address(),
                retries = ctx.retries,
                error = %err,
                "forwarding attempt failed"
            );

            if ctx.retries >= self.policy.max_retries {
                pool.set_backend_status(backend.address(), false);
                self.metrics.set_backend_alive(backend.address(), false);
                return Err(err);
            }

            tokio::time::sleep(self.policy.delay).await;
            ctx.retries += 1;
            self.metrics.record_retry(backend.address());

            debug!(backend = %backend.address(), retry = ctx.retries, "retrying request");
        }
    }
}
