//! Active health monitor.
//!
//! Periodically probes every backend with a TCP connect and records the
//! outcome as the backend's liveness.

use crate::backend::BackendPool;
use crate::metrics::MetricsCollector;
use futures::future::join_all;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, warn};

/// Default time between probe cycles.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(60);

/// Default connect timeout for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Reason a reachability probe failed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(#[from] io::Error),

    #[error("connection timeout after {0:?}")]
    Timeout(Duration),
}

/// Periodically probes backends and updates their liveness.
pub struct HealthMonitor<F> {
    pool: Arc<BackendPool<F>>,
    interval: Duration,
    probe_timeout: Duration,
    metrics: MetricsCollector,
}

impl<F> HealthMonitor<F> {
    /// Create a new health monitor.
    pub fn new(
        pool: Arc<BackendPool<F>>,
        interval: Duration,
        probe_timeout: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            pool,
            interval,
            probe_timeout,
            metrics,
        }
    }

    /// Run probe cycles until shutdown.
    ///
    /// The first cycle starts one interval after the monitor does. A shutdown
    /// signal received during a cycle takes effect once that cycle is done.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval = ?self.interval,
            timeout = ?self.probe_timeout,
            backends = self.pool.len(),
            "health monitor starting"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }

                _ = shutdown.recv() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Probe every backend concurrently and apply each outcome.
    ///
    /// One failing or hanging probe does not affect the others; each is
    /// bounded by the probe timeout.
    pub async fn check_all(&self) {
        info!("health check cycle started");

        let probes = self.pool.backends().iter().map(|backend| async move {
            let result = probe(backend.probe_target(), self.probe_timeout).await;
            (backend, result)
        });

        for (backend, result) in join_all(probes).await {
            let reachable = match result {
                Ok(()) => {
                    debug!(backend = %backend.address(), "health check passed");
                    true
                }
                Err(e) => {
                    warn!(backend = %backend.address(), error = %e, "health check failed");
                    false
                }
            };

            self.pool.set_backend_status(backend.address(), reachable);
            self.metrics.record_health_check(backend.address(), reachable);
            self.metrics.set_backend_alive(backend.address(), reachable);

            let status = if reachable { "up" } else { "down" };
            info!(backend = %backend.address(), status, "backend status");
        }

        info!(
            alive = self.pool.alive_count(),
            total = self.pool.len(),
            "health check cycle finished"
        );
    }
}

/// Check that `target` (`host:port`) accepts a TCP connection.
pub async fn probe(target: &str, probe_timeout: Duration) -> Result<(), ProbeError> {
    connect_within(probe_timeout, TcpStream::connect(target)).await?;
    Ok(())
}

async fn connect_within<T>(
    probe_timeout: Duration,
    connect: impl Future<Output = io::Result<T>>,
) -> Result<T, ProbeError> {
    match timeout(probe_timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProbeError::Connect(e)),
        Err(_) => Err(ProbeError::Timeout(probe_timeout)),
    }
}
