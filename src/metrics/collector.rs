//! Metrics collector using prometheus-client.
//!
//! Provides metrics for routed requests, retries, backend liveness and
//! health probes.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Backend label used when no backend was available.
pub const NO_BACKEND: &str = "none";

/// Labels for request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub backend: String,
    pub status: String,
}

/// Labels for per-backend metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

/// Labels for health check metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealthCheckLabels {
    pub backend: String,
    pub result: HealthCheckResult,
}

/// Result of a health check.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HealthCheckResult {
    Success,
    Failure,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Routed requests by backend and status.
    requests_total: Family<RequestLabels, Counter>,
    /// Request duration histogram (in seconds).
    request_duration_seconds: Family<BackendLabels, Histogram>,
    /// Same-backend retries.
    retries_total: Family<BackendLabels, Counter>,
    /// Backend liveness gauge (1 = alive, 0 = dead).
    backend_alive: Family<BackendLabels, Gauge>,
    /// Health probe results.
    health_checks_total: Family<HealthCheckLabels, Counter>,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        let request_duration_seconds = Family::<BackendLabels, Histogram>::new_with_constructor(
            || {
                // Buckets: 1ms, 2.5ms, 5ms, ... ~15s
                Histogram::new(exponential_buckets(0.001, 2.5, 13))
            },
        );
        let retries_total = Family::<BackendLabels, Counter>::default();
        let backend_alive = Family::<BackendLabels, Gauge>::default();
        let health_checks_total = Family::<HealthCheckLabels, Counter>::default();

        registry.register(
            "rrlb_requests",
            "Total number of routed requests",
            requests_total.clone(),
        );
        registry.register(
            "rrlb_request_duration_seconds",
            "Request duration in seconds, retries included",
            request_duration_seconds.clone(),
        );
        registry.register(
            "rrlb_retries",
            "Total number of same-backend retries",
            retries_total.clone(),
        );
        registry.register(
            "rrlb_backend_alive",
            "Backend liveness (1=alive, 0=dead)",
            backend_alive.clone(),
        );
        registry.register(
            "rrlb_health_checks",
            "Total number of health probes performed",
            health_checks_total.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                requests_total,
                request_duration_seconds,
                retries_total,
                backend_alive,
                health_checks_total,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record a completed request.
    pub fn record_request(&self, backend: &str, status: u16, duration: Duration) {
        let labels = RequestLabels {
            backend: backend.to_string(),
            status: status.to_string(),
        };
        self.inner.requests_total.get_or_create(&labels).inc();

        let backend_labels = BackendLabels {
            backend: backend.to_string(),
        };
        self.inner
            .request_duration_seconds
            .get_or_create(&backend_labels)
            .observe(duration.as_secs_f64());
    }

    /// Record a retry against a backend.
    pub fn record_retry(&self, backend: &str) {
        let labels = BackendLabels {
            backend: backend.to_string(),
        };
        self.inner.retries_total.get_or_create(&labels).inc();
    }

    /// Update backend liveness.
    pub fn set_backend_alive(&self, backend: &str, alive: bool) {
        let labels = BackendLabels {
            backend: backend.to_string(),
        };
        self.inner
            .backend_alive
            .get_or_create(&labels)
            .set(if alive { 1 } else { 0 });
    }

    /// Record a health probe result.
    pub fn record_health_check(&self, backend: &str, success: bool) {
        let labels = HealthCheckLabels {
            backend: backend.to_string(),
            result: if success {
                HealthCheckResult::Success
            } else {
                HealthCheckResult::Failure
            },
        };
        self.inner.health_checks_total.get_or_create(&labels).inc();
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, self.registry())?;
        Ok(buffer)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}
