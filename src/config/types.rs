//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Address the load balancer listens on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Backend base URLs, in rotation order
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,

    /// Health monitor settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Retry settings for transport failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Outbound forwarding settings
    #[serde(default)]
    pub forwarding: ForwardingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            listen: default_listen(),
            backends: default_backends(),
            health_check: HealthCheckConfig::default(),
            retry: RetryConfig::default(),
            forwarding: ForwardingConfig::default(),
        }
    }
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics endpoint is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Time between probe cycles
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Connect timeout for each probe
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            timeout: default_health_timeout(),
        }
    }
}

/// Same-backend retry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Retries after the first failed attempt before the backend is marked dead
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before each retry. Must be non-zero.
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay: default_retry_delay(),
        }
    }
}

/// Outbound forwarding settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardingConfig {
    /// Timeout for connecting to a backend
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Largest inbound request body, in bytes, buffered for forwarding
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3030))
}

fn default_backends() -> Vec<String> {
    (3031..=3034)
        .map(|port| format!("http://localhost:{}", port))
        .collect()
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_health_interval() -> Duration {
    crate::health::DEFAULT_PROBE_INTERVAL
}

fn default_health_timeout() -> Duration {
    crate::health::DEFAULT_PROBE_TIMEOUT
}

fn default_max_retries() -> u32 {
    crate::proxy::DEFAULT_MAX_RETRIES
}

fn default_retry_delay() -> Duration {
    crate::proxy::DEFAULT_RETRY_DELAY
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_body_size() -> usize {
    crate::frontend::DEFAULT_MAX_BODY_SIZE
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.listen.port(), 3030);
        assert_eq!(config.backends.len(), 4);
        assert_eq!(config.backends[0], "http://localhost:3031");
        assert_eq!(config.health_check.interval, Duration::from_secs(60));
        assert_eq!(config.health_check.timeout, Duration::from_secs(2));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.delay, Duration::from_millis(10));
        assert_eq!(config.forwarding.max_body_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_forwarding_config_parsing() {
        let yaml = "connect_timeout: 3s\nmax_body_size: 1024\n";
        let forwarding: ForwardingConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(forwarding.connect_timeout, Duration::from_secs(3));
        assert_eq!(forwarding.max_body_size, 1024);
    }

    #[test]
    fn test_duration_parsing() {
        let yaml = "interval: 30s\ntimeout: 500ms\n";
        let check: HealthCheckConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(check.interval, Duration::from_secs(30));
        assert_eq!(check.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_yaml::from_str("pretty").unwrap();
        assert_eq!(format, LogFormat::Pretty);
    }
}
