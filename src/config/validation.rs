//! Configuration validation.

use crate::backend::parse_backend_uri;
use crate::config::Config;
use std::collections::HashSet;
use std::time::Duration;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend
/// - Well-formed, unique `http://` backend addresses
/// - Non-zero health check interval and timeout
/// - Non-zero retry delay, connect timeout and body size limit
/// - A known log level
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut seen = HashSet::new();
    for address in &config.backends {
        if let Err(e) = parse_backend_uri(address) {
            errors.push(e.to_string());
        }

        if !seen.insert(address.as_str()) {
            errors.push(format!("duplicate backend address: {}", address));
        }
    }

    if config.health_check.interval == Duration::ZERO {
        errors.push("health check interval must be greater than zero".to_string());
    }

    if config.health_check.timeout == Duration::ZERO {
        errors.push("health check timeout must be greater than zero".to_string());
    }

    if config.retry.delay == Duration::ZERO {
        errors.push("retry delay must be greater than zero".to_string());
    }

    if config.forwarding.connect_timeout == Duration::ZERO {
        errors.push("connect timeout must be greater than zero".to_string());
    }

    if config.forwarding.max_body_size == 0 {
        errors.push("max body size must be greater than zero".to_string());
    }

    if config.global.metrics.enabled && !config.global.metrics.path.starts_with('/') {
        errors.push(format!(
            "metrics path '{}' must start with '/'",
            config.global.metrics.path
        ));
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
