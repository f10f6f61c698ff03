//! Health checking for backend servers.

mod monitor;

pub use monitor::{DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT, HealthMonitor, ProbeError, probe};
