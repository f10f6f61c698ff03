//! rrlb - A round-robin HTTP load balancer
//!
//! This crate provides:
//! - Round-robin selection over a fixed backend pool, skipping dead backends
//! - Periodic TCP health probes that take backends out of and back into rotation
//! - Bounded same-backend retry on transport failures, then demotion
//! - Prometheus metrics

pub mod backend;
pub mod config;
pub mod frontend;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod util;

pub use config::Config;
