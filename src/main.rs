//! rrlb - A round-robin HTTP load balancer
//!
//! Usage:
//!     rrlb [--config <path>] [--backends <urls>] [--port <port>]
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use rrlb::backend::BackendPool;
use rrlb::config::{Config, load_config, validate_config};
use rrlb::frontend::{FrontendListener, RequestRouter};
use rrlb::health::HealthMonitor;
use rrlb::metrics::{MetricsCollector, MetricsServer};
use rrlb::proxy::{HttpForwarder, RetryHandler, RetryPolicy};
use rrlb::util::{ShutdownSignal, init_logging};

/// A round-robin HTTP load balancer with health checking.
#[derive(Parser, Debug)]
#[command(name = "rrlb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Load balanced backends, use commas to separate
    #[arg(short, long, value_name = "URLS", value_delimiter = ',')]
    backends: Option<Vec<String>>,

    /// Port to serve
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = resolve_config(&cli)?;

    init_logging(&config.global.log_level, &config.global.log_format)
        .context("failed to initialize logging")?;

    if cli.validate {
        info!("configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.listen);
        println!("  Backends: {}", config.backends.len());
        for backend in &config.backends {
            println!("    - {}", backend);
        }
        return Ok(());
    }

    info!(
        listen = %config.listen,
        backends = config.backends.len(),
        "rrlb starting"
    );

    run(config)
}

/// Merge the configuration file (if any) with command-line overrides.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => load_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => Config::default(),
    };

    if let Some(backends) = &cli.backends {
        config.backends = backends
            .iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
    }

    if let Some(port) = cli.port {
        config.listen = SocketAddr::new(config.listen.ip(), port);
    }

    if let Some(level) = &cli.log_level {
        config.global.log_level = level.clone();
    }

    validate_config(&config)
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    Ok(config)
}

/// Run the load balancer with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run_async(config))
}

/// Async entry point for the load balancer.
async fn run_async(config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    let metrics = MetricsCollector::new();

    let connect_timeout = config.forwarding.connect_timeout;
    let pool = BackendPool::from_addresses(config.backends.iter().cloned(), |uri| {
        HttpForwarder::new(uri.clone(), connect_timeout)
    })
    .context("failed to build backend pool")?;
    let pool = Arc::new(pool);

    for backend in pool.backends() {
        metrics.set_backend_alive(backend.address(), true);
    }

    let policy = RetryPolicy {
        max_retries: config.retry.max_retries,
        delay: config.retry.delay,
    };
    let router = Arc::new(
        RequestRouter::new(
            Arc::clone(&pool),
            RetryHandler::new(policy, metrics.clone()),
            metrics.clone(),
        )
        .with_max_body_size(config.forwarding.max_body_size),
    );

    let mut handles = Vec::new();

    let monitor = HealthMonitor::new(
        Arc::clone(&pool),
        config.health_check.interval,
        config.health_check.timeout,
        metrics.clone(),
    );
    handles.push(tokio::spawn(monitor.run(shutdown.subscribe())));

    if config.global.metrics.enabled {
        let server = MetricsServer::bind(
            config.global.metrics.address,
            &config.global.metrics.path,
            metrics.clone(),
        )
        .await
        .with_context(|| {
            format!(
                "failed to bind metrics server on {}",
                config.global.metrics.address
            )
        })?;
        handles.push(tokio::spawn(server.run(shutdown.subscribe())));
    }

    let listener = FrontendListener::bind(config.listen, router)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen))?;
    handles.push(tokio::spawn(listener.run(shutdown.subscribe())));

    info!("rrlb is running");
    info!("press Ctrl+C to stop");

    shutdown.shutdown_on_ctrl_c().await;

    for handle in handles {
        let _ = handle.await;
    }

    info!("rrlb shut down complete");
    Ok(())
}
