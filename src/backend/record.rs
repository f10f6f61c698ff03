//! A single upstream server entry.

use crate::backend::PoolError;
use hyper::Uri;
use std::sync::atomic::{AtomicBool, Ordering};

/// One configured backend: its address, liveness flag and forwarder.
///
/// The address never changes after construction. The liveness flag is the
/// only mutable state and is shared between the request path and the health
/// monitor.
#[derive(Debug)]
pub struct BackendRecord<F> {
    /// Address exactly as configured, used as the record's identity.
    address: String,
    /// `host:port` used for reachability probes.
    probe_target: String,
    /// Is this backend currently in rotation?
    alive: AtomicBool,
    /// Forwarding collaborator bound to `address`.
    forwarder: F,
}

impl<F> BackendRecord<F> {
    /// Create a new record. Backends start alive.
    pub fn new(address: impl Into<String>, forwarder: F) -> Result<Self, PoolError> {
        let address = address.into();
        let uri = parse_backend_uri(&address)?;
        let probe_target = probe_target(&uri);

        Ok(Self {
            address,
            probe_target,
            alive: AtomicBool::new(true),
            forwarder,
        })
    }

    /// The configured address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The `host:port` pair a health probe connects to.
    pub fn probe_target(&self) -> &str {
        &self.probe_target
    }

    /// The forwarder bound to this backend.
    pub fn forwarder(&self) -> &F {
        &self.forwarder
    }

    /// Is this backend currently alive?
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Set the liveness flag, returning the previous value.
    pub fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::SeqCst)
    }
}

/// Parse and check a backend address.
///
/// Only plain `http` backends with an explicit host are accepted.
pub fn parse_backend_uri(address: &str) -> Result<Uri, PoolError> {
    let invalid = |reason: &str| PoolError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = address.parse().map_err(|e: hyper::http::uri::InvalidUri| {
        invalid(&e.to_string())
    })?;

    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => return Err(invalid(&format!("unsupported scheme '{}'", other))),
        None => return Err(invalid("missing scheme")),
    }

    match uri.host() {
        Some(host) if !host.is_empty() => Ok(uri),
        _ => Err(invalid("missing host")),
    }
}

fn probe_target(uri: &Uri) -> String {
    let host = uri.host().unwrap_or_default();
    let port = uri.port_u16().unwrap_or(80);
    format!("{}:{}", host, port)
}
