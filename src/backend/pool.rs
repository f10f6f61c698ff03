//! Backend pool with round-robin selection over live backends.

use crate::backend::{BackendRecord, parse_backend_uri};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while building a backend pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid backend address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("at least one backend is required")]
    Empty,
}

/// Ordered set of backends and the shared rotation cursor.
///
/// The backend list is fixed once serving begins. Selection and liveness
/// updates only take `&self` and never lock the pool.
#[derive(Debug)]
pub struct BackendPool<F> {
    backends: Vec<Arc<BackendRecord<F>>>,
    cursor: AtomicU64,
}

impl<F> BackendPool<F> {
    /// Create an empty pool. Backends are added with [`add_backend`].
    ///
    /// [`add_backend`]: BackendPool::add_backend
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            cursor: AtomicU64::new(0),
        }
    }

    /// Build a pool from a list of backend addresses.
    ///
    /// `make_forwarder` is called once per backend with its parsed record
    /// address. Fails on the first malformed address or on an empty list.
    pub fn from_addresses<I, S>(
        addresses: I,
        mut make_forwarder: impl FnMut(&hyper::Uri) -> F,
    ) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool = Self::new();

        for address in addresses {
            let address = address.into();
            let uri = parse_backend_uri(&address)?;
            let forwarder = make_forwarder(&uri);
            pool.add_backend(address, forwarder)?;
        }

        if pool.is_empty() {
            return Err(PoolError::Empty);
        }

        Ok(pool)
    }

    /// Append a backend. New backends start alive.
    pub fn add_backend(
        &mut self,
        address: impl Into<String>,
        forwarder: F,
    ) -> Result<(), PoolError> {
        let record = BackendRecord::new(address, forwarder)?;
        info!(backend = %record.address(), "configured backend");
        self.backends.push(Arc::new(record));
        Ok(())
    }

    /// Set the liveness flag of the backend whose address matches exactly.
    ///
    /// Unknown addresses are ignored.
    pub fn set_backend_status(&self, address: &str, alive: bool) {
        let Some(record) = self.backends.iter().find(|b| b.address() == address) else {
            debug!(backend = address, "status update for unknown backend ignored");
            return;
        };

        let was_alive = record.set_alive(alive);
        if was_alive && !alive {
            warn!(backend = address, "backend marked dead");
        } else if !was_alive && alive {
            info!(backend = address, "backend marked alive");
        }
    }

    /// Select the next live backend in round-robin order.
    ///
    /// Returns `None` when every backend is dead.
    pub fn select(&self) -> Option<Arc<BackendRecord<F>>> {
        let len = self.backends.len();
        if len == 0 {
            return None;
        }

        let start = (self.cursor.fetch_add(1, Ordering::SeqCst) % len as u64) as usize;

        for offset in 0..len {
            let idx = (start + offset) % len;
            let record = &self.backends[idx];

            if record.is_alive() {
                if idx != start {
                    // Resume after the found backend so the dead run is not rescanned.
                    self.cursor.store(idx as u64 + 1, Ordering::SeqCst);
                }
                return Some(Arc::clone(record));
            }
        }

        None
    }

    /// All backends in rotation order.
    pub fn backends(&self) -> &[Arc<BackendRecord<F>>] {
        &self.backends
    }

    /// Number of backends currently alive.
    pub fn alive_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_alive()).count()
    }

    /// Number of configured backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns true if no backends are configured.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl<F> Default for BackendPool<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::thread;

    const A: &str = "http://127.0.0.1:9001";
    const B: &str = "http://127.0.0.1:9002";
    const C: &str = "http://127.0.0.1:9003";

    fn test_pool(addresses: &[&str]) -> BackendPool<()> {
        BackendPool::from_addresses(addresses.iter().copied(), |_| ()).unwrap()
    }

    fn pick(pool: &BackendPool<()>) -> String {
        pool.select().unwrap().address().to_string()
    }

    #[test]
    fn test_round_robin_cycles() {
        let pool = test_pool(&[A, B, C]);

        assert_eq!(pick(&pool), A);
        assert_eq!(pick(&pool), B);
        assert_eq!(pick(&pool), C);
        assert_eq!(pick(&pool), A); // Cycles back
    }

    #[test]
    fn test_each_backend_once_per_rotation() {
        let addresses: Vec<String> = (0..7).map(|i| format!("http://10.0.0.{}:80", i)).collect();
        let pool = BackendPool::from_addresses(addresses.clone(), |_| ()).unwrap();

        for _ in 0..3 {
            let mut seen: Vec<String> = (0..addresses.len()).map(|_| pick(&pool)).collect();
            seen.sort();
            let mut expected = addresses.clone();
            expected.sort();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_dead_backend_skipped() {
        let pool = test_pool(&[A, B, C]);
        pool.set_backend_status(B, false);

        let picks: Vec<String> = (0..5).map(|_| pick(&pool)).collect();
        assert_eq!(picks, vec![A, C, A, C, A]);
    }

    #[test]
    fn test_dead_backend_never_selected() {
        let pool = test_pool(&[A, B, C]);
        pool.set_backend_status(C, false);

        for _ in 0..100 {
            assert_ne!(pick(&pool), C);
        }

        pool.set_backend_status(C, true);
        assert!((0..3).any(|_| pick(&pool) == C));
    }

    #[test]
    fn test_all_dead_returns_none() {
        let pool = test_pool(&[A, B]);
        pool.set_backend_status(A, false);
        pool.set_backend_status(B, false);

        assert!(pool.select().is_none());
        assert_eq!(pool.alive_count(), 0);
    }

    #[test]
    fn test_unknown_address_is_noop() {
        let pool = test_pool(&[A, B]);
        pool.set_backend_status("http://127.0.0.1:9999", false);
        pool.set_backend_status("127.0.0.1:9001", false);

        assert_eq!(pool.alive_count(), 2);
    }

    #[test]
    fn test_empty_pool() {
        let pool: BackendPool<()> = BackendPool::new();
        assert!(pool.select().is_none());

        let result = BackendPool::<()>::from_addresses(Vec::<String>::new(), |_| ());
        assert!(matches!(result, Err(PoolError::Empty)));
    }

    #[test]
    fn test_malformed_address_rejected() {
        let result = BackendPool::<()>::from_addresses([A, "ftp://host:21"], |_| ());
        assert!(matches!(result, Err(PoolError::InvalidAddress { .. })));
    }

    #[test]
    fn test_concurrent_selection_is_even() {
        let pool = Arc::new(test_pool(&[A, B, C, "http://127.0.0.1:9004"]));
        let threads = 8;
        let per_thread = 1250;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| pool.select().unwrap().address().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for address in handle.join().unwrap() {
                *counts.entry(address).or_default() += 1;
            }
        }

        let total = threads * per_thread;
        let expected = total / pool.len();
        assert_eq!(counts.len(), pool.len());
        for (address, count) in counts {
            let deviation = count.abs_diff(expected) as f64 / expected as f64;
            assert!(deviation <= 0.2, "{} got {} of {}", address, count, total);
        }
    }
}
