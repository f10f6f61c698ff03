//! Request IDs for correlating log lines.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for short request IDs.
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier attached to every log line of one request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Create a short ID from a process-wide counter.
    ///
    /// Format: `req-{counter}`, zero-padded to 16 hex digits.
    pub fn short() -> Self {
        let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("req-{:016x}", count))
    }

    /// Get the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_short_request_id_format() {
        let id = RequestId::short();
        assert_eq!(id.as_str().len(), "req-".len() + 16);
        assert_eq!(id.to_string(), id.as_str());
    }

    #[test]
    fn test_short_request_id_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = RequestId::short();
            assert!(id.as_str().starts_with("req-"));
            assert!(ids.insert(id), "duplicate ID generated");
        }
    }
}
