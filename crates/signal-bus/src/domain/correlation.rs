//! Correlation ID for remote call tracking.
//!
//! Ids are `f1`, `f2`, ... drawn from a per-session counter. The prefix keeps
//! them apart from any id the server assigns.

use crate::CORRELATION_PREFIX;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Correlation ID pairing an invocation frame with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an id received on the wire.
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number of a client-generated id, `None` for foreign ids.
    pub fn sequence(&self) -> Option<u64> {
        self.0
            .strip_prefix(CORRELATION_PREFIX)
            .and_then(|n| n.parse().ok())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Monotonic generator for correlation ids, starting at `f1`.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    next: AtomicU64,
}

impl CorrelationIdGenerator {
    /// Create a generator whose first id is `f1`.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> CorrelationId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        CorrelationId(format!("{CORRELATION_PREFIX}{n}"))
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
