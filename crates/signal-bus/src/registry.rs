//! # Signal Registry
//!
//! Ordered mapping from signal name to the handlers subscribed to it.
//!
//! ## Dispatch Rules
//!
//! - Handlers run in subscription order
//! - A failing handler (error or panic) is logged and skipped; the rest still run
//! - Dispatch iterates a snapshot, so handlers may subscribe, unsubscribe or
//!   fire other signals while running
//! - Unknown names are not errors, they simply have no subscribers

use crate::domain::signal::{NoDefault, Payload};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback subscribed to a signal: `(payload, instance_id)`.
pub type Handler = Arc<dyn Fn(&Payload, Option<&str>) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

struct Subscriber {
    id: HandlerId,
    handler: Handler,
}

/// Registry of handlers keyed by signal name.
pub struct SignalRegistry {
    /// Handler lists in subscription order.
    handlers: RwLock<HashMap<String, Vec<Subscriber>>>,
    /// Next handler id.
    next_id: AtomicU64,
    /// Handlers that returned an error or panicked.
    handler_failures: AtomicU64,
}

impl SignalRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Append a handler to the list for `name`, creating the list on first use.
    pub fn subscribe<F>(&self, name: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&Payload, Option<&str>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(name, Arc::new(handler))
    }

    /// Append an already shared handler.
    pub fn subscribe_handler(&self, name: impl Into<String>, handler: Handler) -> HandlerId {
        let name = name.into();
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.handlers
            .write()
            .entry(name.clone())
            .or_default()
            .push(Subscriber { id, handler });

        debug!(signal = %name, handler = id.0, "Handler subscribed");
        id
    }

    /// Remove one handler. Returns false if it was not subscribed to `name`.
    pub fn unsubscribe(&self, name: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(name) else {
            return false;
        };

        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;

        if list.is_empty() {
            handlers.remove(name);
        }
        removed
    }

    /// Run every handler for `name` in order.
    pub fn dispatch(&self, name: &str, payload: &Payload, instance_id: Option<&str>) -> NoDefault {
        let Some(snapshot) = self.snapshot(name) else {
            debug!(signal = %name, "Unknown signal (no subscribers)");
            return NoDefault;
        };

        for (id, handler) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(payload, instance_id)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(signal = %name, handler = id.0, error = %e, "Signal handler failed");
                }
                Err(_) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(signal = %name, handler = id.0, "Signal handler panicked");
                }
            }
        }

        NoDefault
    }

    /// Number of handlers subscribed to `name`.
    #[must_use]
    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.read().get(name).map_or(0, Vec::len)
    }

    /// Whether any handler is subscribed to `name`.
    #[must_use]
    pub fn is_known(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Signal names with at least one handler, sorted.
    #[must_use]
    pub fn signal_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Total handler failures since creation.
    #[must_use]
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    fn snapshot(&self, name: &str) -> Option<Vec<(HandlerId, Handler)>> {
        let handlers = self.handlers.read();
        let list = handlers.get(name)?;
        Some(
            list.iter()
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect(),
        )
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
