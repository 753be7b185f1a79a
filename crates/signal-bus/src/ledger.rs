//! # Deduplication Ledger
//!
//! Records the instance ids of remotely originated signals already
//! dispatched, so a signal echoed by the server and fired locally does not
//! produce its effects twice.
//!
//! The ledger grows for the lifetime of the session and is never evicted;
//! its size is bounded by the signal traffic of one session.

use std::collections::HashSet;

/// Set of instance ids already dispatched.
#[derive(Debug, Default)]
pub struct DeduplicationLedger {
    seen: HashSet<String>,
}

impl DeduplicationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a delivery should be dispatched, recording it if so.
    ///
    /// - no instance id (local firing): always true
    /// - instance id already recorded: false
    /// - new instance id: recorded, true
    pub fn should_dispatch(&mut self, instance_id: Option<&str>) -> bool {
        match instance_id {
            None => true,
            Some(id) => {
                if self.seen.contains(id) {
                    return false;
                }
                self.seen.insert(id.to_string());
                true
            }
        }
    }

    /// Check if an instance id was recorded without recording it.
    #[must_use]
    pub fn contains(&self, instance_id: &str) -> bool {
        self.seen.contains(instance_id)
    }

    /// Get the number of recorded instance ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
