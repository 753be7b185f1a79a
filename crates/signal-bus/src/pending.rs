//! Call Correlator - turns invocation frames into awaitable results.
//!
//! Flow:
//! 1. `register()` allocates a correlation id and a pending result
//! 2. The bus sends `{func, opts, result_id}` over the transport
//! 3. The matching response frame calls `resolve()` or `reject()`
//! 4. The caller's `PendingResult` completes
//!
//! A response for an unknown id (never issued, or already settled) is
//! ignored, so duplicate or late frames are harmless.

use crate::domain::correlation::{CorrelationId, CorrelationIdGenerator};
use crate::error::CallError;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::debug;

type Settlement = Result<Value, CallError>;

/// A call waiting for its response
struct PendingCall {
    /// Channel to settle the caller's result
    sender: oneshot::Sender<Settlement>,
    /// When the call was issued
    created_at: Instant,
    /// Function name (for logging)
    function: String,
}

/// Statistics for the correlator
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total calls registered
    pub total_registered: AtomicU64,
    /// Total calls resolved with a result
    pub total_resolved: AtomicU64,
    /// Total calls rejected (remote exception, reset, shutdown)
    pub total_rejected: AtomicU64,
    /// Responses that matched no pending call
    pub total_unmatched: AtomicU64,
}

/// Result of a remote call, settled when the response frame arrives.
///
/// Dropping it abandons the call; a later response is then discarded.
#[derive(Debug)]
pub struct PendingResult {
    correlation_id: Option<CorrelationId>,
    receiver: oneshot::Receiver<Settlement>,
}

impl PendingResult {
    /// A result rejected before any frame was sent.
    pub(crate) fn failed(error: CallError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self {
            correlation_id: None,
            receiver: rx,
        }
    }

    /// Correlation id carried by the invocation frame, if one was sent.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }
}

impl Future for PendingResult {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(settlement)) => Poll::Ready(settlement),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Table of pending remote calls keyed by correlation id.
pub struct CallCorrelator {
    /// Map of correlation ID to pending call
    pending: DashMap<CorrelationId, PendingCall>,
    /// Id source for this session
    ids: CorrelationIdGenerator,
    /// Statistics
    stats: PendingStats,
}

impl CallCorrelator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            ids: CorrelationIdGenerator::new(),
            stats: PendingStats::default(),
        }
    }

    /// Register a call and get the result the caller awaits.
    pub fn register(&self, function: &str) -> (CorrelationId, PendingResult) {
        let correlation_id = self.ids.next_id();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            correlation_id.clone(),
            PendingCall {
                sender: tx,
                created_at: Instant::now(),
                function: function.to_string(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(result_id = %correlation_id, function = function, "Registered pending call");

        let result = PendingResult {
            correlation_id: Some(correlation_id.clone()),
            receiver: rx,
        };
        (correlation_id, result)
    }

    /// Settle a call with its result.
    ///
    /// Returns false if the id is unknown or already settled.
    pub fn resolve(&self, correlation_id: &CorrelationId, result: Value) -> bool {
        self.settle(correlation_id, Ok(result))
    }

    /// Settle a call with an error.
    ///
    /// Returns false if the id is unknown or already settled.
    pub fn reject(&self, correlation_id: &CorrelationId, error: CallError) -> bool {
        self.settle(correlation_id, Err(error))
    }

    /// Reject every pending call. Returns how many were rejected.
    pub fn reject_all(&self, error: CallError) -> usize {
        self.reject_pending(error).len()
    }

    /// Reject every pending call, returning the ids this call settled.
    pub fn reject_pending(&self, error: CallError) -> Vec<CorrelationId> {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter(|id| self.settle(id, Err(error.clone())))
            .collect()
    }

    fn settle(&self, correlation_id: &CorrelationId, settlement: Settlement) -> bool {
        let Some((_, call)) = self.pending.remove(correlation_id) else {
            self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(result_id = %correlation_id, "Response for unknown or settled call");
            return false;
        };

        let elapsed = call.created_at.elapsed();
        let counter = if settlement.is_ok() {
            &self.stats.total_resolved
        } else {
            &self.stats.total_rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if call.sender.send(settlement).is_err() {
            // Caller dropped its PendingResult
            debug!(
                result_id = %correlation_id,
                function = call.function,
                "Pending call abandoned by caller"
            );
        } else {
            debug!(
                result_id = %correlation_id,
                function = call.function,
                response_time_ms = elapsed.as_millis(),
                "Settled pending call"
            );
        }
        true
    }

    /// Get number of currently pending calls
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

impl Default for CallCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let correlator = CallCorrelator::new();

        let (id, result) = correlator.register("demo.answer");
        assert_eq!(id.as_str(), "f1");
        assert_eq!(result.correlation_id(), Some(&id));
        assert!(correlator.is_pending(&id));

        assert!(correlator.resolve(&id, json!(42)));
        assert_eq!(result.await, Ok(json!(42)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_with_remote_error() {
        let correlator = CallCorrelator::new();
        let (id, result) = correlator.register("demo.fail");

        assert!(correlator.reject(&id, CallError::Remote(json!("boom"))));
        assert_eq!(result.await, Err(CallError::Remote(json!("boom"))));
    }

    #[tokio::test]
    async fn test_unknown_id_leaves_pending_untouched() {
        let correlator = CallCorrelator::new();
        let (id, mut result) = correlator.register("demo.answer");

        assert!(!correlator.resolve(&CorrelationId::from_wire("f999"), json!(1)));
        assert!(correlator.is_pending(&id));
        assert!(timeout(Duration::from_millis(20), &mut result).await.is_err());

        correlator.resolve(&id, json!("late"));
        assert_eq!(result.await, Ok(json!("late")));
    }

    #[tokio::test]
    async fn test_duplicate_response_ignored() {
        let correlator = CallCorrelator::new();
        let (id, result) = correlator.register("demo.answer");

        assert!(correlator.resolve(&id, json!(1)));
        assert!(!correlator.resolve(&id, json!(2)));
        assert_eq!(result.await, Ok(json!(1)));
        assert_eq!(correlator.stats().total_unmatched.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_reject_all() {
        let correlator = CallCorrelator::new();
        let (_, first) = correlator.register("a");
        let (_, second) = correlator.register("b");

        assert_eq!(correlator.reject_all(CallError::ConnectionReset), 2);
        assert_eq!(first.await, Err(CallError::ConnectionReset));
        assert_eq!(second.await, Err(CallError::ConnectionReset));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_pending_returns_settled_ids() {
        let correlator = CallCorrelator::new();
        let (first_id, first) = correlator.register("a");
        let (second_id, second) = correlator.register("b");
        correlator.resolve(&first_id, json!(1));

        assert_eq!(
            correlator.reject_pending(CallError::ConnectionReset),
            vec![second_id]
        );
        assert_eq!(first.await, Ok(json!(1)));
        assert_eq!(second.await, Err(CallError::ConnectionReset));
    }

    #[tokio::test]
    async fn test_abandoned_call_still_settles() {
        let correlator = CallCorrelator::new();
        let (id, result) = correlator.register("demo.answer");
        drop(result);

        assert!(correlator.resolve(&id, json!(1)));
        assert_eq!(correlator.stats().total_resolved.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_failed_result() {
        let result = PendingResult::failed(CallError::UnknownFunction("x".into()));
        assert!(result.correlation_id().is_none());
        assert_eq!(result.await, Err(CallError::UnknownFunction("x".into())));
    }

    #[tokio::test]
    async fn test_dropped_correlator_reports_dropped() {
        let correlator = CallCorrelator::new();
        let (_, result) = correlator.register("demo.answer");
        drop(correlator);
        assert_eq!(result.await, Err(CallError::Dropped));
    }
}
