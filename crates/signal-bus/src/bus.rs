//! # Signal Bus
//!
//! The session object tying registry, ledger, correlator and transport
//! together. Cheap to clone; every clone is the same session.
//!
//! ## Dispatch Path
//!
//! ```text
//! fire / inbound signal frame
//!   │
//!   ├─ instance id present? ── DeduplicationLedger ── seen → stop
//!   ├─ payload schema registered? ── violation → stop
//!   └─ SignalRegistry::dispatch
//!         ├─ local handlers, in subscription order
//!         └─ remote-bound wrapper: forwards to Transport only when the
//!            firing carries no instance id
//! ```

use crate::domain::config::{BusConfig, ConfigError, DisconnectPolicy};
use crate::domain::manifest::{FunctionDirectory, Manifest};
use crate::domain::schema::{PayloadSchema, SchemaTable};
use crate::domain::signal::{NoDefault, Payload, SignalEnvelope};
use crate::error::{BusError, CallError};
use crate::ledger::DeduplicationLedger;
use crate::pending::{CallCorrelator, PendingResult};
use crate::protocol::{self, InboundFrame};
use crate::registry::{HandlerId, SignalRegistry};
use crate::transport::{
    ConnectionLoop, ConnectionState, Connector, EpochCloseHook, OutboundBuffer, SendOutcome,
    Transport, TransportEvent, WebSocketConnector,
};
use crate::BOOTSTRAP_SIGNAL;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// Point-in-time counters for one bus session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Signals handed to the registry
    pub signals_dispatched: u64,
    /// Remote signals dropped as already delivered
    pub duplicates_suppressed: u64,
    /// Signals refused by their payload schema
    pub schema_rejections: u64,
    /// Inbound frames that failed to decode
    pub malformed_frames: u64,
    /// Handlers that returned an error or panicked
    pub handler_failures: u64,
    /// Frames handed to an open link
    pub frames_sent: u64,
    /// Frames queued while disconnected
    pub frames_buffered: u64,
    /// Heartbeats echoed
    pub heartbeats: u64,
    /// Connections opened after the first
    pub reconnects: u64,
    /// Remote calls issued
    pub calls_registered: u64,
    /// Remote calls that produced a result
    pub calls_resolved: u64,
    /// Remote calls rejected
    pub calls_rejected: u64,
}

#[derive(Debug, Default)]
struct BusCounters {
    signals_dispatched: AtomicU64,
    duplicates_suppressed: AtomicU64,
    schema_rejections: AtomicU64,
    malformed_frames: AtomicU64,
}

struct BusInner {
    config: BusConfig,
    registry: Arc<SignalRegistry>,
    ledger: Mutex<DeduplicationLedger>,
    correlator: Arc<CallCorrelator>,
    transport: Arc<Transport>,
    remote_bound: Mutex<HashSet<String>>,
    schemas: RwLock<SchemaTable>,
    functions: RwLock<FunctionDirectory>,
    counters: BusCounters,
    started: AtomicBool,
    /// Set once `shutdown()` begins.
    stopped: AtomicBool,
    loaded: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Client-side signal bus session.
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<BusInner>,
}

impl SignalBus {
    /// Create a bus from a validated configuration. Nothing connects until
    /// `start()`.
    pub fn new(config: BusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Local-only bus: no endpoint, remote-bound signals are dropped.
    pub fn local() -> Self {
        Self::build(BusConfig::default())
    }

    fn build(config: BusConfig) -> Self {
        let correlator = Arc::new(CallCorrelator::new());
        let transport = match (&config.endpoint, config.disconnect_policy) {
            (None, _) => Transport::disabled(),
            (Some(_), DisconnectPolicy::RejectPending) => {
                Transport::new().with_close_hook(reject_in_flight(Arc::clone(&correlator)))
            }
            (Some(_), DisconnectPolicy::Retain) => Transport::new(),
        };
        let (loaded, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(BusInner {
                config,
                registry: Arc::new(SignalRegistry::new()),
                ledger: Mutex::new(DeduplicationLedger::new()),
                correlator,
                transport: Arc::new(transport),
                remote_bound: Mutex::new(HashSet::new()),
                schemas: RwLock::new(SchemaTable::new()),
                functions: RwLock::new(FunctionDirectory::new()),
                counters: BusCounters::default(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                loaded,
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the bus over WebSocket.
    pub async fn start(&self) -> Result<(), BusError> {
        self.start_with(Arc::new(WebSocketConnector)).await
    }

    /// Start the bus over the given connector.
    ///
    /// Spawns the connection loop (when an endpoint is configured), then fires
    /// the bootstrap signal exactly once.
    pub async fn start_with(&self, connector: Arc<dyn Connector>) -> Result<(), BusError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadyStarted);
        }

        if let Some(url) = self.inner.config.connection_url() {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let driver = ConnectionLoop::new(
                Arc::clone(&self.inner.transport),
                connector,
                url,
                self.inner.config.heartbeat.clone(),
                self.inner.config.reconnect.clone(),
                events_tx,
                self.inner.shutdown.subscribe(),
            );

            let connection = tokio::spawn(driver.run());
            let pump = tokio::spawn(pump_events(Arc::downgrade(&self.inner), events_rx));
            self.inner.tasks.lock().extend([connection, pump]);
        }

        info!(
            endpoint = self.inner.config.endpoint.as_deref().unwrap_or("<none>"),
            "Signal bus started"
        );
        self.fire(BOOTSTRAP_SIGNAL, Payload::new());
        self.inner.loaded.send_replace(true);
        Ok(())
    }

    /// Resolves once the bus has started.
    pub async fn loaded(&self) {
        let mut rx = self.inner.loaded.subscribe();
        let _ = rx.wait_for(|loaded| *loaded).await;
    }

    /// Stop the connection loop and reject every outstanding call.
    ///
    /// Later remote-bound firings are dropped and later calls fail with
    /// `CallError::Dropped`.
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Bus task ended abnormally");
            }
        }

        let discarded = self.inner.transport.stop();
        let dropped = self.inner.correlator.reject_all(CallError::Dropped);
        info!(
            dropped_calls = dropped,
            discarded_frames = discarded,
            "Signal bus stopped"
        );
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe a handler to a signal.
    pub fn connect<F>(&self, name: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&Payload, Option<&str>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(name, handler)
    }

    /// Alias of [`SignalBus::connect`].
    pub fn subscribe<F>(&self, name: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&Payload, Option<&str>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.connect(name, handler)
    }

    /// Remove one handler. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, name: &str, id: HandlerId) -> bool {
        self.inner.registry.unsubscribe(name, id)
    }

    /// Forward local firings of `name` to the server.
    ///
    /// Binding is idempotent: returns false if `name` was already bound.
    pub fn bind_remote(&self, name: &str) -> bool {
        if !self.inner.remote_bound.lock().insert(name.to_string()) {
            return false;
        }

        let transport = Arc::clone(&self.inner.transport);
        let signal = name.to_string();
        let verbose = self.inner.config.debug;
        self.inner.registry.subscribe(name, move |payload, instance_id| {
            // Network-originated firings are never sent back
            if instance_id.is_some() {
                return Ok(());
            }
            let frame = protocol::encode_signal(&signal, payload)?;
            let outcome = transport.send(frame);
            if verbose {
                info!(signal = %signal, ?outcome, "Signal forwarded");
            } else {
                debug!(signal = %signal, ?outcome, "Signal forwarded");
            }
            Ok(())
        });
        true
    }

    /// Whether `name` is forwarded to the server.
    pub fn is_remote_bound(&self, name: &str) -> bool {
        self.inner.remote_bound.lock().contains(name)
    }

    /// Stream of every firing of `name`. Dropping the stream unsubscribes.
    pub fn watch(&self, name: &str) -> SignalStream {
        let (tx, receiver) = mpsc::unbounded_channel();
        let signal = name.to_string();
        let id = self.inner.registry.subscribe(name, move |payload, instance_id| {
            let _ = tx.send(SignalEnvelope {
                name: signal.clone(),
                payload: payload.clone(),
                instance_id: instance_id.map(str::to_string),
            });
            Ok(())
        });

        SignalStream {
            receiver,
            registry: Arc::clone(&self.inner.registry),
            name: name.to_string(),
            id,
        }
    }

    /// Bind every manifest signal remote and record its functions.
    pub fn apply_manifest(&self, manifest: &Manifest) {
        let bound = manifest
            .signals
            .iter()
            .filter(|name| self.bind_remote(name))
            .count();

        let mut functions = self.inner.functions.write();
        for function in &manifest.functions {
            functions.insert(function.clone());
        }
        info!(
            bound_signals = bound,
            functions = functions.len(),
            "Manifest applied"
        );
    }

    /// Require payloads of `signal` to match `schema` before dispatch.
    pub fn register_schema(&self, signal: impl Into<String>, schema: PayloadSchema) {
        self.inner.schemas.write().insert(signal, schema);
    }

    // =========================================================================
    // Firing
    // =========================================================================

    /// Fire a signal locally.
    pub fn fire(&self, name: &str, payload: Payload) -> NoDefault {
        self.fire_with_instance(name, payload, None)
    }

    /// Fire a signal, deduplicating on `instance_id` when present.
    pub fn fire_with_instance(
        &self,
        name: &str,
        payload: Payload,
        instance_id: Option<&str>,
    ) -> NoDefault {
        if instance_id.is_some() && !self.inner.ledger.lock().should_dispatch(instance_id) {
            self.inner
                .counters
                .duplicates_suppressed
                .fetch_add(1, Ordering::Relaxed);
            debug!(signal = %name, instance_id = ?instance_id, "Duplicate signal suppressed");
            return NoDefault;
        }

        let checked = self.inner.schemas.read().validate(name, &payload);
        if let Err(violation) = checked {
            self.inner
                .counters
                .schema_rejections
                .fetch_add(1, Ordering::Relaxed);
            warn!(signal = %name, error = %violation, "Signal payload rejected");
            return NoDefault;
        }

        self.inner
            .counters
            .signals_dispatched
            .fetch_add(1, Ordering::Relaxed);
        if self.inner.config.debug {
            info!(signal = %name, instance_id = ?instance_id, "Dispatching signal");
        } else {
            debug!(signal = %name, instance_id = ?instance_id, "Dispatching signal");
        }

        self.inner.registry.dispatch(name, &payload, instance_id)
    }

    /// Call a remote function.
    ///
    /// The invocation frame is buffered while disconnected. The result settles
    /// when the response arrives, or according to the disconnect policy. After
    /// shutdown, or once reconnection was abandoned, it fails immediately.
    pub fn invoke(&self, function: &str, args: Payload) -> PendingResult {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return PendingResult::failed(CallError::Dropped);
        }
        if self.inner.config.strict_functions && !self.inner.functions.read().contains(function) {
            warn!(function = function, "Invocation of undeclared function refused");
            return PendingResult::failed(CallError::UnknownFunction(function.to_string()));
        }
        if !self.inner.transport.is_enabled() {
            return PendingResult::failed(CallError::NoTransport);
        }
        if self.inner.transport.is_stopped() {
            return PendingResult::failed(CallError::ConnectionReset);
        }

        let correlator = &self.inner.correlator;
        let (result_id, result) = correlator.register(function);
        let frame = match protocol::encode_invocation(function, &args, &result_id) {
            Ok(frame) => frame,
            Err(e) => {
                correlator.reject(&result_id, CallError::Encoding(e.to_string()));
                return result;
            }
        };

        // A call rejected by a disconnect before its frame is queued must not
        // reach the server
        let outcome = self
            .inner
            .transport
            .send_if(frame, || correlator.is_pending(&result_id));
        debug!(function = function, result_id = %result_id, ?outcome, "Invocation sent");
        if outcome == SendOutcome::Dropped && correlator.is_pending(&result_id) {
            correlator.reject(&result_id, self.stop_reason());
        }
        result
    }

    fn stop_reason(&self) -> CallError {
        if self.inner.stopped.load(Ordering::SeqCst) {
            CallError::Dropped
        } else {
            CallError::ConnectionReset
        }
    }

    /// Route one inbound text frame.
    pub fn handle_inbound(&self, text: &str) {
        let frame = match protocol::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.inner
                    .counters
                    .malformed_frames
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Malformed inbound frame dropped");
                return;
            }
        };

        match frame {
            InboundFrame::Signal {
                name,
                payload,
                instance_id: Some(instance_id),
            } => {
                self.fire_with_instance(&name, payload, Some(&instance_id));
            }
            InboundFrame::Signal {
                name,
                instance_id: None,
                ..
            } => {
                debug!(signal = %name, "Inbound signal without signal_id ignored");
            }
            InboundFrame::Result { result_id, value } => {
                self.inner.correlator.resolve(&result_id, value);
            }
            InboundFrame::Exception { result_id, error } => {
                self.inner
                    .correlator
                    .reject(&result_id, CallError::Remote(error));
            }
        }
    }

    fn on_abandoned(&self) {
        let rejected = self.inner.correlator.reject_all(CallError::ConnectionReset);
        warn!(rejected, "Transport abandoned, pending calls rejected");
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Current transport state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// Frames waiting for the next open connection.
    pub fn buffered_frames(&self) -> usize {
        self.inner.transport.buffered()
    }

    /// Remote calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Configuration the bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// CSRF token carried for form collaborators.
    pub fn csrf_token(&self) -> Option<&str> {
        self.inner.config.csrf_token.as_deref()
    }

    /// Whether `name` was declared by the manifest.
    pub fn has_function(&self, name: &str) -> bool {
        self.inner.functions.read().contains(name)
    }

    /// Snapshot of the declared functions.
    pub fn functions(&self) -> FunctionDirectory {
        self.inner.functions.read().clone()
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> BusStats {
        let counters = &self.inner.counters;
        let transport = self.inner.transport.stats();
        let calls = self.inner.correlator.stats();
        BusStats {
            signals_dispatched: counters.signals_dispatched.load(Ordering::Relaxed),
            duplicates_suppressed: counters.duplicates_suppressed.load(Ordering::Relaxed),
            schema_rejections: counters.schema_rejections.load(Ordering::Relaxed),
            malformed_frames: counters.malformed_frames.load(Ordering::Relaxed),
            handler_failures: self.inner.registry.handler_failures(),
            frames_sent: transport.frames_sent.load(Ordering::Relaxed),
            frames_buffered: transport.frames_buffered.load(Ordering::Relaxed),
            heartbeats: transport.heartbeats.load(Ordering::Relaxed),
            reconnects: transport.reconnects.load(Ordering::Relaxed),
            calls_registered: calls.total_registered.load(Ordering::Relaxed),
            calls_resolved: calls.total_resolved.load(Ordering::Relaxed),
            calls_rejected: calls.total_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Close hook for `DisconnectPolicy::RejectPending`.
///
/// Rejects every pending call and withdraws their invocation frames from the
/// buffer, so a call reported as reset is never replayed to the server.
fn reject_in_flight(correlator: Arc<CallCorrelator>) -> EpochCloseHook {
    Box::new(move |buffer: &mut OutboundBuffer| {
        let rejected = correlator.reject_pending(CallError::ConnectionReset);
        if rejected.is_empty() {
            return;
        }
        let withdrawn = buffer.retain(|frame| {
            protocol::invocation_id(frame).map_or(true, |id| !rejected.contains(&id))
        });
        warn!(
            rejected = rejected.len(),
            withdrawn, "Pending calls rejected on disconnect"
        );
    })
}

/// Feed transport events into the bus, in arrival order.
async fn pump_events(bus: Weak<BusInner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = bus.upgrade() else {
            break;
        };
        let bus = SignalBus { inner };
        match event {
            TransportEvent::Frame(text) => bus.handle_inbound(&text),
            TransportEvent::Opened => debug!("Transport opened"),
            TransportEvent::Closed => debug!("Transport closed"),
            TransportEvent::Abandoned => bus.on_abandoned(),
        }
    }
}

/// Firings of one signal as a stream.
///
/// The stream stays open while subscribed; dropping it removes the handler.
pub struct SignalStream {
    receiver: mpsc::UnboundedReceiver<SignalEnvelope>,
    registry: Arc<SignalRegistry>,
    name: String,
    id: HandlerId,
}

impl SignalStream {
    /// Signal name this stream follows.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Stream for SignalStream {
    type Item = SignalEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for SignalStream {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.name, self.id);
        debug!(signal = %self.name, "Signal stream dropped");
    }
}
