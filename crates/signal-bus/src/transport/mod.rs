//! # Transport
//!
//! Duplex text channel that survives connection loss.
//!
//! ## State Machine
//!
//! ```text
//!  Disconnected ──start/retry──▶ Connecting ──link opened──▶ Open
//!       ▲                            │                         │
//!       └────── connect failed ──────┘◀──── close / error ─────┘
//!                    (wait backoff delay, then retry)
//! ```
//!
//! ## Guarantees
//!
//! - Frames sent while not `Open` are buffered and flushed in FIFO order
//!   ahead of any later frame once the link opens
//! - Frames accepted during an epoch that ends before they reach the link are
//!   returned to the front of the buffer
//! - The heartbeat sentinel is echoed verbatim and never decoded
//! - Inbound frames of one epoch are delivered in arrival order
//! - Once stopped (shutdown or reconnection abandoned), every frame is dropped

pub mod backoff;
pub mod buffer;
pub mod connector;
pub mod driver;
pub mod memory;
pub mod websocket;

pub use backoff::BackoffPolicy;
pub use buffer::OutboundBuffer;
pub use connector::{Connector, FrameSink, FrameSource, Link};
pub use driver::{ConnectionLoop, TransportEvent};
pub use websocket::WebSocketConnector;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

/// What `Transport::send` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the open link.
    Sent,
    /// Held until the next connection opens.
    Buffered,
    /// Discarded: no endpoint configured, the transport has stopped, or
    /// the guard of `send_if` refused it.
    Dropped,
}

/// Runs under the transport lock each time a connection is lost, with the
/// frames queued for the next epoch.
pub type EpochCloseHook = Box<dyn Fn(&mut OutboundBuffer) + Send + Sync>;

/// Transport counters.
#[derive(Debug, Default)]
pub struct TransportStats {
    /// Frames handed to an open link (including buffer flushes)
    pub frames_sent: AtomicU64,
    /// Frames queued while not open
    pub frames_buffered: AtomicU64,
    /// Heartbeats echoed
    pub heartbeats: AtomicU64,
    /// Connection epochs opened after the first
    pub reconnects: AtomicU64,
    /// Failed connection attempts
    pub connect_failures: AtomicU64,
}

struct TransportInner {
    state: ConnectionState,
    buffer: OutboundBuffer,
    /// Writer of the current epoch, present only while `Open`.
    writer: Option<mpsc::UnboundedSender<String>>,
    epochs: u64,
    stopped: bool,
}

/// Shared transport state observed by the bus and driven by `ConnectionLoop`.
pub struct Transport {
    inner: Mutex<TransportInner>,
    enabled: bool,
    stats: TransportStats,
    on_close: Option<EpochCloseHook>,
}

impl Transport {
    /// Transport for a configured endpoint. Starts `Disconnected`.
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Transport for a bus with no endpoint: every frame is dropped.
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            inner: Mutex::new(TransportInner {
                state: ConnectionState::Disconnected,
                buffer: OutboundBuffer::new(),
                writer: None,
                epochs: 0,
                stopped: false,
            }),
            enabled,
            stats: TransportStats::default(),
            on_close: None,
        }
    }

    /// Install the hook run by `close_epoch`.
    pub fn with_close_hook(mut self, hook: EpochCloseHook) -> Self {
        self.on_close = Some(hook);
        self
    }

    /// Send a frame now if open, otherwise buffer it.
    pub fn send(&self, frame: String) -> SendOutcome {
        self.send_if(frame, || true)
    }

    /// Like `send`, but the frame is dropped unless `keep` returns true.
    ///
    /// `keep` is evaluated under the transport lock, so it is ordered with
    /// respect to the close hook.
    pub fn send_if(&self, frame: String, keep: impl FnOnce() -> bool) -> SendOutcome {
        if !self.enabled {
            debug!("No transport configured, frame dropped");
            return SendOutcome::Dropped;
        }

        let mut inner = self.inner.lock();
        if inner.stopped {
            debug!("Transport stopped, frame dropped");
            return SendOutcome::Dropped;
        }
        if !keep() {
            return SendOutcome::Dropped;
        }
        if let Some(writer) = &inner.writer {
            match writer.send(frame) {
                Ok(()) => {
                    self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                    return SendOutcome::Sent;
                }
                Err(mpsc::error::SendError(frame)) => {
                    // Driver already left the epoch
                    inner.writer = None;
                    inner.buffer.push(frame);
                }
            }
        } else {
            inner.buffer.push(frame);
        }

        self.stats.frames_buffered.fetch_add(1, Ordering::Relaxed);
        SendOutcome::Buffered
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether this transport carries frames at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the transport has stopped for good.
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Stop for good: discard the buffer and drop every later frame.
    ///
    /// Returns the number of buffered frames discarded.
    pub(crate) fn stop(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        inner.state = ConnectionState::Disconnected;
        inner.writer = None;
        inner.buffer.clear()
    }

    /// Frames waiting for the next open connection.
    pub fn buffered(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub(crate) fn mark_connecting(&self) {
        self.inner.lock().state = ConnectionState::Connecting;
    }

    pub(crate) fn mark_disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Disconnected;
        inner.writer = None;
    }

    /// Enter `Open`: flush the buffer into `writer`, then route new frames to it.
    ///
    /// Both happen under one lock, so no frame sent concurrently can overtake
    /// the buffered ones. Returns the number of frames flushed.
    pub(crate) fn mark_open(&self, writer: mpsc::UnboundedSender<String>) -> usize {
        let mut inner = self.inner.lock();
        let mut flushed = 0;
        let pending: Vec<String> = inner.buffer.drain().collect();
        for frame in pending {
            if writer.send(frame).is_ok() {
                flushed += 1;
            }
        }

        inner.state = ConnectionState::Open;
        inner.writer = Some(writer);
        inner.epochs += 1;
        if inner.epochs > 1 {
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        self.stats
            .frames_sent
            .fetch_add(flushed as u64, Ordering::Relaxed);
        flushed
    }

    /// Leave `Open`, requeueing anything the epoch accepted but never wrote.
    ///
    /// `failed` is a frame whose write failed; it goes back first. When the
    /// connection was `lost` (not closed for shutdown) the close hook runs
    /// next. Returns the number of frames waiting for the next epoch.
    pub(crate) fn close_epoch(
        &self,
        failed: Option<String>,
        rx: &mut mpsc::UnboundedReceiver<String>,
        lost: bool,
    ) -> usize {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Disconnected;
        inner.writer = None;

        let mut unsent: Vec<String> = failed.into_iter().collect();
        while let Ok(frame) = rx.try_recv() {
            unsent.push(frame);
        }
        inner.buffer.requeue_front(unsent);

        if lost {
            if let Some(hook) = &self.on_close {
                hook(&mut inner.buffer);
            }
        }
        inner.buffer.len()
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}
