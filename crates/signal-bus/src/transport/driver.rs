//! Connection loop: connect, serve one epoch, wait, reconnect.

use super::backoff::BackoffPolicy;
use super::connector::{Connector, Link};
use super::Transport;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Events surfaced to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection epoch began.
    Opened,
    /// An inbound text frame (never the heartbeat).
    Frame(String),
    /// The current epoch ended.
    Closed,
    /// The backoff policy gave up; the transport has stopped for good.
    Abandoned,
}

/// How an epoch ended.
struct EpochEnd {
    /// Frame taken from the writer whose write failed.
    unsent: Option<String>,
    /// The loop was asked to stop.
    shutdown: bool,
}

/// Drives a `Transport` through its connection lifecycle.
pub struct ConnectionLoop {
    transport: Arc<Transport>,
    connector: Arc<dyn Connector>,
    url: String,
    /// `url` without its query string, for logs.
    endpoint: String,
    heartbeat: String,
    policy: BackoffPolicy,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionLoop {
    pub fn new(
        transport: Arc<Transport>,
        connector: Arc<dyn Connector>,
        url: String,
        heartbeat: String,
        policy: BackoffPolicy,
        events: mpsc::UnboundedSender<TransportEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let endpoint = url.split('?').next().unwrap_or_default().to_string();
        Self {
            transport,
            connector,
            url,
            endpoint,
            heartbeat,
            policy,
            events,
            shutdown,
        }
    }

    /// Run until shutdown or until the backoff policy gives up.
    pub async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.transport.mark_connecting();
            debug!(endpoint = %self.endpoint, attempt, "Connecting");

            let connector = Arc::clone(&self.connector);
            let connected = tokio::select! {
                result = connector.connect(&self.url) => result,
                _ = self.shutdown.changed() => break,
            };

            match connected {
                Ok(link) => {
                    attempt = 0;
                    let end = self.serve_epoch(link).await;
                    if end {
                        break;
                    }
                }
                Err(e) => {
                    self.transport.mark_disconnected();
                    self.transport
                        .stats()
                        .connect_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(endpoint = %self.endpoint, error = %e, "Connection attempt failed");
                }
            }

            attempt = attempt.saturating_add(1);
            if !self.policy.allows(attempt) {
                let discarded = self.transport.stop();
                warn!(
                    endpoint = %self.endpoint,
                    attempts = attempt - 1,
                    discarded,
                    "Reconnection abandoned"
                );
                let _ = self.events.send(TransportEvent::Abandoned);
                break;
            }

            let delay = self.policy.delay(attempt);
            info!(delay_ms = delay.as_millis(), attempt, "Reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.transport.mark_disconnected();
        debug!(endpoint = %self.endpoint, "Connection loop stopped");
    }

    /// Open an epoch, serve it, then close it. Returns true on shutdown.
    async fn serve_epoch(&mut self, link: Link) -> bool {
        let (writer, mut outbound) = mpsc::unbounded_channel();
        let flushed = self.transport.mark_open(writer);
        info!(endpoint = %self.endpoint, flushed, "Connection open");
        let _ = self.events.send(TransportEvent::Opened);

        let end = self.serve(link, &mut outbound).await;

        let buffered = self
            .transport
            .close_epoch(end.unsent, &mut outbound, !end.shutdown);
        if end.shutdown {
            info!(endpoint = %self.endpoint, buffered, "Connection closed for shutdown");
        } else {
            warn!(endpoint = %self.endpoint, buffered, "Connection lost");
        }
        let _ = self.events.send(TransportEvent::Closed);
        end.shutdown
    }

    async fn serve(
        &mut self,
        link: Link,
        outbound: &mut mpsc::UnboundedReceiver<String>,
    ) -> EpochEnd {
        let Link {
            mut sink,
            mut source,
        } = link;

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        return EpochEnd { unsent: None, shutdown: false };
                    };
                    if let Err(e) = sink.send_text(&frame).await {
                        warn!(error = %e, "Failed to write frame");
                        return EpochEnd { unsent: Some(frame), shutdown: false };
                    }
                }
                inbound = source.next_text() => match inbound {
                    Some(Ok(text)) if text == self.heartbeat => {
                        self.transport.stats().heartbeats.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = sink.send_text(&text).await {
                            warn!(error = %e, "Failed to echo heartbeat");
                            return EpochEnd { unsent: None, shutdown: false };
                        }
                    }
                    Some(Ok(text)) => {
                        let _ = self.events.send(TransportEvent::Frame(text));
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport error");
                        return EpochEnd { unsent: None, shutdown: false };
                    }
                    None => {
                        debug!("Peer closed the connection");
                        return EpochEnd { unsent: None, shutdown: false };
                    }
                },
                _ = self.shutdown.changed() => {
                    // Frames already accepted are written before closing
                    while let Ok(frame) = outbound.try_recv() {
                        if let Err(e) = sink.send_text(&frame).await {
                            warn!(error = %e, "Failed to flush frame on shutdown");
                            return EpochEnd { unsent: Some(frame), shutdown: true };
                        }
                    }
                    sink.close().await;
                    return EpochEnd { unsent: None, shutdown: true };
                }
            }
        }
    }
}
