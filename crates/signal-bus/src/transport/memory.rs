//! In-process connector.
//!
//! Every `connect()` hands a `MemoryPeer` to the paired `MemoryServer`, which
//! plays the remote side. Dropping the peer closes the link as seen by the
//! client; `set_refuse(true)` makes connection attempts fail.
//!
//! Meant for tests: reachable as `transport::memory` only.

use super::connector::{Connector, FrameSink, FrameSource, Link};
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Shared {
    refuse: AtomicBool,
    attempts: AtomicU32,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

/// Client side of an in-memory link.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

/// Accepts links opened by the paired connector.
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server end of one link.
pub struct MemoryPeer {
    url: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

impl MemoryConnector {
    /// Create a connector and the server that accepts its links.
    pub fn pair() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let connector = Self {
            shared: Arc::new(Shared {
                refuse: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                accept_tx,
            }),
        };
        (connector, MemoryServer { accept_rx })
    }

    /// Make subsequent connection attempts fail (or succeed again).
    pub fn set_refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Connection attempts made so far, successful or not.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                endpoint: url.to_string(),
                reason: "connection refused".into(),
            });
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            from_client,
            to_client,
        };

        self.shared
            .accept_tx
            .send(peer)
            .map_err(|_| TransportError::Connect {
                endpoint: url.to_string(),
                reason: "server gone".into(),
            })?;

        Ok(Link::new(
            MemorySink {
                tx: Some(client_tx),
            },
            MemorySource { rx: client_rx },
        ))
    }
}

impl MemoryServer {
    /// Wait for the next link. `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

impl MemoryPeer {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a frame to the client. Returns false if the client side is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.to_client.send(text.into()).is_ok()
    }

    /// Next frame written by the client. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Frame already written by the client, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text.to_string()).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}
