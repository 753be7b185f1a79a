//! Connection seam between the transport state machine and a concrete
//! duplex channel.
//!
//! The state machine only needs text frames in both directions; WebSocket
//! and in-memory links both fit behind these traits.

use crate::error::TransportError;
use async_trait::async_trait;

/// Opens links to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one connection epoch.
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

/// Write half of an open link.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Close the link politely. Errors are ignored.
    async fn close(&mut self);
}

/// Read half of an open link.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame. `None` once the peer has closed the link.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// One open connection, split into halves.
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Link {
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}
