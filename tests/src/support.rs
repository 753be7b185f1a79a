//! In-process WebSocket server playing the remote side of the bus.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// How long helpers wait before failing a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Listening server; each accepted client becomes a `ServerConnection`.
pub struct TestServer {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
    task: JoinHandle<()>,
}

/// Server end of one client connection. Dropping it closes the socket.
pub struct ServerConnection {
    /// Request path and query the client connected with.
    pub path: String,
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl TestServer {
    /// Bind to an ephemeral localhost port.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind test server")?;
        let addr = listener.local_addr()?;
        let (tx, connections) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                match handshake(stream).await {
                    Ok(connection) => {
                        if tx.send(connection).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "Test server handshake failed"),
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            task,
        })
    }

    /// Endpoint clients should connect to.
    pub fn url(&self) -> String {
        format!("ws://{}/ws/", self.addr)
    }

    /// Wait for the next client.
    pub async fn accept(&mut self) -> Result<ServerConnection> {
        timeout(WAIT, self.connections.recv())
            .await
            .context("No client connected in time")?
            .context("Test server stopped")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ServerConnection {
    /// Next text frame from the client.
    pub async fn recv(&mut self) -> Result<String> {
        timeout(WAIT, self.incoming.recv())
            .await
            .context("No frame received in time")?
            .context("Client closed the connection")
    }

    /// Next text frame from the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Result<serde_json::Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).with_context(|| format!("Frame is not JSON: {text}"))
    }

    /// Whether a frame arrives within `wait`.
    pub async fn is_silent_for(&mut self, wait: Duration) -> bool {
        timeout(wait, self.incoming.recv()).await.is_err()
    }

    /// Send a text frame to the client.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.outgoing
            .send(text.into())
            .map_err(|_| anyhow::anyhow!("Connection already closed"))
    }
}

async fn handshake(stream: TcpStream) -> Result<ServerConnection> {
    let mut path = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            path = request.uri().to_string();
            Ok(response)
        },
    )
    .await
    .context("WebSocket handshake failed")?;

    let (in_tx, incoming) = mpsc::unbounded_channel();
    let (outgoing, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (mut write, mut read) = ws.split();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                command = out_rx.recv() => match command {
                    Some(text) => {
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // ServerConnection dropped
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
    });

    Ok(ServerConnection {
        path,
        incoming,
        outgoing,
    })
}
