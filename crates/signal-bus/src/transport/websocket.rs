//! WebSocket connector over tokio-tungstenite.

use super::connector::{Connector, FrameSink, FrameSource, Link};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `ws://` and `wss://` endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: url.to_string(),
                reason: e.to_string(),
            })?;

        let (write, read) = ws_stream.split();
        Ok(Link::new(WsSink { write }, WsSource { read }))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.write.close().await;
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by peer");
                    return None;
                }
                // Pings are answered by tungstenite; binary frames are not part of the protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }
}
