//! Socket abstraction under the notification client.
//!
//! [`WsTransport`] is the production implementation on top of `tokio-tungstenite`.
//! The client only needs text frames in both directions, so that is all the
//! [`Connection`] trait exposes.

use anyhow::Context;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens connections to the notification server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> anyhow::Result<Box<dyn Connection>>;
}

/// One live socket.
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, text: String) -> anyhow::Result<()>;

    /// Next inbound text frame. `None` once the connection is closed.
    async fn recv_text(&mut self) -> Option<anyhow::Result<String>>;

    async fn close(&mut self);
}

pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> anyhow::Result<Box<dyn Connection>> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> anyhow::Result<()> {
        self.stream
            .send(Message::text(text))
            .await
            .context("Failed to send frame")
    }

    async fn recv_text(&mut self) -> Option<anyhow::Result<String>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Server closed the socket");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(_) => continue,
                Err(e) => return Some(Err(anyhow::anyhow!("Socket error: {}", e))),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "Close handshake failed");
        }
    }
}
