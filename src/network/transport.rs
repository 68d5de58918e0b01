//! Transport
//!
//! The physical duplex channel under the connection manager. Production uses
//! a WebSocket; tests script an in-memory pair.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::network::connection::ConnectionError;

/// An open, message-oriented duplex channel carrying text frames.
pub trait Transport: Send + 'static {
    /// Send one text frame.
    fn send(&mut self, text: String) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Receive the next text frame. `None` once the peer closed the channel.
    ///
    /// Must be cancel-safe: it is raced against outbound commands.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, ConnectionError>>> + Send;

    /// Close the channel.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens transports. Called once per connection attempt.
pub trait Connector: Send + 'static {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Open a new transport.
    fn connect(&mut self) -> impl Future<Output = Result<Self::Transport, ConnectionError>> + Send;
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Connects to the match server over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&mut self) -> Result<WsTransport, ConnectionError> {
        debug!("Connecting to {}", self.url);
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        Ok(WsTransport { stream })
    }
}

/// An open WebSocket.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("Skipping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => {
                    debug!("Server closed connection");
                    return None;
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

// =============================================================================
// SCRIPTED TRANSPORT (tests)
// =============================================================================
