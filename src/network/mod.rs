//! Network Layer
//!
//! The single WebSocket channel to the match server.
//! This layer never inspects game identity; it only moves typed messages.

pub mod auth;
pub mod connection;
pub mod protocol;
pub mod transport;

pub use auth::{AuthError, TokenClaims, TokenSource};
pub use connection::{
    ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionManager, ConnectionState,
    ReconnectPolicy,
};
pub use protocol::{ClientMessage, GameRef, MessageKind, ServerMessage};
pub use transport::{Connector, Transport, WsConnector, WsTransport};
