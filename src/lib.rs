//! # Duel Client
//!
//! Session protocol client for real-time, wagered two-player games.
//!
//! The server is authoritative for positions, clocks and results. The client
//! keeps a local mirror, never invents outcomes, and recovers from dropped
//! connections without losing track of the game it is in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       DUEL CLIENT                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Identity and time primitives            │
//! │  ├── identity.rs   - Dual game keys, sides                   │
//! │  └── clock.rs      - Injectable wall clock                   │
//! │                                                              │
//! │  network/          - Wire and connection                     │
//! │  ├── protocol.rs   - Message types                           │
//! │  ├── transport.rs  - WebSocket transport                     │
//! │  ├── auth.rs       - Token source and expiry check           │
//! │  └── connection.rs - Connect, auth, backoff, resync signal   │
//! │                                                              │
//! │  session/          - Session state (synchronous)             │
//! │  ├── timer.rs      - Clock reconciliation                    │
//! │  ├── reconciler.rs - Current game lifecycle                  │
//! │  ├── matchmaking.rs- Queue search                            │
//! │  ├── lobby.rs      - Private lobbies                         │
//! │  ├── spectator.rs  - Read-only watching                      │
//! │  └── hub.rs        - Routing between the above               │
//! │                                                              │
//! │  account/          - Balance API and local cache             │
//! │  config.rs         - Environment configuration               │
//! │  client.rs         - Async event loop                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Everything under `session/` is driven by server messages and explicit
//! user commands only:
//! - Moves are intents; the position changes when the server says so
//! - Clocks are derived from the last server timer, never counted locally
//! - Results and stake changes come from the server's game end
//! - Messages for any game other than the current one are dropped

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod account;
pub mod client;
pub mod config;
pub mod core;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use client::{ClientError, GameClient, Spectator};
pub use config::{ClientConfig, ConfigError};
pub use core::clock::{Clock, ManualClock, SystemClock};
pub use core::identity::{GameIdentity, GameKey, PersistedId, SessionId, Side};
pub use network::connection::{ConnectionManager, ConnectionState};
pub use session::events::SessionEvent;
pub use session::hub::SessionHub;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
