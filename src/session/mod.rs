//! Session Layer
//!
//! Synchronous state machines driven by connection events and user commands.
//! Nothing here performs I/O; intents for the server are collected in an
//! [`Outbox`](events::Outbox).

pub mod events;
pub mod hub;
pub mod lobby;
pub mod matchmaking;
pub mod reconciler;
pub mod spectator;
pub mod timer;

pub use events::{Outbox, ResyncTrigger, SearchEndReason, SessionEvent};
pub use hub::SessionHub;
pub use lobby::{Lobby, LobbyBridge, LobbyRole, LobbyState};
pub use matchmaking::{Matchmaker, MatchmakingRequest};
pub use reconciler::{
    GameEndResult, GameReconciler, GameSnapshot, Outcome, SessionError, SessionPhase,
};
pub use spectator::{
    SpectatorIntent, SpectatorPhase, SpectatorSession, SpectatorSummary, SpectatorView,
};
pub use timer::{ClockDisplay, TimerReconciler, TimerSnapshot, DEFAULT_BASE_TIME_MS};
