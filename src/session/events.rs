//! Session Events
//!
//! What the session layer tells its owner, and the outbox that collects both
//! those events and the intents bound for the server.

use std::collections::VecDeque;

use crate::core::identity::PersistedId;
use crate::network::connection::ConnectionState;
use crate::network::protocol::{ClientMessage, ErrorCode};
use crate::session::reconciler::{GameEndResult, GameSnapshot};
use crate::session::spectator::{SpectatorSummary, SpectatorView};
use crate::session::timer::ClockDisplay;

/// Why a resync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncTrigger {
    /// The host view became visible again.
    VisibilityRegained,
    /// The host window regained focus.
    FocusRegained,
    /// The connection came back after a drop.
    Reconnected,
}

/// Why a search or lobby ended without a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEndReason {
    /// The user cancelled.
    Cancelled,
    /// The server dropped the request.
    Failed,
    /// The lobby timed out or was closed.
    Expired,
}

/// Observable session changes, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection lifecycle change.
    ConnectionChanged {
        /// New state.
        state: ConnectionState,
        /// Retry number, 0 when connected.
        attempt: u32,
    },
    /// Reconnect attempts exhausted. Requires a new `connect`.
    ConnectionLost {
        /// Retries made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },
    /// Matchmaking request sent.
    SearchStarted {
        /// Stake per player.
        wager: u64,
    },
    /// Search or lobby ended without a game.
    SearchEnded {
        /// Why.
        reason: SearchEndReason,
    },
    /// A lobby was requested under `code`.
    LobbyCreated {
        /// Shareable code.
        code: String,
        /// Stake per player.
        wager: u64,
    },
    /// The server confirmed the lobby and is waiting for the second participant.
    LobbyOpen {
        /// Lobby code.
        code: String,
        /// Stake per player, if announced.
        wager: Option<u64>,
    },
    /// A game was installed; `snapshot` is `None` until the first state arrives.
    GameStarted {
        /// Initial snapshot, when known.
        snapshot: Option<GameSnapshot>,
    },
    /// Authoritative state applied.
    GameUpdated {
        /// New snapshot.
        snapshot: GameSnapshot,
    },
    /// Display clock tick or new authoritative clock.
    Clock(ClockDisplay),
    /// The current game ended.
    GameEnded(GameEndResult),
    /// A resume by persisted id was refused by the server.
    ResumeFailed {
        /// Id that could not be resumed.
        game_id: PersistedId,
    },
    /// A resync intent was sent.
    ResyncSent {
        /// What caused it.
        trigger: ResyncTrigger,
    },
    /// Known balance changed.
    BalanceChanged {
        /// New balance.
        balance: u64,
    },
    /// Spectated game changed.
    SpectatorUpdated(SpectatorView),
    /// Spectated game ended; stays finished until detach.
    SpectatorFinished(SpectatorSummary),
    /// Error reported by the server.
    ServerError {
        /// Error code.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },
}

/// Collected output of session handlers.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: VecDeque<ClientMessage>,
    events: VecDeque<SessionEvent>,
}

impl Outbox {
    /// Empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an intent for the server.
    pub fn send(&mut self, msg: ClientMessage) {
        self.messages.push_back(msg);
    }

    /// Queue an event for the owner.
    pub fn emit(&mut self, event: SessionEvent) {
        self.events.push_back(event);
    }

    /// Take every queued intent, oldest first.
    pub fn take_messages(&mut self) -> Vec<ClientMessage> {
        self.messages.drain(..).collect()
    }

    /// Next queued event.
    pub fn pop_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Queued intents, without taking them.
    pub fn messages(&self) -> impl Iterator<Item = &ClientMessage> {
        self.messages.iter()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.events.is_empty()
    }
}
