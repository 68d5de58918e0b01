//! Spectator Attach
//!
//! Read-only subscription to someone else's game. A spectator can only ever
//! produce [`SpectatorIntent`]s, and neither that type nor
//! [`SpectatorSession`] has a way to express a move or a resignation.
//!
//! ```
//! use duel_client::core::{GameKey, SessionId, SystemClock};
//! use duel_client::session::spectator::SpectatorSession;
//!
//! let mut spectator = SpectatorSession::new(SystemClock, 600_000);
//! let intents = spectator.attach(GameKey::Ephemeral(SessionId::new("mm_1")));
//! assert_eq!(intents.len(), 1);
//! assert!(spectator.view().is_none());
//! ```
//!
//! Submitting a move does not type-check:
//!
//! ```compile_fail
//! use duel_client::core::{GameKey, SessionId, SystemClock};
//! use duel_client::session::spectator::SpectatorSession;
//!
//! let mut spectator = SpectatorSession::new(SystemClock, 600_000);
//! spectator.attach(GameKey::Ephemeral(SessionId::new("mm_1")));
//! spectator.submit_move("e2", "e4", None);
//! ```
//!
//! Neither does resigning:
//!
//! ```compile_fail
//! use duel_client::core::{GameKey, SessionId, SystemClock};
//! use duel_client::session::spectator::SpectatorSession;
//!
//! let mut spectator = SpectatorSession::new(SystemClock, 600_000);
//! spectator.attach(GameKey::Ephemeral(SessionId::new("mm_1")));
//! spectator.resign();
//! ```

use tracing::{debug, info};

use crate::core::clock::Clock;
use crate::core::identity::{GameIdentity, GameKey, Side};
use crate::network::protocol::{ClientMessage, GameRef, Players, ServerMessage};
use crate::session::events::SessionEvent;
use crate::session::timer::{ClockDisplay, TimerReconciler};

/// Everything a spectator may ask of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpectatorIntent {
    /// Start receiving a game's updates.
    Watch(GameRef),
    /// Stop receiving them.
    Unwatch(GameRef),
}

impl SpectatorIntent {
    /// Wire message for this intent.
    pub fn into_message(self) -> ClientMessage {
        match self {
            SpectatorIntent::Watch(game) => ClientMessage::Spectate { game },
            SpectatorIntent::Unwatch(game) => ClientMessage::StopSpectating { game },
        }
    }
}

/// Where the spectator is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectatorPhase {
    /// Not attached.
    Detached,
    /// Attached to a running game.
    Watching,
    /// The watched game ended; waiting for `detach`.
    Finished,
}

/// Current picture of the watched game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectatorView {
    /// Game being watched.
    pub target: GameKey,
    /// Opaque position.
    pub board: String,
    /// Side to move.
    pub turn: Side,
    /// Names of both seats.
    pub players: Players,
    /// Stake per player.
    pub wager: u64,
    /// Both clocks.
    pub clock: ClockDisplay,
}

/// Read-only summary of a finished watched game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectatorSummary {
    /// Game that ended.
    pub target: GameKey,
    /// Winning seat; `None` for a draw.
    pub winner: Option<Side>,
    /// Winner's name, when known.
    pub winner_name: Option<String>,
    /// Server-provided reason.
    pub reason: String,
    /// Last known position.
    pub final_board: Option<String>,
}

#[derive(Debug, Clone)]
struct Position {
    board: String,
    turn: Side,
    players: Players,
    wager: u64,
}

/// A read-only attachment to another game.
#[derive(Debug)]
pub struct SpectatorSession<C: Clock> {
    target: Option<GameKey>,
    identity: Option<GameIdentity>,
    position: Option<Position>,
    summary: Option<SpectatorSummary>,
    timer: TimerReconciler<C>,
    base_time_ms: u64,
}

impl<C: Clock> SpectatorSession<C> {
    /// Detached session.
    pub fn new(clock: C, base_time_ms: u64) -> Self {
        Self {
            target: None,
            identity: None,
            position: None,
            summary: None,
            timer: TimerReconciler::new(clock, base_time_ms),
            base_time_ms,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SpectatorPhase {
        match (&self.target, &self.summary) {
            (None, _) => SpectatorPhase::Detached,
            (Some(_), None) => SpectatorPhase::Watching,
            (Some(_), Some(_)) => SpectatorPhase::Finished,
        }
    }

    /// Game being watched.
    pub fn target(&self) -> Option<&GameKey> {
        self.target.as_ref()
    }

    /// Watch `target`, leaving any previous target first.
    pub fn attach(&mut self, target: GameKey) -> Vec<SpectatorIntent> {
        let mut intents = Vec::with_capacity(2);
        if let Some(previous) = self.detach() {
            intents.push(previous);
        }
        info!(%target, "Spectating");
        intents.push(SpectatorIntent::Watch(target.to_ref()));
        self.identity = Some(GameIdentity::from_key(target.clone()));
        self.target = Some(target);
        intents
    }

    /// Stop watching. Every later message is ignored.
    pub fn detach(&mut self) -> Option<SpectatorIntent> {
        let target = self.target.take()?;
        debug!(%target, "Detaching spectator");
        self.identity = None;
        self.position = None;
        self.summary = None;
        self.timer.reset(self.base_time_ms);
        Some(SpectatorIntent::Unwatch(target.to_ref()))
    }

    /// Re-subscribe after a reconnect. Only while the game is running.
    pub fn rewatch(&self) -> Option<SpectatorIntent> {
        match (self.phase(), &self.target) {
            (SpectatorPhase::Watching, Some(target)) => Some(SpectatorIntent::Watch(target.to_ref())),
            _ => None,
        }
    }

    /// Feed a server message. Returns an event if the view changed.
    pub fn handle(&mut self, msg: &ServerMessage) -> Option<SessionEvent> {
        if self.phase() != SpectatorPhase::Watching {
            return None;
        }
        let identity = self.identity.as_mut()?;

        match msg {
            ServerMessage::State(state) => {
                if !identity.accepts(&state.game) {
                    return None;
                }
                identity.absorb(&state.game);
                self.position = Some(Position {
                    board: state.board.clone(),
                    turn: state.turn,
                    players: state.players.clone(),
                    wager: state.wager,
                });
                if let Some(timer) = &state.timer {
                    self.timer.apply(timer);
                }
                self.view().map(SessionEvent::SpectatorUpdated)
            }
            ServerMessage::Timer(update) => {
                if !identity.accepts(&update.game) {
                    return None;
                }
                self.timer.apply(&update.state);
                self.view().map(SessionEvent::SpectatorUpdated)
            }
            ServerMessage::GameEnd(end) => {
                if !identity.accepts(&end.game) {
                    return None;
                }
                let target = self.target.clone()?;
                let winner_name = match (&self.position, end.winner) {
                    (Some(position), Some(side)) => Some(position.players.name_of(side).to_string()),
                    _ => None,
                };
                let summary = SpectatorSummary {
                    target,
                    winner: end.winner,
                    winner_name,
                    reason: end.reason.clone(),
                    final_board: self.position.as_ref().map(|p| p.board.clone()),
                };
                info!(winner = ?summary.winner, reason = %summary.reason, "Watched game ended");
                self.summary = Some(summary.clone());
                Some(SessionEvent::SpectatorFinished(summary))
            }
            _ => None,
        }
    }

    /// Current view, once the first state has arrived.
    pub fn view(&self) -> Option<SpectatorView> {
        let target = self.target.clone()?;
        let position = self.position.as_ref()?;
        Some(SpectatorView {
            target,
            board: position.board.clone(),
            turn: position.turn,
            players: position.players.clone(),
            wager: position.wager,
            clock: self.timer.display(),
        })
    }

    /// Summary of the finished game.
    pub fn summary(&self) -> Option<&SpectatorSummary> {
        self.summary.as_ref()
    }

    /// Display clock while watching a running game.
    pub fn clock(&self) -> Option<ClockDisplay> {
        (self.phase() == SpectatorPhase::Watching && self.position.is_some())
            .then(|| self.timer.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::identity::{PersistedId, SessionId};
    use crate::network::protocol::{GameEndInfo, StateSnapshot, TimerState, TimerUpdate};

    const T: i64 = 1_700_000_000_000;

    fn key() -> GameKey {
        GameKey::Persisted(PersistedId::new("g1"))
    }

    fn state(game: GameRef, board: &str) -> ServerMessage {
        ServerMessage::State(StateSnapshot {
            game,
            board: board.into(),
            turn: Side::First,
            color: None,
            players: Players {
                first: "Alice".into(),
                second: "Bob".into(),
            },
            wager: 20,
            timer: None,
        })
    }

    fn both(session: &str, game: &str) -> GameRef {
        GameRef {
            session_id: Some(SessionId::new(session)),
            game_id: Some(PersistedId::new(game)),
        }
    }

    fn end(game: GameRef, winner: Option<Side>) -> ServerMessage {
        ServerMessage::GameEnd(GameEndInfo {
            game,
            winner,
            reason: "resignation".into(),
            stake_delta: 0,
            opponent_disconnected: false,
        })
    }

    #[test]
    fn test_attach_and_detach_intents() {
        let mut spectator = SpectatorSession::new(ManualClock::new(T), 60_000);
        assert!(spectator.detach().is_none());

        let intents = spectator.attach(key());
        assert_eq!(intents, vec![SpectatorIntent::Watch(key().to_ref())]);
        assert_eq!(spectator.phase(), SpectatorPhase::Watching);

        let other = GameKey::Ephemeral(SessionId::new("mm_9"));
        let intents = spectator.attach(other.clone());
        assert_eq!(
            intents,
            vec![
                SpectatorIntent::Unwatch(key().to_ref()),
                SpectatorIntent::Watch(other.to_ref()),
            ]
        );
        assert_eq!(
            SpectatorIntent::Watch(other.to_ref()).into_message(),
            ClientMessage::Spectate { game: other.to_ref() }
        );
    }

    #[test]
    fn test_follows_target_and_ignores_others() {
        let clock = ManualClock::new(T);
        let mut spectator = SpectatorSession::new(clock.clone(), 60_000);
        spectator.attach(key());

        assert!(spectator.handle(&state(both("mm_x", "other"), "nope")).is_none());
        assert!(spectator.view().is_none());

        let event = spectator.handle(&state(both("room_1", "g1"), "pos1"));
        assert!(matches!(event, Some(SessionEvent::SpectatorUpdated(_))));
        assert_eq!(spectator.view().unwrap().board, "pos1");

        // Session id learned from the first state.
        let timer = ServerMessage::Timer(TimerUpdate {
            game: GameRef {
                session_id: Some(SessionId::new("room_1")),
                game_id: None,
            },
            state: TimerState {
                first_remaining_ms: 30_000,
                second_remaining_ms: 20_000,
                server_now_ms: T,
                running: Some(Side::First),
            },
        });
        assert!(spectator.handle(&timer).is_some());
        clock.advance(5_000);
        assert_eq!(spectator.clock().unwrap().first_ms, 25_000);
    }

    #[test]
    fn test_game_end_finishes_until_detach() {
        let mut spectator = SpectatorSession::new(ManualClock::new(T), 60_000);
        spectator.attach(key());
        spectator.handle(&state(both("room_1", "g1"), "final"));

        let event = spectator.handle(&end(both("room_1", "g1"), Some(Side::Second)));
        match event {
            Some(SessionEvent::SpectatorFinished(summary)) => {
                assert_eq!(summary.winner_name.as_deref(), Some("Bob"));
                assert_eq!(summary.final_board.as_deref(), Some("final"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(spectator.phase(), SpectatorPhase::Finished);
        assert!(spectator.rewatch().is_none());

        // Stays finished.
        assert!(spectator.handle(&state(both("room_1", "g1"), "later")).is_none());
        assert_eq!(spectator.summary().unwrap().final_board.as_deref(), Some("final"));

        assert!(spectator.detach().is_some());
        assert_eq!(spectator.phase(), SpectatorPhase::Detached);
        assert!(spectator.summary().is_none());
    }

    #[test]
    fn test_detached_ignores_everything() {
        let mut spectator = SpectatorSession::new(ManualClock::new(T), 60_000);
        spectator.attach(key());
        spectator.detach();

        assert!(spectator.handle(&state(both("room_1", "g1"), "pos")).is_none());
        assert!(spectator.handle(&end(both("room_1", "g1"), None)).is_none());
        assert!(spectator.view().is_none());
    }

    #[test]
    fn test_rewatch_while_running() {
        let mut spectator = SpectatorSession::new(ManualClock::new(T), 60_000);
        assert!(spectator.rewatch().is_none());
        spectator.attach(key());
        assert_eq!(spectator.rewatch(), Some(SpectatorIntent::Watch(key().to_ref())));
    }
}
