//! Game Session Reconciler
//!
//! The authoritative state machine for the one current game.
//!
//! ```text
//! idle ──► searching ──► in_session ──► ended ──► idle
//!   └──────────(resume / lobby match)──►┘
//! ```
//!
//! Entry to `in_session` always goes through [`GameReconciler::install`], which
//! replaces the identity and discards everything computed for the previous
//! game. Every inbound message is checked with [`GameIdentity::accepts`] before
//! it touches state; messages for any other game are dropped and counted.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::identity::{GameIdentity, GameKey, PersistedId, Side};
use crate::network::protocol::{
    ClientMessage, ErrorCode, GameEndInfo, GameRef, MatchFoundInfo, MoveIntent, Promotion,
    ServerError, StateSnapshot, TimerUpdate,
};
use crate::session::events::{Outbox, ResyncTrigger, SessionEvent};
use crate::session::timer::{ClockDisplay, TimerReconciler};

// =============================================================================
// TYPES
// =============================================================================

/// Top-level session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing outstanding.
    Idle,
    /// Waiting for matchmaking or a lobby.
    Searching,
    /// A game is installed and running.
    InSession,
    /// The game ended; result not yet acknowledged.
    Ended,
}

/// Authoritative view of the current game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSnapshot {
    /// Game this snapshot belongs to.
    pub identity: GameIdentity,
    /// Local player's seat.
    pub local_color: Side,
    /// Opaque serialized position.
    pub board: String,
    /// Side to move.
    pub turn: Side,
    /// Whether the local player is to move.
    pub is_local_turn: bool,
    /// Opponent's display name.
    pub opponent_name: String,
    /// Stake per player.
    pub wager: u64,
}

impl GameSnapshot {
    /// Initial snapshot from a match-found message.
    pub fn from_match(identity: GameIdentity, info: &MatchFoundInfo) -> Self {
        Self {
            identity,
            local_color: info.color,
            board: info.board.clone(),
            turn: info.turn,
            is_local_turn: info.turn == info.color,
            opponent_name: info.opponent_name.clone(),
            wager: info.wager,
        }
    }

    /// Snapshot from a full state message, seen from `local_color`.
    pub fn from_state(identity: GameIdentity, state: &StateSnapshot, local_color: Side) -> Self {
        Self {
            identity,
            local_color,
            board: state.board.clone(),
            turn: state.turn,
            is_local_turn: state.turn == local_color,
            opponent_name: state.players.name_of(local_color.opposite()).to_string(),
            wager: state.wager,
        }
    }
}

/// Result from the local player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Local player won.
    Win,
    /// Local player lost.
    Loss,
    /// Nobody won.
    Draw,
}

impl Outcome {
    /// Outcome read from the stake settlement when the local seat is unknown.
    ///
    /// A draw needs no seat; otherwise the sign of a non-zero delta decides.
    pub fn from_settlement(winner: Option<Side>, stake_delta: i64) -> Option<Self> {
        match (winner, stake_delta.signum()) {
            (None, _) => Some(Outcome::Draw),
            (Some(_), 1) => Some(Outcome::Win),
            (Some(_), -1) => Some(Outcome::Loss),
            _ => None,
        }
    }

    /// Outcome for `local` given the winning seat.
    pub fn for_side(local: Side, winner: Option<Side>) -> Self {
        match winner {
            None => Outcome::Draw,
            Some(side) if side == local => Outcome::Win,
            Some(_) => Outcome::Loss,
        }
    }
}

/// Terminal result of the current game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEndResult {
    /// Win, loss or draw.
    pub outcome: Outcome,
    /// Server-provided reason.
    pub reason: String,
    /// Balance change for the local player.
    pub stake_delta: i64,
    /// Whether the opponent left.
    pub opponent_disconnected: bool,
}

/// Local request rejected before anything was sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No game is in progress.
    #[error("no active game")]
    NoActiveGame,
    /// A search or lobby is already outstanding.
    #[error("a search is already outstanding")]
    AlreadySearching,
    /// A game is in progress.
    #[error("a game is in progress")]
    SessionInProgress,
    /// Balance has not been read from the account API yet.
    #[error("balance unknown")]
    BalanceUnknown,
    /// Stake exceeds the known balance.
    #[error("wager {wager} exceeds balance {balance}")]
    InsufficientBalance {
        /// Requested stake.
        wager: u64,
        /// Known balance.
        balance: u64,
    },
    /// Display name is empty.
    #[error("display name is blank")]
    BlankDisplayName,
    /// Lobby code is malformed.
    #[error("invalid lobby code: {0}")]
    InvalidLobbyCode(String),
    /// No lobby is outstanding.
    #[error("no lobby outstanding")]
    NoLobby,
}

// =============================================================================
// RECONCILER
// =============================================================================

/// Owns the current game identity and session phase.
#[derive(Debug)]
pub struct GameReconciler<C: Clock> {
    phase: SessionPhase,
    identity: Option<GameIdentity>,
    snapshot: Option<GameSnapshot>,
    result: Option<GameEndResult>,
    timer: TimerReconciler<C>,
    default_base_time_ms: u64,
    /// Resign already sent for this game.
    resigned: bool,
    /// Joined by persisted id and no state has arrived yet.
    awaiting_state: bool,
    /// Game end received before the local seat was known.
    pending_end: Option<GameEndInfo>,
    stale_dropped: u64,
}

impl<C: Clock> GameReconciler<C> {
    /// Idle reconciler. `base_time_ms` is used when a game announces none.
    pub fn new(clock: C, base_time_ms: u64) -> Self {
        Self {
            phase: SessionPhase::Idle,
            identity: None,
            snapshot: None,
            result: None,
            timer: TimerReconciler::new(clock, base_time_ms),
            default_base_time_ms: base_time_ms,
            resigned: false,
            awaiting_state: false,
            pending_end: None,
            stale_dropped: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Current game identity.
    pub fn identity(&self) -> Option<&GameIdentity> {
        self.identity.as_ref()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Option<&GameSnapshot> {
        self.snapshot.as_ref()
    }

    /// Result of the ended game.
    pub fn result(&self) -> Option<&GameEndResult> {
        self.result.as_ref()
    }

    /// Timer of the current game.
    pub fn timer(&self) -> &TimerReconciler<C> {
        &self.timer
    }

    /// Messages dropped because they belonged to another game.
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    /// Whether a persisted join is still waiting for its first state.
    pub fn is_awaiting_state(&self) -> bool {
        self.awaiting_state
    }

    // -------------------------------------------------------------------------
    // Phase transitions used by matchmaking and lobbies
    // -------------------------------------------------------------------------

    /// Enter `searching`. An unacknowledged result is acknowledged first.
    pub fn begin_search(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::InSession => return Err(SessionError::SessionInProgress),
            SessionPhase::Searching => return Err(SessionError::AlreadySearching),
            SessionPhase::Ended => {
                self.acknowledge_result();
            }
            SessionPhase::Idle => {}
        }
        self.phase = SessionPhase::Searching;
        Ok(())
    }

    /// Leave `searching` without a game. No-op in any other phase.
    pub fn end_search(&mut self) {
        if self.phase == SessionPhase::Searching {
            self.phase = SessionPhase::Idle;
        }
    }

    /// Install a new current game.
    ///
    /// Resets the timer to `base_time_ms` (or the default) and clears the
    /// previous result and resignation. `snapshot` is `None` when the game was
    /// joined by id and its state has not arrived yet.
    pub fn install(
        &mut self,
        identity: GameIdentity,
        snapshot: Option<GameSnapshot>,
        base_time_ms: Option<u64>,
        out: &mut Outbox,
    ) {
        info!(game = %identity, origin = ?identity.origin(), "Installing game");
        self.timer.reset(base_time_ms.unwrap_or(self.default_base_time_ms));
        self.awaiting_state = snapshot.is_none();
        self.identity = Some(identity);
        self.snapshot = snapshot.clone();
        self.result = None;
        self.pending_end = None;
        self.resigned = false;
        self.phase = SessionPhase::InSession;
        out.emit(SessionEvent::GameStarted { snapshot });
    }

    /// Install a game known only by persisted id and ask the server for it.
    ///
    /// Shared by lobby hand-off and resume after reload.
    pub fn join_persisted(&mut self, game_id: PersistedId, base_time_ms: Option<u64>, out: &mut Outbox) {
        self.install(GameIdentity::persisted(game_id.clone()), None, base_time_ms, out);
        out.send(ClientMessage::JoinGame { game_id });
    }

    /// Resume a game after a full reload.
    pub fn resume(&mut self, game_id: PersistedId, out: &mut Outbox) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::InSession => return Err(SessionError::SessionInProgress),
            SessionPhase::Searching => return Err(SessionError::AlreadySearching),
            SessionPhase::Ended => {
                self.acknowledge_result();
            }
            SessionPhase::Idle => {}
        }
        self.join_persisted(game_id, None, out);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Whether a message about `game` belongs to the current game.
    fn guard(&mut self, game: &GameRef, kind: &str) -> bool {
        let accepted = self
            .identity
            .as_ref()
            .map(|identity| identity.accepts(game))
            .unwrap_or(false);
        if !accepted {
            self.stale_dropped += 1;
            debug!(
                kind,
                game = ?game,
                current = ?self.identity.as_ref().map(|i| i.to_string()),
                dropped = self.stale_dropped,
                "Dropping message for another game"
            );
        }
        accepted
    }

    /// Apply a full state message. Returns whether it was applied.
    pub fn apply_snapshot(&mut self, state: &StateSnapshot, out: &mut Outbox) -> bool {
        if !self.guard(&state.game, "state") {
            return false;
        }
        if self.phase == SessionPhase::Ended && self.pending_end.is_some() {
            return self.settle_pending_end(state, out);
        }
        if self.phase != SessionPhase::InSession {
            debug!(phase = ?self.phase, "Ignoring state outside a running game");
            return false;
        }

        let Some(identity) = self.identity.as_mut() else {
            return false;
        };
        if identity.absorb(&state.game) {
            debug!(game = %identity, "Learned missing game id");
        }

        let local_color = match state.color.or(self.snapshot.as_ref().map(|s| s.local_color)) {
            Some(color) => color,
            None => {
                warn!(game = %identity, "State for own game carries no seat; ignoring");
                return false;
            }
        };

        let first = self.snapshot.is_none();
        let snapshot = GameSnapshot::from_state(identity.clone(), state, local_color);
        self.snapshot = Some(snapshot.clone());
        self.awaiting_state = false;

        if let Some(timer) = &state.timer {
            self.timer.apply(timer);
        }

        if first {
            out.emit(SessionEvent::GameStarted {
                snapshot: Some(snapshot),
            });
        } else {
            out.emit(SessionEvent::GameUpdated { snapshot });
        }
        true
    }

    /// Apply a clock update. Returns whether it was applied.
    pub fn apply_timer(&mut self, update: &TimerUpdate, out: &mut Outbox) -> bool {
        if !self.guard(&update.game, "timer") {
            return false;
        }
        if self.phase != SessionPhase::InSession {
            return false;
        }
        self.timer.apply(&update.state);
        out.emit(SessionEvent::Clock(self.timer.display()));
        true
    }

    /// Handle a terminal message. Returns whether it ended the current game.
    pub fn on_game_end(&mut self, info: &GameEndInfo, out: &mut Outbox) -> bool {
        if !self.guard(&info.game, "game_end") {
            return false;
        }
        if self.phase != SessionPhase::InSession {
            debug!(phase = ?self.phase, "Duplicate game end ignored");
            return false;
        }

        let outcome = match self.snapshot.as_ref() {
            Some(snapshot) => Some(Outcome::for_side(snapshot.local_color, info.winner)),
            None => Outcome::from_settlement(info.winner, info.stake_delta),
        };
        self.phase = SessionPhase::Ended;
        self.awaiting_state = false;

        match outcome {
            Some(outcome) => self.finish(outcome, info, out),
            None => {
                // Seat unknown: the game is over, the result waits for one more state.
                warn!(reason = %info.reason, "Game ended before any state arrived; asking for seat");
                self.pending_end = Some(info.clone());
                if let Some(msg) = self.resync_message() {
                    out.send(msg);
                }
            }
        }
        true
    }

    fn settle_pending_end(&mut self, state: &StateSnapshot, out: &mut Outbox) -> bool {
        let Some(local_color) = state.color else {
            return false;
        };
        let Some(info) = self.pending_end.take() else {
            return false;
        };
        if let Some(identity) = self.identity.as_mut() {
            identity.absorb(&state.game);
        }
        self.finish(Outcome::for_side(local_color, info.winner), &info, out);
        true
    }

    fn finish(&mut self, outcome: Outcome, info: &GameEndInfo, out: &mut Outbox) {
        let result = GameEndResult {
            outcome,
            reason: info.reason.clone(),
            stake_delta: info.stake_delta,
            opponent_disconnected: info.opponent_disconnected,
        };
        info!(outcome = ?result.outcome, reason = %result.reason, "Game ended");
        self.result = Some(result.clone());
        out.emit(SessionEvent::GameEnded(result));
    }

    /// Handle a server error. Returns whether it abandoned a pending resume.
    pub fn on_server_error(&mut self, error: &ServerError, out: &mut Outbox) -> bool {
        if error.code != ErrorCode::GameNotFound
            || !self.awaiting_state
            || self.phase != SessionPhase::InSession
        {
            return false;
        }
        let Some(GameKey::Persisted(game_id)) =
            self.identity.as_ref().and_then(GameIdentity::resume_key)
        else {
            return false;
        };

        warn!(%game_id, "Server does not know the game; abandoning join");
        self.clear();
        out.emit(SessionEvent::ResumeFailed { game_id });
        true
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Forward a move intent. No legality check, no local mutation.
    pub fn submit_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<Promotion>,
        out: &mut Outbox,
    ) -> Result<(), SessionError> {
        let identity = match (&self.identity, self.phase) {
            (Some(identity), SessionPhase::InSession) => identity,
            _ => return Err(SessionError::NoActiveGame),
        };
        out.send(ClientMessage::SubmitMove(MoveIntent {
            game: identity.to_ref(),
            from: from.to_string(),
            to: to.to_string(),
            promotion,
        }));
        Ok(())
    }

    /// Resign once. Returns false if nothing was sent.
    pub fn resign(&mut self, out: &mut Outbox) -> bool {
        if self.phase != SessionPhase::InSession || self.resigned {
            return false;
        }
        let Some(identity) = &self.identity else {
            return false;
        };
        out.send(ClientMessage::Resign {
            game: identity.to_ref(),
        });
        self.resigned = true;
        true
    }

    /// Ask the server for fresh state of the current game.
    ///
    /// Persisted games rejoin by id; ephemeral ones send `sync_request`.
    /// Only while a game is running.
    pub fn request_resync(&mut self, trigger: ResyncTrigger, out: &mut Outbox) -> bool {
        if self.phase != SessionPhase::InSession {
            debug!(?trigger, phase = ?self.phase, "No game to resync");
            return false;
        }
        let Some(msg) = self.resync_message() else {
            return false;
        };
        info!(?trigger, game = ?self.identity.as_ref().map(|i| i.to_string()), "Requesting resync");
        out.send(msg);
        out.emit(SessionEvent::ResyncSent { trigger });
        true
    }

    fn resync_message(&self) -> Option<ClientMessage> {
        let identity = self.identity.as_ref()?;
        Some(match identity.resume_key()? {
            GameKey::Persisted(game_id) => ClientMessage::JoinGame { game_id },
            GameKey::Ephemeral(_) => ClientMessage::SyncRequest {
                game: identity.to_ref(),
            },
        })
    }

    /// Leave `ended` for `idle`. Returns false if there was nothing to acknowledge.
    pub fn acknowledge_result(&mut self) -> bool {
        if self.phase != SessionPhase::Ended {
            return false;
        }
        self.clear();
        true
    }

    /// Current display clock, while a game is running.
    pub fn clock(&self) -> Option<ClockDisplay> {
        (self.phase == SessionPhase::InSession).then(|| self.timer.display())
    }

    fn clear(&mut self) {
        self.identity = None;
        self.snapshot = None;
        self.result = None;
        self.pending_end = None;
        self.resigned = false;
        self.awaiting_state = false;
        self.timer.reset(self.default_base_time_ms);
        self.phase = SessionPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::identity::SessionId;
    use crate::network::protocol::{Players, TimerState};
    use proptest::prelude::*;

    const T: i64 = 1_700_000_000_000;
    const BASE: u64 = 300_000;

    fn reconciler() -> (GameReconciler<ManualClock>, ManualClock) {
        let clock = ManualClock::new(T);
        (GameReconciler::new(clock.clone(), BASE), clock)
    }

    fn session_ref(id: &str) -> GameRef {
        GameRef {
            session_id: Some(SessionId::new(id)),
            game_id: None,
        }
    }

    fn match_found(id: &str) -> MatchFoundInfo {
        MatchFoundInfo {
            game: session_ref(id),
            color: Side::First,
            opponent_name: "Bob".into(),
            wager: 100,
            board: "start".into(),
            turn: Side::First,
            base_time_ms: Some(60_000),
        }
    }

    fn install(rec: &mut GameReconciler<ManualClock>, id: &str, out: &mut Outbox) {
        let info = match_found(id);
        let identity = GameIdentity::from_ref(&info.game).unwrap();
        let snapshot = GameSnapshot::from_match(identity.clone(), &info);
        rec.install(identity, Some(snapshot), info.base_time_ms, out);
    }

    fn state(game: GameRef, board: &str, turn: Side) -> StateSnapshot {
        StateSnapshot {
            game,
            board: board.into(),
            turn,
            color: Some(Side::First),
            players: Players {
                first: "Alice".into(),
                second: "Bob".into(),
            },
            wager: 100,
            timer: None,
        }
    }

    fn game_end(game: GameRef, winner: Option<Side>) -> GameEndInfo {
        GameEndInfo {
            game,
            winner,
            reason: "checkmate".into(),
            stake_delta: 100,
            opponent_disconnected: false,
        }
    }

    #[test]
    fn test_install_enters_session() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        rec.begin_search().unwrap();
        install(&mut rec, "mm_a", &mut out);

        assert_eq!(rec.phase(), SessionPhase::InSession);
        let snapshot = rec.snapshot().unwrap();
        assert!(snapshot.is_local_turn);
        assert_eq!(snapshot.opponent_name, "Bob");
        assert_eq!(rec.timer().remaining(Side::First), 60_000);
        assert!(matches!(
            out.pop_event(),
            Some(SessionEvent::GameStarted { snapshot: Some(_) })
        ));
    }

    #[test]
    fn test_matching_snapshot_applies() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        install(&mut rec, "mm_a", &mut out);

        assert!(rec.apply_snapshot(&state(session_ref("mm_a"), "after e4", Side::Second), &mut out));
        let snapshot = rec.snapshot().unwrap();
        assert_eq!(snapshot.board, "after e4");
        assert!(!snapshot.is_local_turn);
        assert_eq!(rec.stale_dropped(), 0);
    }

    #[test]
    fn test_stale_snapshot_is_dropped_and_counted() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        install(&mut rec, "mm_b", &mut out);
        let before = rec.snapshot().cloned();

        assert!(!rec.apply_snapshot(&state(session_ref("mm_a"), "old game", Side::Second), &mut out));
        assert_eq!(rec.snapshot().cloned(), before);
        assert_eq!(rec.stale_dropped(), 1);
    }

    #[test]
    fn test_snapshot_timer_is_applied() {
        let (mut rec, clock) = reconciler();
        let mut out = Outbox::new();
        install(&mut rec, "mm_a", &mut out);

        let mut update = state(session_ref("mm_a"), "b", Side::Second);
        update.timer = Some(TimerState {
            first_remaining_ms: 50_000,
            second_remaining_ms: 40_000,
            server_now_ms: T,
            running: Some(Side::Second),
        });
        rec.apply_snapshot(&update, &mut out);
        clock.advance(1_000);

        let display = rec.clock().unwrap();
        assert_eq!(display.first_ms, 50_000);
        assert_eq!(display.second_ms, 39_000);
    }

    #[test]
    fn test_stale_timer_is_dropped() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        install(&mut rec, "mm_b", &mut out);

        let update = TimerUpdate {
            game: session_ref("mm_a"),
            state: TimerState {
                first_remaining_ms: 1,
                second_remaining_ms: 1,
                server_now_ms: T,
                running: Some(Side::First),
            },
        };
        assert!(!rec.apply_timer(&update, &mut out));
        assert_eq!(rec.timer().remaining(Side::First), 60_000);
    }

    #[test]
    fn test_identity_change_resets_clock_to_base() {
        let (mut rec, clock) = reconciler();
        let mut out = Outbox::new();
        install(&mut rec, "mm_a", &mut out);
        rec.apply_timer(
            &TimerUpdate {
                game: session_ref("mm_a"),
                state: TimerState {
                    first_remaining_ms: 5_000,
                    second_remaining_ms: 7_000,
                    server_now_ms: T,
                    running: Some(Side::First),
                },
            },
            &mut out,
        );
        assert!(rec.on_game_end(&game_end(session_ref("mm_a"), None), &mut out));
        rec.begin_search().unwrap();

        rec.join_persisted(PersistedId::new("g2"), None, &mut out);
        clock.advance(10_000);

        assert_eq!(rec.timer().remaining(Side::First), BASE);
        assert_eq!(rec.timer().remaining(Side::Second), BASE);
    }

    #[test]
    fn test_game_end_builds_result_once() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        install(&mut rec, "mm_a", &mut out);

        assert!(rec.on_game_end(&game_end(session_ref("mm_a"), Some(Side::First)), &mut out));
        assert_eq!(rec.phase(), SessionPhase::Ended);
        assert_eq!(rec.result().unwrap().outcome, Outcome::Win);

        // A second terminal message changes nothing.
        assert!(!rec.on_game_end(&game_end(session_ref("mm_a"), Some(Side::Second)), &mut out));
        assert_eq!(rec.result().unwrap().outcome, Outcome::Win);
    }

    #[test]
    fn test_stale_game_end_does_not_touch_new_session() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        install(&mut rec, "mm_a", &mut out);
        // Re-queue race: B is installed before A's terminal message lands.
        install(&mut rec, "mm_b", &mut out);

        assert!(!rec.on_game_end(&game_end(session_ref("mm_a"), Some(Side::Second)), &mut out));
        assert_eq!(rec.phase(), SessionPhase::InSession);
        assert!(rec.result().is_none());
        assert_eq!(rec.stale_dropped(), 1);
    }

    #[test]
    fn test_result_does_not_resurrect_after_requeue() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        install(&mut rec, "mm_a", &mut out);
        assert!(rec.on_game_end(&game_end(session_ref("mm_a"), Some(Side::Second)), &mut out));

        rec.begin_search().unwrap();
        assert!(rec.result().is_none());
        install(&mut rec, "mm_b", &mut out);

        // A duplicate of A's result arrives late.
        assert!(!rec.on_game_end(&game_end(session_ref("mm_a"), Some(Side::Second)), &mut out));
        assert!(rec.result().is_none());
        assert_eq!(rec.phase(), SessionPhase::InSession);
    }

    #[test]
    fn test_submit_move_requires_session() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        assert_eq!(
            rec.submit_move("e2", "e4", None, &mut out),
            Err(SessionError::NoActiveGame)
        );
        assert!(out.is_empty());

        install(&mut rec, "mm_a", &mut out);
        rec.submit_move("e7", "e8", Some(Promotion::Queen), &mut out).unwrap();
        let sent = out.take_messages();
        assert_eq!(
            sent,
            vec![ClientMessage::SubmitMove(MoveIntent {
                game: session_ref("mm_a"),
                from: "e7".into(),
                to: "e8".into(),
                promotion: Some(Promotion::Queen),
            })]
        );
        // No optimistic mutation.
        assert_eq!(rec.snapshot().unwrap().board, "start");
    }

    #[test]
    fn test_resign_is_idempotent() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        assert!(!rec.resign(&mut out));

        install(&mut rec, "mm_a", &mut out);
        assert!(rec.resign(&mut out));
        assert!(!rec.resign(&mut out));
        assert_eq!(out.take_messages().len(), 1);

        rec.on_game_end(&game_end(session_ref("mm_a"), Some(Side::Second)), &mut out);
        assert!(!rec.resign(&mut out));
        assert!(out.take_messages().is_empty());
    }

    #[test]
    fn test_resync_message_depends_on_identity() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        assert!(!rec.request_resync(ResyncTrigger::FocusRegained, &mut out));

        install(&mut rec, "mm_a", &mut out);
        assert!(rec.request_resync(ResyncTrigger::VisibilityRegained, &mut out));
        assert_eq!(
            out.take_messages(),
            vec![ClientMessage::SyncRequest {
                game: session_ref("mm_a")
            }]
        );

        rec.on_game_end(&game_end(session_ref("mm_a"), None), &mut out);
        rec.acknowledge_result();
        rec.join_persisted(PersistedId::new("g9"), None, &mut out);
        out.take_messages();
        assert!(rec.request_resync(ResyncTrigger::Reconnected, &mut out));
        assert_eq!(
            out.take_messages(),
            vec![ClientMessage::JoinGame {
                game_id: PersistedId::new("g9")
            }]
        );
    }

    #[test]
    fn test_persisted_join_learns_session_id() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        rec.resume(PersistedId::new("g1"), &mut out).unwrap();
        assert!(rec.is_awaiting_state());
        assert!(rec.snapshot().is_none());

        let game = GameRef {
            session_id: Some(SessionId::new("room_7")),
            game_id: Some(PersistedId::new("g1")),
        };
        assert!(rec.apply_snapshot(&state(game, "mid", Side::First), &mut out));
        assert!(!rec.is_awaiting_state());
        assert_eq!(
            rec.identity().unwrap().session_id(),
            Some(&SessionId::new("room_7"))
        );

        // Later messages may carry only the session id.
        assert!(rec.apply_snapshot(&state(session_ref("room_7"), "later", Side::Second), &mut out));
    }

    #[test]
    fn test_game_not_found_abandons_resume() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        rec.resume(PersistedId::new("gone"), &mut out).unwrap();

        let error = ServerError {
            code: ErrorCode::GameNotFound,
            message: "no such game".into(),
        };
        assert!(rec.on_server_error(&error, &mut out));
        assert_eq!(rec.phase(), SessionPhase::Idle);
        assert!(rec.identity().is_none());
    }

    fn persisted_ref(id: &str) -> GameRef {
        GameRef {
            session_id: None,
            game_id: Some(PersistedId::new(id)),
        }
    }

    #[test]
    fn test_game_end_before_state_reads_settlement() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        rec.resume(PersistedId::new("g1"), &mut out).unwrap();

        let mut end = game_end(persisted_ref("g1"), Some(Side::First));
        end.stake_delta = -100;
        assert!(rec.on_game_end(&end, &mut out));
        assert_eq!(rec.phase(), SessionPhase::Ended);
        assert_eq!(rec.result().unwrap().outcome, Outcome::Loss);

        // Free to queue again.
        rec.begin_search().unwrap();
        assert_eq!(rec.phase(), SessionPhase::Searching);
    }

    #[test]
    fn test_game_end_before_state_waits_for_seat() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        rec.resume(PersistedId::new("g1"), &mut out).unwrap();
        out.take_messages();

        let mut end = game_end(persisted_ref("g1"), Some(Side::Second));
        end.stake_delta = 0;
        assert!(rec.on_game_end(&end, &mut out));
        assert_eq!(rec.phase(), SessionPhase::Ended);
        assert!(rec.result().is_none());
        assert_eq!(
            out.take_messages(),
            vec![ClientMessage::JoinGame {
                game_id: PersistedId::new("g1")
            }]
        );

        let mut seat = state(persisted_ref("g1"), "final", Side::First);
        seat.color = Some(Side::Second);
        assert!(rec.apply_snapshot(&seat, &mut out));
        assert_eq!(rec.phase(), SessionPhase::Ended);
        assert_eq!(rec.result().unwrap().outcome, Outcome::Win);
        assert!(std::iter::from_fn(|| out.pop_event())
            .any(|e| matches!(e, SessionEvent::GameEnded(_))));
    }

    #[test]
    fn test_pending_end_does_not_block_requeue() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        rec.resume(PersistedId::new("g1"), &mut out).unwrap();

        let mut end = game_end(persisted_ref("g1"), Some(Side::First));
        end.stake_delta = 0;
        rec.on_game_end(&end, &mut out);

        rec.begin_search().unwrap();
        assert!(rec.identity().is_none());

        // The seat arriving late no longer finds a game to settle.
        let mut seat = state(persisted_ref("g1"), "final", Side::First);
        seat.color = Some(Side::First);
        assert!(!rec.apply_snapshot(&seat, &mut out));
        assert!(rec.result().is_none());
    }

    #[test]
    fn test_outcome_from_settlement() {
        assert_eq!(Outcome::from_settlement(None, 0), Some(Outcome::Draw));
        assert_eq!(Outcome::from_settlement(Some(Side::First), 50), Some(Outcome::Win));
        assert_eq!(Outcome::from_settlement(Some(Side::First), -50), Some(Outcome::Loss));
        assert_eq!(Outcome::from_settlement(Some(Side::First), 0), None);
    }

    #[test]
    fn test_begin_search_from_ended_acknowledges() {
        let (mut rec, _) = reconciler();
        let mut out = Outbox::new();
        install(&mut rec, "mm_a", &mut out);
        assert_eq!(rec.begin_search(), Err(SessionError::SessionInProgress));

        rec.on_game_end(&game_end(session_ref("mm_a"), None), &mut out);
        rec.begin_search().unwrap();
        assert_eq!(rec.phase(), SessionPhase::Searching);
        assert!(rec.result().is_none());
        assert!(rec.identity().is_none());
        assert_eq!(rec.begin_search(), Err(SessionError::AlreadySearching));
    }

    #[test]
    fn test_outcome_for_side() {
        assert_eq!(Outcome::for_side(Side::First, Some(Side::First)), Outcome::Win);
        assert_eq!(Outcome::for_side(Side::First, Some(Side::Second)), Outcome::Loss);
        assert_eq!(Outcome::for_side(Side::Second, None), Outcome::Draw);
    }

    proptest! {
        #[test]
        fn prop_foreign_snapshots_never_change_state(
            updates in prop::collection::vec((any::<bool>(), "[a-z]{1,8}"), 1..20),
        ) {
            let (mut rec, _) = reconciler();
            let mut out = Outbox::new();
            install(&mut rec, "mm_current", &mut out);

            for (own, board) in updates {
                let before = rec.snapshot().cloned();
                let game = if own { session_ref("mm_current") } else { session_ref("mm_previous") };
                let applied = rec.apply_snapshot(&state(game, &board, Side::Second), &mut out);

                prop_assert_eq!(applied, own);
                if own {
                    prop_assert_eq!(&rec.snapshot().unwrap().board, &board);
                } else {
                    prop_assert_eq!(rec.snapshot().cloned(), before);
                }
            }
        }
    }
}
