//! Session Hub
//!
//! Composition of the session components. Every command and every inbound
//! event is one synchronous `&mut` call; the results collect in an [`Outbox`]
//! that the owner drains.

use tracing::{debug, info};

use crate::core::clock::Clock;
use crate::core::identity::{GameIdentity, GameKey, PersistedId};
use crate::network::connection::ConnectionEvent;
use crate::network::protocol::{ClientMessage, Promotion, ServerMessage};
use crate::session::events::{Outbox, ResyncTrigger, SessionEvent};
use crate::session::lobby::{Lobby, LobbyBridge};
use crate::session::matchmaking::{Matchmaker, MatchmakingRequest};
use crate::session::reconciler::{
    GameEndResult, GameReconciler, GameSnapshot, SessionError, SessionPhase,
};
use crate::session::spectator::SpectatorSession;
use crate::session::timer::ClockDisplay;

/// All session state of one client.
#[derive(Debug)]
pub struct SessionHub<C: Clock> {
    reconciler: GameReconciler<C>,
    matchmaker: Matchmaker,
    lobby: LobbyBridge,
    spectator: SpectatorSession<C>,
    balance: Option<u64>,
    outbox: Outbox,
}

impl<C: Clock> SessionHub<C> {
    /// Idle hub. `base_time_ms` is the clock shown before a game reports one.
    pub fn new(clock: C, base_time_ms: u64) -> Self {
        Self {
            reconciler: GameReconciler::new(clock.clone(), base_time_ms),
            matchmaker: Matchmaker::new(),
            lobby: LobbyBridge::new(),
            spectator: SpectatorSession::new(clock, base_time_ms),
            balance: None,
            outbox: Outbox::new(),
        }
    }

    // =========================================================================
    // STATE
    // =========================================================================

    /// Session phase.
    pub fn phase(&self) -> SessionPhase {
        self.reconciler.phase()
    }

    /// Current game identity.
    pub fn identity(&self) -> Option<&GameIdentity> {
        self.reconciler.identity()
    }

    /// Current game snapshot.
    pub fn snapshot(&self) -> Option<&GameSnapshot> {
        self.reconciler.snapshot()
    }

    /// Result of the ended game.
    pub fn result(&self) -> Option<&GameEndResult> {
        self.reconciler.result()
    }

    /// Display clock of the current game.
    pub fn clock(&self) -> Option<ClockDisplay> {
        self.reconciler.clock()
    }

    /// Known balance.
    pub fn balance(&self) -> Option<u64> {
        self.balance
    }

    /// Outstanding matchmaking request.
    pub fn matchmaking(&self) -> Option<&MatchmakingRequest> {
        self.matchmaker.outstanding()
    }

    /// Outstanding lobby.
    pub fn lobby(&self) -> Option<&Lobby> {
        self.lobby.current()
    }

    /// Spectator attachment.
    pub fn spectator(&self) -> &SpectatorSession<C> {
        &self.spectator
    }

    /// Messages dropped because they belonged to another game.
    pub fn stale_dropped(&self) -> u64 {
        self.reconciler.stale_dropped()
    }

    /// Record a balance read from the account API.
    pub fn set_balance(&mut self, balance: u64) {
        if self.balance != Some(balance) {
            self.balance = Some(balance);
            self.outbox.emit(SessionEvent::BalanceChanged { balance });
        }
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Join the matchmaking queue.
    pub fn find_match(&mut self, wager: u64, display_name: &str) -> Result<(), SessionError> {
        self.matchmaker.find_match(
            wager,
            display_name,
            self.balance,
            &mut self.reconciler,
            &mut self.outbox,
        )
    }

    /// Leave the matchmaking queue. No-op unless searching.
    pub fn cancel_search(&mut self) -> bool {
        self.matchmaker
            .cancel_search(&mut self.reconciler, &mut self.outbox)
    }

    /// Create a private lobby and return its code.
    pub fn create_lobby(&mut self, wager: u64) -> Result<String, SessionError> {
        if self.matchmaker.is_searching() {
            return Err(SessionError::AlreadySearching);
        }
        self.lobby
            .create_lobby(wager, self.balance, &mut self.reconciler, &mut self.outbox)
    }

    /// Join a private lobby by code.
    pub fn join_lobby(&mut self, code: &str) -> Result<String, SessionError> {
        if self.matchmaker.is_searching() {
            return Err(SessionError::AlreadySearching);
        }
        self.lobby
            .join_lobby(code, &mut self.reconciler, &mut self.outbox)
    }

    /// Abandon the outstanding lobby.
    pub fn leave_lobby(&mut self) -> Result<(), SessionError> {
        self.lobby
            .leave_lobby(&mut self.reconciler, &mut self.outbox)
    }

    /// Send a move intent for the current game.
    pub fn submit_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<Promotion>,
    ) -> Result<(), SessionError> {
        self.reconciler
            .submit_move(from, to, promotion, &mut self.outbox)
    }

    /// Resign the current game once.
    pub fn resign(&mut self) -> bool {
        self.reconciler.resign(&mut self.outbox)
    }

    /// Ask for fresh state of the current game.
    pub fn request_resync(&mut self, trigger: ResyncTrigger) -> bool {
        self.reconciler.request_resync(trigger, &mut self.outbox)
    }

    /// Resume a game by persisted id after a reload.
    pub fn resume(&mut self, game_id: PersistedId) -> Result<(), SessionError> {
        if self.matchmaker.is_searching() || self.lobby.current().is_some() {
            return Err(SessionError::AlreadySearching);
        }
        self.reconciler.resume(game_id, &mut self.outbox)?;
        self.matchmaker.settle();
        Ok(())
    }

    /// Dismiss the result of the ended game.
    pub fn acknowledge_result(&mut self) -> bool {
        self.reconciler.acknowledge_result()
    }

    /// Watch another game.
    pub fn spectate(&mut self, target: GameKey) {
        for intent in self.spectator.attach(target) {
            self.outbox.send(intent.into_message());
        }
    }

    /// Stop watching. Returns false if nothing was watched.
    pub fn stop_spectating(&mut self) -> bool {
        match self.spectator.detach() {
            Some(intent) => {
                self.outbox.send(intent.into_message());
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Handle one event from the connection.
    pub fn handle_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged { state, attempt } => {
                self.outbox
                    .emit(SessionEvent::ConnectionChanged { state, attempt });
            }
            ConnectionEvent::Message(msg) => self.handle_message(&msg),
            ConnectionEvent::ResyncRequested => {
                self.reconciler
                    .request_resync(ResyncTrigger::Reconnected, &mut self.outbox);
                if let Some(intent) = self.spectator.rewatch() {
                    self.outbox.send(intent.into_message());
                }
            }
            ConnectionEvent::GaveUp { attempts, reason } => {
                self.outbox
                    .emit(SessionEvent::ConnectionLost { attempts, reason });
            }
        }
    }

    /// Handle one server message.
    pub fn handle_message(&mut self, msg: &ServerMessage) {
        if let Some(event) = self.spectator.handle(msg) {
            self.outbox.emit(event);
            if !self.owns(msg) {
                return;
            }
        }

        match msg {
            ServerMessage::AuthResult(_) => {}
            ServerMessage::Matchmaking(response) => {
                self.matchmaker
                    .on_status(response, &mut self.reconciler, &mut self.outbox);
            }
            ServerMessage::MatchFound(info) => {
                if self
                    .matchmaker
                    .on_match_found(info, &mut self.reconciler, &mut self.outbox)
                {
                    self.lobby.abandon(&mut self.outbox);
                }
            }
            ServerMessage::RoomUpdate(update) => {
                if self
                    .lobby
                    .on_room_update(update, &mut self.reconciler, &mut self.outbox)
                {
                    self.matchmaker.settle();
                }
            }
            ServerMessage::State(state) => {
                self.reconciler.apply_snapshot(state, &mut self.outbox);
            }
            ServerMessage::Timer(update) => {
                self.reconciler.apply_timer(update, &mut self.outbox);
            }
            ServerMessage::GameEnd(info) => {
                if self.reconciler.on_game_end(info, &mut self.outbox) {
                    self.settle_stake(info.stake_delta);
                }
            }
            ServerMessage::Error(error) => {
                info!(code = ?error.code, message = %error.message, "Server error");
                self.outbox.emit(SessionEvent::ServerError {
                    code: error.code,
                    message: error.message.clone(),
                });
                let handled = self
                    .lobby
                    .on_server_error(error.code, &mut self.reconciler, &mut self.outbox)
                    || self
                        .matchmaker
                        .on_server_error(error.code, &mut self.reconciler, &mut self.outbox);
                if !handled {
                    self.reconciler.on_server_error(error, &mut self.outbox);
                }
            }
            ServerMessage::Pong {
                timestamp,
                server_time,
            } => {
                debug!(timestamp, server_time, "Pong");
            }
        }
    }

    /// Emit display clocks for whatever is running.
    pub fn tick(&mut self) {
        if let Some(clock) = self.reconciler.clock() {
            self.outbox.emit(SessionEvent::Clock(clock));
        }
        if self.spectator.clock().is_some() {
            if let Some(view) = self.spectator.view() {
                self.outbox.emit(SessionEvent::SpectatorUpdated(view));
            }
        }
    }

    /// Whether a game-scoped message belongs to the current game.
    fn owns(&self, msg: &ServerMessage) -> bool {
        let game = match msg {
            ServerMessage::State(state) => &state.game,
            ServerMessage::Timer(update) => &update.game,
            ServerMessage::GameEnd(end) => &end.game,
            _ => return true,
        };
        self.reconciler
            .identity()
            .map(|identity| identity.accepts(game))
            .unwrap_or(false)
    }

    fn settle_stake(&mut self, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Some(balance) = self.balance {
            let updated = balance.saturating_add_signed(delta);
            debug!(balance, delta, updated, "Applying stake delta");
            self.balance = Some(updated);
            self.outbox
                .emit(SessionEvent::BalanceChanged { balance: updated });
        }
    }

    // =========================================================================
    // OUTPUT
    // =========================================================================

    /// Take queued intents for the server.
    pub fn take_messages(&mut self) -> Vec<ClientMessage> {
        self.outbox.take_messages()
    }

    /// Next queued event.
    pub fn next_event(&mut self) -> Option<SessionEvent> {
        self.outbox.pop_event()
    }
}
