//! Game Client
//!
//! Owns the connection and the session hub, and runs the cooperative loop
//! between them: connection events go into the hub, hub intents go out over
//! the connection, and a fixed-interval ticker drives the display clock.
//!
//! ```text
//!  user commands ──► SessionHub ──(Outbox)──► ConnectionManager ──► server
//!                        ▲                          │
//!        ticker ─────────┤                          │
//!                        └──── ConnectionEvent ◄────┘
//! ```

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::account::{AccountApi, AccountError, BalanceCache};
use crate::config::ClientConfig;
use crate::core::clock::Clock;
use crate::core::identity::{GameKey, PersistedId};
use crate::network::auth::TokenSource;
use crate::network::connection::{
    ConnectionError, ConnectionEvent, ConnectionManager, ConnectionState,
};
use crate::network::protocol::{ClientMessage, Promotion};
use crate::network::transport::Connector;
use crate::session::events::{ResyncTrigger, SessionEvent};
use crate::session::hub::SessionHub;
use crate::session::reconciler::SessionError;
use crate::session::spectator::{SpectatorPhase, SpectatorSummary, SpectatorView};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request rejected locally.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Connection problem.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Account API problem.
    #[error(transparent)]
    Account(#[from] AccountError),
}

/// A game client bound to one match server.
pub struct GameClient<K: Connector + Clone, C: Clock> {
    connection: ConnectionManager<K>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    hub: SessionHub<C>,
    clock: C,
    tick_interval: std::time::Duration,
    ticker: Option<Interval>,
}

impl<K: Connector + Clone, C: Clock> GameClient<K, C> {
    /// Create a client. Nothing connects until [`connect`](Self::connect).
    pub fn new(connector: K, clock: C, config: &ClientConfig) -> Self {
        let connection = ConnectionManager::new(connector, config.connection.clone());
        let events = connection.subscribe_all();
        Self {
            connection,
            events,
            hub: SessionHub::new(clock.clone(), config.base_time_ms),
            clock,
            tick_interval: config.tick_interval,
            ticker: None,
        }
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// Connect and authenticate with tokens from `tokens`.
    pub async fn connect<T: TokenSource>(&mut self, tokens: T) {
        info!("Connecting");
        self.connection.connect(tokens).await;
    }

    /// Close the connection.
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Send a latency probe.
    pub fn ping(&self) -> Result<(), ClientError> {
        self.connection.send(ClientMessage::Ping {
            timestamp: self.clock.now_ms(),
        })?;
        Ok(())
    }

    // =========================================================================
    // ACCOUNT
    // =========================================================================

    /// Read the balance from the account API and cache it.
    pub async fn refresh_balance<A: AccountApi>(
        &mut self,
        api: &A,
        cache: Option<&BalanceCache>,
    ) -> Result<u64, ClientError> {
        let balance = api.balance().await?;
        self.hub.set_balance(balance);
        if let Some(cache) = cache {
            cache.store(balance);
        }
        Ok(balance)
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Join the matchmaking queue.
    pub fn find_match(&mut self, wager: u64, display_name: &str) -> Result<(), ClientError> {
        self.ensure_connection()?;
        self.hub.find_match(wager, display_name)?;
        self.flush();
        Ok(())
    }

    /// Leave the matchmaking queue. No-op unless searching.
    pub fn cancel_search(&mut self) -> bool {
        let sent = self.hub.cancel_search();
        self.flush();
        sent
    }

    /// Create a private lobby and return its shareable code.
    pub fn create_lobby(&mut self, wager: u64) -> Result<String, ClientError> {
        self.ensure_connection()?;
        let code = self.hub.create_lobby(wager)?;
        self.flush();
        Ok(code)
    }

    /// Join a private lobby.
    pub fn join_lobby(&mut self, code: &str) -> Result<String, ClientError> {
        self.ensure_connection()?;
        let code = self.hub.join_lobby(code)?;
        self.flush();
        Ok(code)
    }

    /// Abandon the outstanding lobby.
    pub fn leave_lobby(&mut self) -> Result<(), ClientError> {
        self.hub.leave_lobby()?;
        self.flush();
        Ok(())
    }

    /// Send a move intent for the current game.
    pub fn submit_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<Promotion>,
    ) -> Result<(), ClientError> {
        self.ensure_connection()?;
        self.hub.submit_move(from, to, promotion)?;
        self.flush();
        Ok(())
    }

    /// Resign the current game. No-op after the first call.
    pub fn resign(&mut self) -> bool {
        let sent = self.hub.resign();
        self.flush();
        sent
    }

    /// Resume a game by persisted id after a reload.
    pub fn resume(&mut self, game_id: PersistedId) -> Result<(), ClientError> {
        self.ensure_connection()?;
        self.hub.resume(game_id)?;
        self.flush();
        Ok(())
    }

    /// The host view became visible again.
    pub fn visibility_regained(&mut self) -> bool {
        self.resync(ResyncTrigger::VisibilityRegained)
    }

    /// The host window regained focus.
    pub fn focus_regained(&mut self) -> bool {
        self.resync(ResyncTrigger::FocusRegained)
    }

    /// Dismiss the result of the ended game.
    pub fn acknowledge_result(&mut self) -> bool {
        self.hub.acknowledge_result()
    }

    /// Read-only spectator controls.
    pub fn spectator(&mut self) -> Spectator<'_, K, C> {
        Spectator { client: self }
    }

    /// Session state.
    pub fn session(&self) -> &SessionHub<C> {
        &self.hub
    }

    // =========================================================================
    // EVENT LOOP
    // =========================================================================

    /// Wait for the next session event.
    ///
    /// Connection events are applied and clocks ticked while waiting.
    /// `None` once the connection manager is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            self.flush();
            if let Some(event) = self.hub.next_event() {
                return Some(event);
            }

            let period = self.tick_interval;
            let ticker = self.ticker.get_or_insert_with(|| {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker
            });

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.hub.handle_connection(event),
                    None => return None,
                },
                _ = ticker.tick() => self.hub.tick(),
            }
        }
    }

    fn resync(&mut self, trigger: ResyncTrigger) -> bool {
        let sent = self.hub.request_resync(trigger);
        self.flush();
        sent
    }

    fn ensure_connection(&self) -> Result<(), ConnectionError> {
        if self.connection.state() == ConnectionState::Disconnected {
            return Err(ConnectionError::NotConnected);
        }
        Ok(())
    }

    fn flush(&mut self) {
        for msg in self.hub.take_messages() {
            if let Err(e) = self.connection.send(msg) {
                warn!("Dropping outbound intent: {}", e);
            }
        }
    }
}

/// Spectator controls borrowed from a [`GameClient`].
///
/// Attach, detach and read. There is nothing here that could move or resign:
///
/// ```
/// use duel_client::client::Spectator;
/// use duel_client::core::Clock;
/// use duel_client::network::Connector;
///
/// fn leave<K: Connector + Clone, C: Clock>(spectator: &mut Spectator<'_, K, C>) {
///     spectator.detach();
/// }
/// ```
///
/// ```compile_fail
/// use duel_client::client::Spectator;
/// use duel_client::core::Clock;
/// use duel_client::network::Connector;
///
/// fn try_to_move<K: Connector + Clone, C: Clock>(spectator: &mut Spectator<'_, K, C>) {
///     spectator.submit_move("e2", "e4", None);
/// }
/// ```
pub struct Spectator<'a, K: Connector + Clone, C: Clock> {
    client: &'a mut GameClient<K, C>,
}

impl<K: Connector + Clone, C: Clock> Spectator<'_, K, C> {
    /// Start watching `target`, leaving any previous target.
    pub fn attach(&mut self, target: GameKey) -> Result<(), ClientError> {
        self.client.ensure_connection()?;
        self.client.hub.spectate(target);
        self.client.flush();
        Ok(())
    }

    /// Stop watching. Returns false if nothing was watched.
    pub fn detach(&mut self) -> bool {
        let sent = self.client.hub.stop_spectating();
        self.client.flush();
        sent
    }

    /// Attachment phase.
    pub fn phase(&self) -> SpectatorPhase {
        self.client.hub.spectator().phase()
    }

    /// Current view of the watched game.
    pub fn view(&self) -> Option<SpectatorView> {
        self.client.hub.spectator().view()
    }

    /// Summary once the watched game ended.
    pub fn summary(&self) -> Option<&SpectatorSummary> {
        self.client.hub.spectator().summary()
    }
}
