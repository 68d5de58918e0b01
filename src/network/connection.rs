//! Connection Manager
//!
//! Owns the single duplex channel to the match server. Connects, authenticates,
//! reconnects with capped exponential backoff, and fans inbound messages out to
//! subscribers filtered by message kind.
//!
//! All I/O runs in one background task; at most one physical connection exists
//! at a time and reconnect attempts are strictly sequential.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::network::auth::{self, AuthError, TokenSource};
use crate::network::protocol::{AuthRequest, ClientMessage, MessageKind, ServerMessage};
use crate::network::transport::{Connector, Transport};

/// How long `disconnect` waits for the task before aborting it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// First connection being established.
    Connecting,
    /// Authenticated and exchanging messages.
    Connected,
    /// Connection was lost; retrying.
    Reconnecting,
}

/// Backoff schedule for connection retries.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between retries.
    pub multiplier: u32,
    /// Retries allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Client version sent with `auth`.
    pub client_version: String,
    /// How long to wait for `auth_result`.
    pub auth_timeout: Duration,
    /// Refresh the token if it expires within this window.
    pub token_refresh_margin: Duration,
    /// Outbound messages kept while disconnected; oldest dropped beyond this.
    pub max_pending: usize,
    /// Retry schedule.
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            auth_timeout: Duration::from_secs(10),
            token_refresh_margin: Duration::from_secs(60),
            max_pending: 64,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Connection errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport could not be opened.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Peer closed the channel.
    #[error("Connection closed")]
    Closed,

    /// Server rejected the token.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// No `auth_result` in time.
    #[error("Authentication timed out")]
    AuthTimeout,

    /// No usable token.
    #[error("Token error: {0}")]
    Token(#[from] AuthError),

    /// Message could not be encoded.
    #[error("Invalid message: {0}")]
    Protocol(#[from] serde_json::Error),

    /// No connection task is running.
    #[error("Not connected")]
    NotConnected,
}

/// Events delivered to subscribers, in the order they happened.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Lifecycle transition. `attempt` is the retry number, 0 when connected.
    StateChanged {
        /// New state.
        state: ConnectionState,
        /// Retry number.
        attempt: u32,
    },
    /// A server message matching the subscriber's filter.
    Message(ServerMessage),
    /// Emitted once per `reconnecting -> connected` transition.
    ResyncRequested,
    /// Retries exhausted; the connection stays down until `connect` is called again.
    GaveUp {
        /// Retries made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },
}

// =============================================================================
// SUBSCRIBERS
// =============================================================================

enum KindFilter {
    All,
    Only(Vec<MessageKind>),
}

impl KindFilter {
    fn admits(&self, kind: MessageKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Only(kinds) => kinds.contains(&kind),
        }
    }
}

struct Subscriber {
    filter: KindFilter,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

/// State shared between the manager handle and the connection task.
struct Shared {
    state: watch::Sender<ConnectionState>,
    attempt: AtomicU32,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            attempt: AtomicU32::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self, filter: KindFilter) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { filter, tx });
        rx
    }

    fn publish(&self, event: ConnectionEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sub| {
            if let ConnectionEvent::Message(msg) = &event {
                if !sub.filter.admits(msg.kind()) {
                    return true;
                }
            }
            // Receiver dropped: forget the subscriber.
            sub.tx.send(event.clone()).is_ok()
        });
    }

    fn dispatch(&self, msg: ServerMessage) {
        self.publish(ConnectionEvent::Message(msg));
    }

    fn set_state(&self, state: ConnectionState, attempt: u32) {
        let previous_attempt = self.attempt.swap(attempt, Ordering::SeqCst);
        let previous = self.state.send_replace(state);
        if previous != state || previous_attempt != attempt {
            debug!(?state, attempt, "Connection state changed");
            self.publish(ConnectionEvent::StateChanged { state, attempt });
        }
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

// =============================================================================
// MANAGER
// =============================================================================

enum Command {
    Send(ClientMessage),
    Shutdown,
}

/// Handle to the single match-server connection.
pub struct ConnectionManager<K: Connector + Clone> {
    connector: K,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl<K: Connector + Clone> ConnectionManager<K> {
    /// Create a manager. Nothing connects until [`connect`](Self::connect).
    pub fn new(connector: K, config: ConnectionConfig) -> Self {
        Self {
            connector,
            config,
            shared: Arc::new(Shared::new()),
            cmd_tx: None,
            task: None,
        }
    }

    /// Connect using tokens from `tokens`.
    ///
    /// Any running connection is shut down first.
    pub async fn connect<T: TokenSource>(&mut self, tokens: T) {
        self.disconnect().await;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.shared.set_state(ConnectionState::Connecting, 0);
        let task = tokio::spawn(connection_loop(
            self.connector.clone(),
            tokens,
            self.config.clone(),
            cmd_rx,
            self.shared.clone(),
        ));

        self.cmd_tx = Some(cmd_tx);
        self.task = Some(task);
    }

    /// Close the connection and stop retrying.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                warn!("Connection task did not stop in time; aborting");
                task.abort();
            }
        }
        self.shared.set_state(ConnectionState::Disconnected, 0);
    }

    /// Queue a message for the server.
    ///
    /// While connecting or reconnecting the message is held and sent after
    /// the next successful authentication.
    pub fn send(&self, msg: ClientMessage) -> Result<(), ConnectionError> {
        let tx = self.cmd_tx.as_ref().ok_or(ConnectionError::NotConnected)?;
        tx.send(Command::Send(msg))
            .map_err(|_| ConnectionError::NotConnected)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.current()
    }

    /// Watch lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Current retry number (0 while connected).
    pub fn attempts(&self) -> u32 {
        self.shared.attempt.load(Ordering::SeqCst)
    }

    /// Receive lifecycle events and every server message.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.shared.subscribe(KindFilter::All)
    }

    /// Receive lifecycle events and server messages of the given kinds.
    pub fn subscribe(&self, kinds: &[MessageKind]) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.shared.subscribe(KindFilter::Only(kinds.to_vec()))
    }
}

impl<K: Connector + Clone> Drop for ConnectionManager<K> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

/// How one physical connection ended.
enum Outcome {
    /// Client asked to stop.
    Shutdown,
    /// Was connected, then lost the channel.
    Lost,
    /// Never got to `connected`.
    Failed(ConnectionError),
}

#[instrument(skip_all)]
async fn connection_loop<K: Connector, T: TokenSource>(
    mut connector: K,
    mut tokens: T,
    config: ConnectionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
) {
    let mut pending: VecDeque<ClientMessage> = VecDeque::new();
    let mut retries: u32 = 0;
    let mut reconnecting = false;
    let mut force_refresh = false;
    let mut last_error = String::from("connection lost");

    loop {
        let outcome = run_connection(
            &mut connector,
            &mut tokens,
            force_refresh,
            &config,
            &mut cmd_rx,
            &mut pending,
            &shared,
            reconnecting,
        )
        .await;
        force_refresh = false;

        match outcome {
            Outcome::Shutdown => {
                info!("Connection closed by client");
                shared.set_state(ConnectionState::Disconnected, 0);
                return;
            }
            Outcome::Lost => {
                warn!("Connection lost");
                reconnecting = true;
                retries = 0;
                last_error = String::from("connection lost");
            }
            Outcome::Failed(err) => {
                warn!(retries, "Connection attempt failed: {}", err);
                if matches!(
                    err,
                    ConnectionError::AuthRejected(_) | ConnectionError::AuthTimeout | ConnectionError::Token(_)
                ) {
                    force_refresh = true;
                }
                last_error = err.to_string();
            }
        }

        if retries >= config.reconnect.max_attempts {
            error!(retries, "Giving up on connection: {}", last_error);
            shared.set_state(ConnectionState::Disconnected, retries);
            shared.publish(ConnectionEvent::GaveUp {
                attempts: retries,
                reason: last_error,
            });
            return;
        }

        retries += 1;
        let state = if reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };
        shared.set_state(state, retries);

        let delay = config.reconnect.delay_for(retries);
        debug!(retries, ?delay, "Backing off");
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(msg)) => hold(&mut pending, msg, config.max_pending),
                    Some(Command::Shutdown) | None => {
                        info!("Connection closed by client during backoff");
                        shared.set_state(ConnectionState::Disconnected, 0);
                        return;
                    }
                },
            }
        }
    }
}

/// Open, authenticate and serve one physical connection.
#[allow(clippy::too_many_arguments)]
async fn run_connection<K: Connector, T: TokenSource>(
    connector: &mut K,
    tokens: &mut T,
    force_refresh: bool,
    config: &ConnectionConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    pending: &mut VecDeque<ClientMessage>,
    shared: &Shared,
    reconnecting: bool,
) -> Outcome {
    let token = match fetch_token(tokens, force_refresh, config.token_refresh_margin).await {
        Ok(token) => token,
        Err(e) => return Outcome::Failed(e.into()),
    };

    let mut transport = match connector.connect().await {
        Ok(transport) => transport,
        Err(e) => return Outcome::Failed(e),
    };

    if let Err(e) = authenticate(&mut transport, token, config, shared).await {
        transport.close().await;
        return Outcome::Failed(e);
    }

    info!("Connected to match server");
    shared.set_state(ConnectionState::Connected, 0);
    if reconnecting {
        shared.publish(ConnectionEvent::ResyncRequested);
    }

    // Replay intents queued while we were down.
    while let Some(msg) = pending.pop_front() {
        if let Err(e) = send_message(&mut transport, &msg).await {
            warn!("Failed to replay pending message: {}", e);
            pending.push_front(msg);
            return Outcome::Lost;
        }
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(msg)) => {
                    match send_message(&mut transport, &msg).await {
                        Ok(()) => {}
                        Err(ConnectionError::Protocol(e)) => {
                            error!("Failed to serialize message: {}", e);
                        }
                        Err(e) => {
                            warn!("Failed to send message: {}", e);
                            hold(pending, msg, config.max_pending);
                            return Outcome::Lost;
                        }
                    }
                }
                Some(Command::Shutdown) | None => {
                    transport.close().await;
                    return Outcome::Shutdown;
                }
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => match ServerMessage::from_json(&text) {
                    Ok(msg) => shared.dispatch(msg),
                    Err(e) => warn!("Failed to parse server message: {} - {}", e, text),
                },
                Some(Err(e)) => {
                    error!("Read error: {}", e);
                    return Outcome::Lost;
                }
                None => {
                    info!("Server closed connection");
                    return Outcome::Lost;
                }
            },
        }
    }
}

/// Get a token, refreshing it if it is about to expire.
async fn fetch_token<T: TokenSource>(
    tokens: &mut T,
    force_refresh: bool,
    margin: Duration,
) -> Result<String, AuthError> {
    let token = tokens.token(force_refresh).await?;
    let now_secs = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
    if !force_refresh && auth::expires_within(&token, now_secs, margin) {
        debug!("Token expires soon, refreshing before connect");
        return tokens.token(true).await;
    }
    Ok(token)
}

/// Send `auth` and wait for `auth_result`.
///
/// Other messages arriving first are dispatched normally.
async fn authenticate<Tr: Transport>(
    transport: &mut Tr,
    token: String,
    config: &ConnectionConfig,
    shared: &Shared,
) -> Result<(), ConnectionError> {
    let auth = ClientMessage::Auth(AuthRequest {
        token,
        client_version: config.client_version.clone(),
    });
    send_message(transport, &auth).await?;

    let wait = async {
        loop {
            match transport.recv().await {
                Some(Ok(text)) => match ServerMessage::from_json(&text) {
                    Ok(ServerMessage::AuthResult(result)) => return Ok(result),
                    Ok(other) => shared.dispatch(other),
                    Err(e) => warn!("Failed to parse server message: {} - {}", e, text),
                },
                Some(Err(e)) => return Err(e),
                None => return Err(ConnectionError::Closed),
            }
        }
    };

    let result = tokio::time::timeout(config.auth_timeout, wait)
        .await
        .map_err(|_| ConnectionError::AuthTimeout)??;

    if result.success {
        debug!(user_id = ?result.user_id, "Authenticated");
        Ok(())
    } else {
        Err(ConnectionError::AuthRejected(
            result.error.unwrap_or_else(|| "unknown reason".to_string()),
        ))
    }
}

async fn send_message<Tr: Transport>(
    transport: &mut Tr,
    msg: &ClientMessage,
) -> Result<(), ConnectionError> {
    let text = msg.to_json()?;
    transport.send(text).await
}

/// Queue `msg` for replay, dropping the oldest beyond `max`.
fn hold(pending: &mut VecDeque<ClientMessage>, msg: ClientMessage, max: usize) {
    if max == 0 {
        warn!("Dropping outbound message while disconnected");
        return;
    }
    while pending.len() >= max {
        if let Some(dropped) = pending.pop_front() {
            warn!(?dropped, "Pending queue full, dropping oldest message");
        }
    }
    pending.push_back(msg);
}
