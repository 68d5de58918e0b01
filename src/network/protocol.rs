//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text frame, internally tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::core::identity::{PersistedId, SessionId, Side};

// =============================================================================
// SHARED
// =============================================================================

/// Reference to a game as carried on the wire.
///
/// Either id may be absent; see [`GameIdentity::accepts`](crate::core::identity::GameIdentity::accepts).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRef {
    /// Ephemeral session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Durable game id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<PersistedId>,
}

/// Piece a pawn can promote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Promotion {
    /// Queen.
    Queen,
    /// Rook.
    Rook,
    /// Bishop.
    Bishop,
    /// Knight.
    Knight,
}

/// Display names of both seats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Players {
    /// Name in the first seat.
    pub first: String,
    /// Name in the second seat.
    pub second: String,
}

impl Players {
    /// Name of whoever sits in `side`.
    pub fn name_of(&self, side: Side) -> &str {
        match side {
            Side::First => &self.first,
            Side::Second => &self.second,
        }
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection. Always the first frame.
    Auth(AuthRequest),

    /// Join the wager matchmaking queue.
    FindMatch(FindMatchRequest),

    /// Leave the matchmaking queue.
    CancelSearch,

    /// Open a private lobby under a client-chosen code.
    CreateLobby {
        /// Shareable code.
        code: String,
        /// Stake per player.
        wager: u64,
    },

    /// Join someone else's private lobby.
    JoinLobby {
        /// Code received from the host.
        code: String,
    },

    /// Abandon a lobby that has not been matched yet.
    LeaveLobby {
        /// Code of the lobby.
        code: String,
    },

    /// Bind this connection to a game by persisted id and receive its state.
    JoinGame {
        /// Durable game id.
        game_id: PersistedId,
    },

    /// Move intent. The server decides whether it is legal.
    SubmitMove(MoveIntent),

    /// Resign the referenced game.
    Resign {
        /// Game being resigned.
        game: GameRef,
    },

    /// Ask for the full authoritative state of the referenced game.
    SyncRequest {
        /// Game to resync.
        game: GameRef,
    },

    /// Subscribe to someone else's game as a spectator.
    Spectate {
        /// Game to watch.
        game: GameRef,
    },

    /// Drop a spectator subscription.
    StopSpectating {
        /// Game no longer watched.
        game: GameRef,
    },

    /// Latency probe.
    Ping {
        /// Client time in Unix milliseconds.
        timestamp: i64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Bearer token (JWT) issued by the hosted backend.
    pub token: String,
    /// Client version for compatibility check.
    pub client_version: String,
}

/// Matchmaking request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindMatchRequest {
    /// Stake per player.
    pub wager: u64,
    /// Name shown to the opponent.
    pub display_name: String,
}

/// A move intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveIntent {
    /// Game the move belongs to.
    pub game: GameRef,
    /// Origin square, opaque to the client.
    pub from: String,
    /// Destination square, opaque to the client.
    pub to: String,
    /// Promotion piece, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<Promotion>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Matchmaking queue status.
    Matchmaking(MatchmakingResponse),

    /// An opponent was found for the outstanding request.
    MatchFound(MatchFoundInfo),

    /// Private lobby status change.
    RoomUpdate(RoomUpdate),

    /// Full authoritative game state.
    State(StateSnapshot),

    /// Authoritative clock state.
    Timer(TimerUpdate),

    /// Game finished.
    GameEnd(GameEndInfo),

    /// Error message.
    Error(ServerError),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: i64,
        /// Server time in Unix milliseconds.
        server_time: i64,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Authenticated user id if successful.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Error message if failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// Matchmaking status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchmakingResponse {
    /// Current status.
    pub status: MatchmakingStatus,
    /// Estimated wait time in seconds.
    #[serde(default)]
    pub estimated_wait: Option<u32>,
}

/// Matchmaking status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchmakingStatus {
    /// In the queue.
    Searching,
    /// Removed from the queue on request.
    Cancelled,
    /// Removed from the queue by the server.
    Failed,
}

/// Information about a found match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFoundInfo {
    /// Ids of the new game.
    pub game: GameRef,
    /// Seat assigned to the receiving player.
    pub color: Side,
    /// Opponent's display name.
    pub opponent_name: String,
    /// Stake per player.
    pub wager: u64,
    /// Opaque initial position.
    pub board: String,
    /// Side to move.
    pub turn: Side,
    /// Starting time per side in milliseconds.
    #[serde(default)]
    pub base_time_ms: Option<u64>,
}

/// Lobby status as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    /// Waiting for a second participant.
    Open,
    /// Both participants present; a game exists.
    Matched,
    /// Timed out or closed before a match.
    Expired,
}

/// Private lobby update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomUpdate {
    /// Lobby code.
    pub code: String,
    /// New status.
    pub status: LobbyStatus,
    /// Persisted id of the game, once matched.
    #[serde(default)]
    pub game_id: Option<PersistedId>,
    /// Stake per player.
    #[serde(default)]
    pub wager: Option<u64>,
}

/// Full authoritative game state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Game this state belongs to.
    pub game: GameRef,
    /// Opaque serialized position.
    pub board: String,
    /// Side to move.
    pub turn: Side,
    /// Receiver's seat; absent for spectators.
    #[serde(default)]
    pub color: Option<Side>,
    /// Names of both seats.
    pub players: Players,
    /// Stake per player.
    pub wager: u64,
    /// Clock state at the time of the snapshot.
    #[serde(default)]
    pub timer: Option<TimerState>,
}

/// Clock state without an owning game reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    /// First seat's remaining time at `server_now_ms`.
    pub first_remaining_ms: u64,
    /// Second seat's remaining time at `server_now_ms`.
    pub second_remaining_ms: u64,
    /// Server time at which the remaining times were measured.
    pub server_now_ms: i64,
    /// Seat whose clock is running, if any.
    #[serde(default)]
    pub running: Option<Side>,
}

/// Authoritative clock update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerUpdate {
    /// Game the clock belongs to.
    pub game: GameRef,
    /// Clock state.
    #[serde(flatten)]
    pub state: TimerState,
}

/// Game finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEndInfo {
    /// Game that ended.
    pub game: GameRef,
    /// Winning seat; `None` for a draw.
    pub winner: Option<Side>,
    /// Human-readable reason ("checkmate", "timeout", ...).
    pub reason: String,
    /// Balance change for the receiving player.
    #[serde(default)]
    pub stake_delta: i64,
    /// Whether the game ended because the opponent left.
    #[serde(default)]
    pub opponent_disconnected: bool,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// Move rejected by the rules engine.
    InvalidMove,
    /// Move sent out of turn.
    NotYourTurn,
    /// Stake exceeds balance.
    InsufficientBalance,
    /// Already queued.
    AlreadySearching,
    /// No lobby under that code.
    LobbyNotFound,
    /// Lobby already has two participants.
    LobbyFull,
    /// No game under that id.
    GameNotFound,
    /// Rate limited.
    RateLimited,
    /// Internal error.
    InternalError,
    /// Any code this client does not know.
    #[serde(other)]
    Unknown,
}

/// Coarse message kind, used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `auth_result`
    AuthResult,
    /// `matchmaking`
    Matchmaking,
    /// `match_found`
    MatchFound,
    /// `room_update`
    RoomUpdate,
    /// `state`
    State,
    /// `timer`
    Timer,
    /// `game_end`
    GameEnd,
    /// `error`
    Error,
    /// `pong`
    Pong,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::AuthResult(_) => MessageKind::AuthResult,
            ServerMessage::Matchmaking(_) => MessageKind::Matchmaking,
            ServerMessage::MatchFound(_) => MessageKind::MatchFound,
            ServerMessage::RoomUpdate(_) => MessageKind::RoomUpdate,
            ServerMessage::State(_) => MessageKind::State,
            ServerMessage::Timer(_) => MessageKind::Timer,
            ServerMessage::GameEnd(_) => MessageKind::GameEnd,
            ServerMessage::Error(_) => MessageKind::Error,
            ServerMessage::Pong { .. } => MessageKind::Pong,
        }
    }
}
