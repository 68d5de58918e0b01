//! Private Lobby Bridge
//!
//! Code-based 1:1 rooms. A matched room hands its persisted game id to the
//! reconciler's join path, the same one used to resume after a reload.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::clock::Clock;
use crate::network::protocol::{ClientMessage, ErrorCode, LobbyStatus, RoomUpdate};
use crate::session::events::{Outbox, SearchEndReason, SessionEvent};
use crate::session::matchmaking::check_stake;
use crate::session::reconciler::{GameReconciler, SessionError};

/// Length of a lobby code.
pub const CODE_LEN: usize = 6;

/// Characters used in codes. No `0/O` or `1/I/L`.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Generate a fresh shareable code.
pub fn generate_code() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(CODE_LEN)
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect()
}

/// Normalize a typed-in code: trims, uppercases, drops spaces and dashes.
pub fn normalize_code(raw: &str) -> Result<String, SessionError> {
    let code: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let valid = code.len() == CODE_LEN && code.bytes().all(|b| CODE_ALPHABET.contains(&b));
    if valid {
        Ok(code)
    } else {
        Err(SessionError::InvalidLobbyCode(raw.to_string()))
    }
}

/// Which end of the lobby we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyRole {
    /// Created the lobby.
    Host,
    /// Joined with a code.
    Guest,
}

/// Client view of a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyState {
    /// Request sent, no room update yet.
    Pending,
    /// Server confirmed; waiting for the second participant.
    Open,
}

/// The outstanding lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lobby {
    /// Shareable code.
    pub code: String,
    /// Our role.
    pub role: LobbyRole,
    /// Stake, once known.
    pub wager: Option<u64>,
    /// Current state.
    pub state: LobbyState,
}

/// Tracks the one outstanding lobby.
#[derive(Debug, Default)]
pub struct LobbyBridge {
    current: Option<Lobby>,
}

impl LobbyBridge {
    /// No lobby outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// The outstanding lobby.
    pub fn current(&self) -> Option<&Lobby> {
        self.current.as_ref()
    }

    /// Create a lobby and return its code.
    pub fn create_lobby<C: Clock>(
        &mut self,
        wager: u64,
        balance: Option<u64>,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) -> Result<String, SessionError> {
        check_stake(wager, balance)?;
        if self.current.is_some() {
            return Err(SessionError::AlreadySearching);
        }
        reconciler.begin_search()?;

        let code = generate_code();
        info!(%code, wager, "Creating lobby");
        self.current = Some(Lobby {
            code: code.clone(),
            role: LobbyRole::Host,
            wager: Some(wager),
            state: LobbyState::Pending,
        });
        out.send(ClientMessage::CreateLobby {
            code: code.clone(),
            wager,
        });
        out.emit(SessionEvent::LobbyCreated {
            code: code.clone(),
            wager,
        });
        Ok(code)
    }

    /// Join someone else's lobby. Returns the normalized code.
    pub fn join_lobby<C: Clock>(
        &mut self,
        raw_code: &str,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) -> Result<String, SessionError> {
        let code = normalize_code(raw_code)?;
        if self.current.is_some() {
            return Err(SessionError::AlreadySearching);
        }
        reconciler.begin_search()?;

        info!(%code, "Joining lobby");
        self.current = Some(Lobby {
            code: code.clone(),
            role: LobbyRole::Guest,
            wager: None,
            state: LobbyState::Pending,
        });
        out.send(ClientMessage::JoinLobby { code: code.clone() });
        Ok(code)
    }

    /// Abandon the outstanding lobby.
    pub fn leave_lobby<C: Clock>(
        &mut self,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) -> Result<(), SessionError> {
        if !self.abandon(out) {
            return Err(SessionError::NoLobby);
        }
        reconciler.end_search();
        out.emit(SessionEvent::SearchEnded {
            reason: SearchEndReason::Cancelled,
        });
        Ok(())
    }

    /// Tell the server we left, without touching the session phase.
    ///
    /// Used when a game arrived through another path.
    pub fn abandon(&mut self, out: &mut Outbox) -> bool {
        match self.current.take() {
            Some(lobby) => {
                debug!(code = %lobby.code, "Leaving lobby");
                out.send(ClientMessage::LeaveLobby { code: lobby.code });
                true
            }
            None => false,
        }
    }

    /// Handle a room update. Returns whether a game was joined.
    pub fn on_room_update<C: Clock>(
        &mut self,
        update: &RoomUpdate,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) -> bool {
        let Some(lobby) = self.current.as_mut() else {
            debug!(code = %update.code, "Room update with no lobby outstanding");
            return false;
        };
        if lobby.code != update.code {
            debug!(code = %update.code, ours = %lobby.code, "Room update for another lobby");
            return false;
        }

        match update.status {
            LobbyStatus::Open => {
                lobby.state = LobbyState::Open;
                if update.wager.is_some() {
                    lobby.wager = update.wager;
                }
                out.emit(SessionEvent::LobbyOpen {
                    code: lobby.code.clone(),
                    wager: lobby.wager,
                });
                false
            }
            LobbyStatus::Matched => {
                let Some(game_id) = update.game_id.clone() else {
                    warn!(code = %update.code, "Lobby matched without a game id");
                    return false;
                };
                info!(code = %update.code, %game_id, "Lobby matched");
                self.current = None;
                reconciler.join_persisted(game_id, None, out);
                true
            }
            LobbyStatus::Expired => {
                info!(code = %update.code, "Lobby expired");
                self.current = None;
                reconciler.end_search();
                out.emit(SessionEvent::SearchEnded {
                    reason: SearchEndReason::Expired,
                });
                false
            }
        }
    }

    /// Handle a server error while a lobby is pending.
    ///
    /// Returns whether it closed the lobby.
    pub fn on_server_error<C: Clock>(
        &mut self,
        code: ErrorCode,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) -> bool {
        let refused = matches!(
            code,
            ErrorCode::LobbyNotFound | ErrorCode::LobbyFull | ErrorCode::InsufficientBalance
        );
        let pending = matches!(&self.current, Some(lobby) if lobby.state == LobbyState::Pending);
        if !refused || !pending {
            return false;
        }
        warn!(?code, "Server refused the lobby");
        self.current = None;
        reconciler.end_search();
        out.emit(SessionEvent::SearchEnded {
            reason: SearchEndReason::Failed,
        });
        true
    }
}
