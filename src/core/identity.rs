//! Game Identity
//!
//! A match can be referred to by two ids: the ephemeral session id the match
//! server hands out for one match, and a durable persisted id that survives a
//! full reload (private rooms always have one). Messages may carry either or
//! both. Everything that asks "is this message about the current game?" goes
//! through [`GameIdentity::accepts`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::network::protocol::GameRef;

// =============================================================================
// SIDES
// =============================================================================

/// One of the two seats in a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Moves first.
    First,
    /// Moves second.
    Second,
}

impl Side {
    /// The other seat.
    pub fn opposite(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }
}

// =============================================================================
// IDS
// =============================================================================

/// Prefix the match server puts on matchmade session ids.
pub const MATCHMADE_PREFIX: &str = "mm_";

/// Prefix the match server puts on room-originated session ids.
pub const ROOM_PREFIX: &str = "room_";

/// Where a session came from, read off its id prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Created by the public matchmaking queue.
    Matchmade,
    /// Created from a private lobby.
    Room,
    /// No recognised prefix.
    Unknown,
}

/// Ephemeral, server-assigned id for the lifetime of one match.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Wrap a raw id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Origin encoded in the id prefix.
    pub fn origin(&self) -> SessionOrigin {
        if self.0.starts_with(MATCHMADE_PREFIX) {
            SessionOrigin::Matchmade
        } else if self.0.starts_with(ROOM_PREFIX) {
            SessionOrigin::Room
        } else {
            SessionOrigin::Unknown
        }
    }

    /// Raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable id that can resume a game after a full reload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedId(pub String);

impl PersistedId {
    /// Wrap a raw id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersistedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single reference to a game, in either namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GameKey {
    /// Reference by session id.
    Ephemeral(SessionId),
    /// Reference by persisted id.
    Persisted(PersistedId),
}

impl GameKey {
    /// Wire form of this key.
    pub fn to_ref(&self) -> GameRef {
        match self {
            GameKey::Ephemeral(id) => GameRef {
                session_id: Some(id.clone()),
                game_id: None,
            },
            GameKey::Persisted(id) => GameRef {
                session_id: None,
                game_id: Some(id.clone()),
            },
        }
    }
}

impl fmt::Display for GameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKey::Ephemeral(id) => write!(f, "session:{}", id),
            GameKey::Persisted(id) => write!(f, "game:{}", id),
        }
    }
}

impl GameRef {
    /// Every key this reference carries.
    pub fn keys(&self) -> impl Iterator<Item = GameKey> + '_ {
        self.session_id
            .iter()
            .cloned()
            .map(GameKey::Ephemeral)
            .chain(self.game_id.iter().cloned().map(GameKey::Persisted))
    }

    /// Whether this reference names `key`.
    pub fn names(&self, key: &GameKey) -> bool {
        self.keys().any(|k| &k == key)
    }
}

// =============================================================================
// GAME IDENTITY
// =============================================================================

/// The id set of the one game that is "current".
///
/// At least one of the two ids is always present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameIdentity {
    session_id: Option<SessionId>,
    persisted_id: Option<PersistedId>,
}

impl GameIdentity {
    /// Identity known by its session id, optionally with a persisted id.
    pub fn new(session_id: SessionId, persisted_id: Option<PersistedId>) -> Self {
        Self {
            session_id: Some(session_id),
            persisted_id,
        }
    }

    /// Identity known only by its persisted id (room hand-off or resume).
    pub fn persisted(persisted_id: PersistedId) -> Self {
        Self {
            session_id: None,
            persisted_id: Some(persisted_id),
        }
    }

    /// Identity known by a single key.
    pub fn from_key(key: GameKey) -> Self {
        match key {
            GameKey::Ephemeral(id) => Self::new(id, None),
            GameKey::Persisted(id) => Self::persisted(id),
        }
    }

    /// Build from a wire reference. `None` if it carries no id at all.
    pub fn from_ref(game: &GameRef) -> Option<Self> {
        if game.session_id.is_none() && game.game_id.is_none() {
            return None;
        }
        Some(Self {
            session_id: game.session_id.clone(),
            persisted_id: game.game_id.clone(),
        })
    }

    /// Ephemeral id, if known.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Durable id, if known.
    pub fn persisted_id(&self) -> Option<&PersistedId> {
        self.persisted_id.as_ref()
    }

    /// Session origin, when the session id is known.
    pub fn origin(&self) -> SessionOrigin {
        self.session_id
            .as_ref()
            .map(SessionId::origin)
            .unwrap_or(SessionOrigin::Unknown)
    }

    /// Whether this identity owns `key`.
    pub fn owns(&self, key: &GameKey) -> bool {
        match key {
            GameKey::Ephemeral(id) => self.session_id.as_ref() == Some(id),
            GameKey::Persisted(id) => self.persisted_id.as_ref() == Some(id),
        }
    }

    /// Whether a message referring to `game` belongs to this identity.
    ///
    /// A match on either namespace is enough.
    pub fn accepts(&self, game: &GameRef) -> bool {
        game.keys().any(|key| self.owns(&key))
    }

    /// Fill in ids this identity is missing from an accepted reference.
    ///
    /// Returns true if anything was learned. Ids already known are never replaced.
    pub fn absorb(&mut self, game: &GameRef) -> bool {
        if !self.accepts(game) {
            return false;
        }
        let mut learned = false;
        if self.session_id.is_none() {
            if let Some(id) = &game.session_id {
                self.session_id = Some(id.clone());
                learned = true;
            }
        }
        if self.persisted_id.is_none() {
            if let Some(id) = &game.game_id {
                self.persisted_id = Some(id.clone());
                learned = true;
            }
        }
        learned
    }

    /// The key to resume with: persisted if known, else ephemeral.
    pub fn resume_key(&self) -> Option<GameKey> {
        match (&self.persisted_id, &self.session_id) {
            (Some(id), _) => Some(GameKey::Persisted(id.clone())),
            (None, Some(id)) => Some(GameKey::Ephemeral(id.clone())),
            (None, None) => None,
        }
    }

    /// Wire form carrying every known id.
    pub fn to_ref(&self) -> GameRef {
        GameRef {
            session_id: self.session_id.clone(),
            game_id: self.persisted_id.clone(),
        }
    }
}

impl fmt::Display for GameIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.session_id, &self.persisted_id) {
            (Some(s), Some(p)) => write!(f, "{}/{}", s, p),
            (Some(s), None) => write!(f, "{}", s),
            (None, Some(p)) => write!(f, "game:{}", p),
            (None, None) => f.write_str("<none>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_ref(session: Option<&str>, game: Option<&str>) -> GameRef {
        GameRef {
            session_id: session.map(SessionId::new),
            game_id: game.map(PersistedId::new),
        }
    }

    #[test]
    fn test_session_origin_from_prefix() {
        assert_eq!(SessionId::new("mm_abc").origin(), SessionOrigin::Matchmade);
        assert_eq!(SessionId::new("room_abc").origin(), SessionOrigin::Room);
        assert_eq!(SessionId::new("abc").origin(), SessionOrigin::Unknown);
    }

    #[test]
    fn test_accepts_either_namespace() {
        let identity = GameIdentity::new(SessionId::new("mm_1"), Some(PersistedId::new("g1")));

        assert!(identity.accepts(&game_ref(Some("mm_1"), None)));
        assert!(identity.accepts(&game_ref(None, Some("g1"))));
        assert!(identity.accepts(&game_ref(Some("mm_other"), Some("g1"))));
        assert!(!identity.accepts(&game_ref(Some("mm_2"), Some("g2"))));
        assert!(!identity.accepts(&game_ref(None, None)));
    }

    #[test]
    fn test_namespaces_do_not_cross() {
        // The same string in the other namespace is a different game.
        let identity = GameIdentity::new(SessionId::new("x"), None);
        assert!(!identity.accepts(&game_ref(None, Some("x"))));
    }

    #[test]
    fn test_absorb_learns_missing_session_id() {
        let mut identity = GameIdentity::persisted(PersistedId::new("g1"));
        assert!(identity.session_id().is_none());

        assert!(identity.absorb(&game_ref(Some("room_9"), Some("g1"))));
        assert_eq!(identity.session_id(), Some(&SessionId::new("room_9")));
        assert_eq!(identity.origin(), SessionOrigin::Room);

        // Nothing new to learn the second time.
        assert!(!identity.absorb(&game_ref(Some("room_9"), Some("g1"))));
    }

    #[test]
    fn test_absorb_ignores_foreign_reference() {
        let mut identity = GameIdentity::persisted(PersistedId::new("g1"));
        assert!(!identity.absorb(&game_ref(Some("room_9"), Some("g2"))));
        assert!(identity.session_id().is_none());
    }

    #[test]
    fn test_resume_key_prefers_persisted() {
        let both = GameIdentity::new(SessionId::new("mm_1"), Some(PersistedId::new("g1")));
        assert_eq!(both.resume_key(), Some(GameKey::Persisted(PersistedId::new("g1"))));

        let ephemeral = GameIdentity::new(SessionId::new("mm_1"), None);
        assert_eq!(ephemeral.resume_key(), Some(GameKey::Ephemeral(SessionId::new("mm_1"))));
    }

    #[test]
    fn test_resume_key_without_ids() {
        let empty = GameIdentity {
            session_id: None,
            persisted_id: None,
        };
        assert_eq!(empty.resume_key(), None);
    }

    #[test]
    fn test_from_ref_requires_an_id() {
        assert!(GameIdentity::from_ref(&game_ref(None, None)).is_none());
        let identity = GameIdentity::from_ref(&game_ref(Some("mm_1"), None)).unwrap();
        assert_eq!(identity.to_ref(), game_ref(Some("mm_1"), None));
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::First.opposite(), Side::Second);
        assert_eq!(Side::Second.opposite(), Side::First);
    }
}
