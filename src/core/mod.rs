//! Core primitives.
//!
//! Time and identity types shared by the network and session layers.

pub mod clock;
pub mod identity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{GameIdentity, GameKey, PersistedId, SessionId, SessionOrigin, Side};
