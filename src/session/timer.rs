//! Timer Reconciler
//!
//! Turns authoritative clock snapshots into a display clock.
//!
//! The running side is extrapolated from the last snapshot:
//!
//! ```text
//! now       = local_now + offset          (offset = server_now - local_now at capture)
//! elapsed   = now - server_now
//! remaining = max(0, remaining - elapsed) for the running side only
//! ```
//!
//! Nothing counts down on its own. Between snapshots the display is a pure
//! function of the last snapshot and the local clock.

use crate::core::clock::Clock;
use crate::core::identity::Side;
use crate::network::protocol::TimerState;

/// Base time per side when a game does not announce one (10 minutes).
pub const DEFAULT_BASE_TIME_MS: u64 = 600_000;

/// An authoritative clock reading, as captured locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSnapshot {
    /// First seat's remaining time at `server_now_ms`.
    pub first_remaining_ms: u64,
    /// Second seat's remaining time at `server_now_ms`.
    pub second_remaining_ms: u64,
    /// Server time of the reading.
    pub server_now_ms: i64,
    /// `server_now_ms - local_now` at capture.
    pub client_server_offset_ms: i64,
    /// Seat whose clock is running.
    pub running: Option<Side>,
    /// Local time at capture.
    pub captured_at_ms: i64,
}

impl TimerSnapshot {
    /// Capture a server reading received at local time `local_now_ms`.
    pub fn capture(state: &TimerState, local_now_ms: i64) -> Self {
        Self {
            first_remaining_ms: state.first_remaining_ms,
            second_remaining_ms: state.second_remaining_ms,
            server_now_ms: state.server_now_ms,
            client_server_offset_ms: state.server_now_ms.saturating_sub(local_now_ms),
            running: state.running,
            captured_at_ms: local_now_ms,
        }
    }

    /// Both sides at `base_ms`, nothing running.
    pub fn neutral(base_ms: u64, local_now_ms: i64) -> Self {
        Self {
            first_remaining_ms: base_ms,
            second_remaining_ms: base_ms,
            server_now_ms: local_now_ms,
            client_server_offset_ms: 0,
            running: None,
            captured_at_ms: local_now_ms,
        }
    }

    /// Remaining time as reported, without extrapolation.
    pub fn reported(&self, side: Side) -> u64 {
        match side {
            Side::First => self.first_remaining_ms,
            Side::Second => self.second_remaining_ms,
        }
    }

    /// Remaining time for `side` at local time `local_now_ms`.
    pub fn remaining_at(&self, side: Side, local_now_ms: i64) -> u64 {
        let reported = self.reported(side);
        if self.running != Some(side) {
            return reported;
        }
        let now = local_now_ms.saturating_add(self.client_server_offset_ms);
        // A local clock stepping backwards never adds time.
        let elapsed = now.saturating_sub(self.server_now_ms).max(0);
        reported.saturating_sub(elapsed as u64)
    }
}

/// What a clock widget shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDisplay {
    /// First seat, milliseconds.
    pub first_ms: u64,
    /// Second seat, milliseconds.
    pub second_ms: u64,
    /// Seat whose clock is running.
    pub running: Option<Side>,
}

impl ClockDisplay {
    /// Remaining time for `side`.
    pub fn remaining(&self, side: Side) -> u64 {
        match side {
            Side::First => self.first_ms,
            Side::Second => self.second_ms,
        }
    }

    /// Whether the running side has run out.
    pub fn flagged(&self) -> Option<Side> {
        self.running.filter(|side| self.remaining(*side) == 0)
    }
}

/// Format milliseconds as `m:ss`, rounding partial seconds up.
pub fn format_clock(ms: u64) -> String {
    let secs = ms.div_ceil(1000);
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Derives the display clock of the current game.
///
/// Holds no state across games: [`reset`](Self::reset) on every identity change.
#[derive(Debug, Clone)]
pub struct TimerReconciler<C: Clock> {
    clock: C,
    base_time_ms: u64,
    snapshot: TimerSnapshot,
    authoritative: bool,
}

impl<C: Clock> TimerReconciler<C> {
    /// Reconciler showing `base_time_ms` for both sides.
    pub fn new(clock: C, base_time_ms: u64) -> Self {
        let snapshot = TimerSnapshot::neutral(base_time_ms, clock.now_ms());
        Self {
            clock,
            base_time_ms,
            snapshot,
            authoritative: false,
        }
    }

    /// Forget the previous game and show `base_time_ms` until the first real snapshot.
    pub fn reset(&mut self, base_time_ms: u64) {
        self.base_time_ms = base_time_ms;
        self.snapshot = TimerSnapshot::neutral(base_time_ms, self.clock.now_ms());
        self.authoritative = false;
    }

    /// Replace the current snapshot with a server reading.
    pub fn apply(&mut self, state: &TimerState) {
        self.snapshot = TimerSnapshot::capture(state, self.clock.now_ms());
        self.authoritative = true;
    }

    /// Remaining time for `side` right now.
    pub fn remaining(&self, side: Side) -> u64 {
        if !self.authoritative {
            return self.base_time_ms;
        }
        self.snapshot.remaining_at(side, self.clock.now_ms())
    }

    /// Both clocks right now.
    pub fn display(&self) -> ClockDisplay {
        ClockDisplay {
            first_ms: self.remaining(Side::First),
            second_ms: self.remaining(Side::Second),
            running: if self.authoritative { self.snapshot.running } else { None },
        }
    }

    /// Last captured snapshot.
    pub fn snapshot(&self) -> &TimerSnapshot {
        &self.snapshot
    }

    /// Whether a server reading has arrived since the last reset.
    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Base time used while no snapshot is known.
    pub fn base_time_ms(&self) -> u64 {
        self.base_time_ms
    }
}
