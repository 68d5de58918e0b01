//! Matchmaking Controller
//!
//! One outstanding wager request at a time. Every local check happens before
//! anything is queued for the server.

use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::identity::GameIdentity;
use crate::network::protocol::{
    ClientMessage, ErrorCode, FindMatchRequest, MatchFoundInfo, MatchmakingResponse,
    MatchmakingStatus,
};
use crate::session::events::{Outbox, SearchEndReason, SessionEvent};
use crate::session::reconciler::{GameReconciler, GameSnapshot, SessionError, SessionPhase};

/// An outstanding matchmaking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchmakingRequest {
    /// Stake per player.
    pub wager: u64,
    /// Name shown to the opponent.
    pub display_name: String,
}

/// Check a stake against the known balance.
pub fn check_stake(wager: u64, balance: Option<u64>) -> Result<(), SessionError> {
    match balance {
        None => Err(SessionError::BalanceUnknown),
        Some(balance) if wager > balance => Err(SessionError::InsufficientBalance { wager, balance }),
        Some(_) => Ok(()),
    }
}

/// Tracks the outstanding matchmaking request.
#[derive(Debug, Default)]
pub struct Matchmaker {
    outstanding: Option<MatchmakingRequest>,
    /// A cancel was sent and the server has not confirmed it yet.
    cancel_in_flight: bool,
}

impl Matchmaker {
    /// No request outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// The outstanding request.
    pub fn outstanding(&self) -> Option<&MatchmakingRequest> {
        self.outstanding.as_ref()
    }

    /// Whether a request is outstanding.
    pub fn is_searching(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Join the queue.
    pub fn find_match<C: Clock>(
        &mut self,
        wager: u64,
        display_name: &str,
        balance: Option<u64>,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) -> Result<(), SessionError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SessionError::BlankDisplayName);
        }
        check_stake(wager, balance)?;
        if self.outstanding.is_some() {
            return Err(SessionError::AlreadySearching);
        }
        reconciler.begin_search()?;

        info!(wager, "Searching for a match");
        self.outstanding = Some(MatchmakingRequest {
            wager,
            display_name: display_name.to_string(),
        });
        self.cancel_in_flight = false;
        out.send(ClientMessage::FindMatch(FindMatchRequest {
            wager,
            display_name: display_name.to_string(),
        }));
        out.emit(SessionEvent::SearchStarted { wager });
        Ok(())
    }

    /// Leave the queue. No-op unless a request is outstanding.
    pub fn cancel_search<C: Clock>(
        &mut self,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) -> bool {
        if self.outstanding.take().is_none() {
            return false;
        }
        info!("Cancelling search");
        self.cancel_in_flight = true;
        reconciler.end_search();
        out.send(ClientMessage::CancelSearch);
        out.emit(SessionEvent::SearchEnded {
            reason: SearchEndReason::Cancelled,
        });
        true
    }

    /// Handle a queue status message.
    pub fn on_status<C: Clock>(
        &mut self,
        response: &MatchmakingResponse,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) {
        match response.status {
            MatchmakingStatus::Searching => {
                debug!(estimated_wait = ?response.estimated_wait, "In queue");
            }
            MatchmakingStatus::Cancelled | MatchmakingStatus::Failed => {
                self.cancel_in_flight = false;
                if self.outstanding.take().is_some() {
                    let reason = if response.status == MatchmakingStatus::Cancelled {
                        SearchEndReason::Cancelled
                    } else {
                        SearchEndReason::Failed
                    };
                    info!(?reason, "Search ended by server");
                    reconciler.end_search();
                    out.emit(SessionEvent::SearchEnded { reason });
                }
            }
        }
    }

    /// Handle a server error while a request is outstanding.
    ///
    /// Returns whether it ended the search.
    pub fn on_server_error<C: Clock>(
        &mut self,
        code: ErrorCode,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) -> bool {
        if !matches!(code, ErrorCode::InsufficientBalance | ErrorCode::RateLimited) {
            return false;
        }
        if self.outstanding.take().is_none() {
            return false;
        }
        warn!(?code, "Server refused the search");
        reconciler.end_search();
        out.emit(SessionEvent::SearchEnded {
            reason: SearchEndReason::Failed,
        });
        true
    }

    /// Handle a match-found message. Returns whether a game was installed.
    pub fn on_match_found<C: Clock>(
        &mut self,
        info: &MatchFoundInfo,
        reconciler: &mut GameReconciler<C>,
        out: &mut Outbox,
    ) -> bool {
        if self.outstanding.is_none() && !self.cancel_in_flight {
            debug!(game = ?info.game, "Match found with no outstanding request; dropping");
            return false;
        }
        let Some(identity) = GameIdentity::from_ref(&info.game) else {
            warn!("Match found without a game id; dropping");
            return false;
        };
        if !matches!(reconciler.phase(), SessionPhase::Searching | SessionPhase::Idle) {
            warn!(
                game = ?info.game,
                phase = ?reconciler.phase(),
                "Match found while a game is current; dropping"
            );
            self.cancel_in_flight = false;
            return false;
        }
        if self.cancel_in_flight {
            info!("Match found while a cancel was in flight; server wins");
        }

        self.outstanding = None;
        self.cancel_in_flight = false;
        let snapshot = GameSnapshot::from_match(identity.clone(), info);
        reconciler.install(identity, Some(snapshot), info.base_time_ms, out);
        true
    }

    /// Forget any late match-found for a cancelled request.
    pub fn settle(&mut self) {
        self.cancel_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::identity::{SessionId, Side};
    use crate::core::identity::PersistedId;
    use crate::network::protocol::GameRef;

    fn setup() -> (Matchmaker, GameReconciler<ManualClock>, Outbox) {
        (
            Matchmaker::new(),
            GameReconciler::new(ManualClock::new(0), 600_000),
            Outbox::new(),
        )
    }

    fn match_found(id: &str) -> MatchFoundInfo {
        MatchFoundInfo {
            game: GameRef {
                session_id: Some(SessionId::new(id)),
                game_id: None,
            },
            color: Side::Second,
            opponent_name: "Bob".into(),
            wager: 500,
            board: "start".into(),
            turn: Side::First,
            base_time_ms: None,
        }
    }

    #[test]
    fn test_wager_over_balance_is_rejected_locally() {
        let (mut mm, mut rec, mut out) = setup();
        let err = mm.find_match(500, "Alice", Some(400), &mut rec, &mut out);

        assert_eq!(
            err,
            Err(SessionError::InsufficientBalance {
                wager: 500,
                balance: 400
            })
        );
        assert!(out.is_empty());
        assert_eq!(rec.phase(), SessionPhase::Idle);
        assert!(!mm.is_searching());
    }

    #[test]
    fn test_unknown_balance_is_rejected() {
        let (mut mm, mut rec, mut out) = setup();
        assert_eq!(
            mm.find_match(10, "Alice", None, &mut rec, &mut out),
            Err(SessionError::BalanceUnknown)
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let (mut mm, mut rec, mut out) = setup();
        assert_eq!(
            mm.find_match(10, "   ", Some(100), &mut rec, &mut out),
            Err(SessionError::BlankDisplayName)
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_find_match_sends_request() {
        let (mut mm, mut rec, mut out) = setup();
        mm.find_match(400, " Alice ", Some(400), &mut rec, &mut out).unwrap();

        assert_eq!(rec.phase(), SessionPhase::Searching);
        assert_eq!(
            out.take_messages(),
            vec![ClientMessage::FindMatch(FindMatchRequest {
                wager: 400,
                display_name: "Alice".into(),
            })]
        );
        assert_eq!(
            mm.find_match(10, "Alice", Some(400), &mut rec, &mut out),
            Err(SessionError::AlreadySearching)
        );
    }

    #[test]
    fn test_cancel_while_not_searching_is_noop() {
        let (mut mm, mut rec, mut out) = setup();
        assert!(!mm.cancel_search(&mut rec, &mut out));
        assert!(!mm.cancel_search(&mut rec, &mut out));
        assert!(out.is_empty());
        assert_eq!(rec.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (mut mm, mut rec, mut out) = setup();
        mm.find_match(10, "Alice", Some(100), &mut rec, &mut out).unwrap();
        out.take_messages();

        assert!(mm.cancel_search(&mut rec, &mut out));
        assert!(!mm.cancel_search(&mut rec, &mut out));
        assert_eq!(out.take_messages(), vec![ClientMessage::CancelSearch]);
        assert_eq!(rec.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_match_found_installs_game() {
        let (mut mm, mut rec, mut out) = setup();
        mm.find_match(500, "Alice", Some(1_000), &mut rec, &mut out).unwrap();

        assert!(mm.on_match_found(&match_found("mm_1"), &mut rec, &mut out));
        assert!(!mm.is_searching());
        assert_eq!(rec.phase(), SessionPhase::InSession);
        let snapshot = rec.snapshot().unwrap();
        assert_eq!(snapshot.local_color, Side::Second);
        assert!(!snapshot.is_local_turn);
    }

    #[test]
    fn test_unsolicited_match_found_is_dropped() {
        let (mut mm, mut rec, mut out) = setup();
        assert!(!mm.on_match_found(&match_found("mm_1"), &mut rec, &mut out));
        assert_eq!(rec.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_match_found_racing_cancel_is_accepted() {
        let (mut mm, mut rec, mut out) = setup();
        mm.find_match(10, "Alice", Some(100), &mut rec, &mut out).unwrap();
        mm.cancel_search(&mut rec, &mut out);

        assert!(mm.on_match_found(&match_found("mm_1"), &mut rec, &mut out));
        assert_eq!(rec.phase(), SessionPhase::InSession);

        // Only the first one counts.
        assert!(!mm.on_match_found(&match_found("mm_2"), &mut rec, &mut out));
    }

    #[test]
    fn test_match_found_never_replaces_current_game() {
        let (mut mm, mut rec, mut out) = setup();
        mm.find_match(10, "Alice", Some(100), &mut rec, &mut out).unwrap();
        mm.cancel_search(&mut rec, &mut out);
        rec.resume(PersistedId::new("g_resumed"), &mut out).unwrap();

        assert!(!mm.on_match_found(&match_found("mm_late"), &mut rec, &mut out));
        assert_eq!(
            rec.identity().unwrap().persisted_id(),
            Some(&PersistedId::new("g_resumed"))
        );
        assert_eq!(rec.identity().unwrap().session_id(), None);
    }

    #[test]
    fn test_cancel_confirmation_closes_race() {
        let (mut mm, mut rec, mut out) = setup();
        mm.find_match(10, "Alice", Some(100), &mut rec, &mut out).unwrap();
        mm.cancel_search(&mut rec, &mut out);
        mm.on_status(
            &MatchmakingResponse {
                status: MatchmakingStatus::Cancelled,
                estimated_wait: None,
            },
            &mut rec,
            &mut out,
        );

        assert!(!mm.on_match_found(&match_found("mm_1"), &mut rec, &mut out));
    }

    #[test]
    fn test_server_failure_ends_search() {
        let (mut mm, mut rec, mut out) = setup();
        mm.find_match(10, "Alice", Some(100), &mut rec, &mut out).unwrap();
        mm.on_status(
            &MatchmakingResponse {
                status: MatchmakingStatus::Failed,
                estimated_wait: None,
            },
            &mut rec,
            &mut out,
        );

        assert!(!mm.is_searching());
        assert_eq!(rec.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_insufficient_balance_error_ends_search() {
        let (mut mm, mut rec, mut out) = setup();
        mm.find_match(10, "Alice", Some(100), &mut rec, &mut out).unwrap();
        assert!(mm.on_server_error(ErrorCode::InsufficientBalance, &mut rec, &mut out));
        assert_eq!(rec.phase(), SessionPhase::Idle);
        assert!(!mm.on_server_error(ErrorCode::InsufficientBalance, &mut rec, &mut out));
    }

    #[test]
    fn test_check_stake() {
        assert_eq!(check_stake(0, Some(0)), Ok(()));
        assert_eq!(check_stake(100, Some(100)), Ok(()));
        assert_eq!(check_stake(1, None), Err(SessionError::BalanceUnknown));
    }
}
