//! Round state machine
//!
//! ```text
//! idle --start--> betting(1) --expire/lock--> dealing(1) --round done--> betting(2)
//! betting(2) --expire/lock--> dealing(2) --round done--> dealing(3)
//! dealing(any) --rank match--> complete --reset--> idle (new session)
//! ```
//!
//! Every function here validates before it mutates: an `Err` leaves the
//! session untouched.

use super::session::{Session, Winner};
use super::types::{Card, Phase, Round, Side};
use crate::errors::{GameError, GameResult};
use chrono::Utc;

/// Result of a single countdown tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Countdown continues, betting still open
    Running { remaining: u64 },
    /// Remaining time dropped into the lock margin on this tick
    Locked { remaining: u64 },
    /// Already locked, counting down to zero
    LockedRunning { remaining: u64 },
    /// Countdown reached zero; session moved to dealing
    Expired,
}

/// What a dealt card did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealOutcome {
    /// Rank matched the opening card; session is complete
    Winner(Winner),
    /// More cards are due in the current round
    Continue { next_side: Side },
    /// Round 1 fully dealt; round 2 betting opened with a fresh timer
    BettingReopened { round: Round, timer_secs: u64 },
    /// Round 2 fully dealt; continuous draw begins
    ContinuousDraw { next_side: Side },
}

/// Idle to betting(1) with the operator's opening card and timer
pub fn start(session: &mut Session, opening_card: Card, timer_secs: u64) -> GameResult<()> {
    if session.phase != Phase::Idle {
        return Err(GameError::WrongPhase {
            expected: Phase::Idle,
            actual: session.phase,
        });
    }
    session.opening_card = Some(opening_card);
    session.betting_secs = timer_secs;
    session.started_at = Some(Utc::now());
    open_betting(session, Round::First);
    Ok(())
}

fn open_betting(session: &mut Session, round: Round) {
    session.phase = Phase::Betting;
    session.round = round;
    session.timer_remaining = session.betting_secs;
    session.betting_locked = false;
    session.timer_generation += 1;
}

/// Locks a freshly opened window that already sits inside the margin
pub fn enforce_lock_margin(session: &mut Session, lock_margin_secs: u64) -> bool {
    if session.phase == Phase::Betting
        && !session.betting_locked
        && session.timer_remaining <= lock_margin_secs
    {
        session.betting_locked = true;
        return true;
    }
    false
}

/// Advance the countdown by one second
pub fn tick(session: &mut Session, lock_margin_secs: u64) -> GameResult<TickOutcome> {
    if session.phase != Phase::Betting {
        return Err(GameError::WrongPhase {
            expected: Phase::Betting,
            actual: session.phase,
        });
    }
    session.timer_remaining = session.timer_remaining.saturating_sub(1);
    if session.timer_remaining == 0 {
        close_betting(session)?;
        return Ok(TickOutcome::Expired);
    }
    let remaining = session.timer_remaining;
    if remaining <= lock_margin_secs && !session.betting_locked {
        session.betting_locked = true;
        return Ok(TickOutcome::Locked { remaining });
    }
    if session.betting_locked {
        Ok(TickOutcome::LockedRunning { remaining })
    } else {
        Ok(TickOutcome::Running { remaining })
    }
}

/// Betting to dealing for the same round; used on expiry and operator lock
pub fn close_betting(session: &mut Session) -> GameResult<()> {
    if session.phase != Phase::Betting {
        return Err(GameError::WrongPhase {
            expected: Phase::Betting,
            actual: session.phase,
        });
    }
    session.phase = Phase::Dealing;
    session.betting_locked = true;
    session.timer_remaining = 0;
    session.timer_generation += 1;
    Ok(())
}

/// Append a card to `side`, checking phase and dealing order first
pub fn deal(session: &mut Session, side: Side, card: Card) -> GameResult<DealOutcome> {
    if session.phase != Phase::Dealing {
        return Err(GameError::WrongPhase {
            expected: Phase::Dealing,
            actual: session.phase,
        });
    }
    let Some(expected) = session.next_expected_side() else {
        return Err(GameError::WrongPhase {
            expected: Phase::Betting,
            actual: session.phase,
        });
    };
    if side != expected {
        return Err(GameError::UnexpectedSide {
            expected,
            actual: side,
        });
    }
    let Some(opening) = session.opening_card else {
        return Err(GameError::InvalidCard("session has no opening card".to_string()));
    };

    match side {
        Side::Andar => session.andar_cards.push(card),
        Side::Bahar => session.bahar_cards.push(card),
    }

    if card.matches_rank(&opening) {
        let winner = Winner {
            side,
            card,
            round: session.round,
        };
        session.winner = Some(winner);
        session.phase = Phase::Complete;
        session.completed_at = Some(Utc::now());
        return Ok(DealOutcome::Winner(winner));
    }

    if let Some(next_side) = session.next_expected_side() {
        return Ok(DealOutcome::Continue { next_side });
    }

    match session.round {
        Round::First => {
            open_betting(session, Round::Second);
            Ok(DealOutcome::BettingReopened {
                round: Round::Second,
                timer_secs: session.timer_remaining,
            })
        }
        _ => {
            session.round = Round::Continuous;
            let next_side = session.next_expected_side().unwrap_or(Side::Bahar);
            Ok(DealOutcome::ContinuousDraw { next_side })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::{Rank, Suit};

    fn card(s: &str) -> Card {
        s.parse().unwrap()
    }

    fn dealing_session(opening: &str) -> Session {
        let mut session = Session::new();
        start(&mut session, card(opening), 10).unwrap();
        close_betting(&mut session).unwrap();
        session
    }

    #[test]
    fn test_start_requires_idle() {
        let mut session = Session::new();
        start(&mut session, card("7S"), 30).unwrap();
        assert_eq!(session.phase(), Phase::Betting);
        assert_eq!(session.round(), Round::First);
        assert_eq!(session.timer_remaining(), 30);

        let err = start(&mut session, card("8S"), 30).unwrap_err();
        assert!(matches!(err, GameError::WrongPhase { expected: Phase::Idle, .. }));
        assert_eq!(session.opening_card(), Some(card("7S")));
    }

    #[test]
    fn test_tick_locks_then_expires() {
        let mut session = Session::new();
        start(&mut session, card("7S"), 4).unwrap();
        let generation = session.timer_generation();

        assert_eq!(tick(&mut session, 2).unwrap(), TickOutcome::Running { remaining: 3 });
        assert_eq!(tick(&mut session, 2).unwrap(), TickOutcome::Locked { remaining: 2 });
        assert!(session.betting_locked());
        assert_eq!(session.phase(), Phase::Betting);
        assert_eq!(tick(&mut session, 2).unwrap(), TickOutcome::LockedRunning { remaining: 1 });
        assert_eq!(tick(&mut session, 2).unwrap(), TickOutcome::Expired);
        assert_eq!(session.phase(), Phase::Dealing);
        assert!(session.timer_generation() > generation);
    }

    #[test]
    fn test_deal_rejects_wrong_side_without_mutation() {
        let mut session = dealing_session("7S");
        let err = deal(&mut session, Side::Andar, card("2H")).unwrap_err();
        match err {
            GameError::UnexpectedSide { expected, actual } => {
                assert_eq!(expected, Side::Bahar);
                assert_eq!(actual, Side::Andar);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(session.cards(Side::Andar).is_empty());
    }

    #[test]
    fn test_deal_outside_dealing_is_rejected() {
        let mut session = Session::new();
        assert!(matches!(
            deal(&mut session, Side::Bahar, card("2H")),
            Err(GameError::WrongPhase { expected: Phase::Dealing, .. })
        ));
    }

    #[test]
    fn test_winner_on_first_card() {
        let mut session = dealing_session("7S");
        let outcome = deal(&mut session, Side::Bahar, card("7H")).unwrap();
        match outcome {
            DealOutcome::Winner(winner) => {
                assert_eq!(winner.side, Side::Bahar);
                assert_eq!(winner.round, Round::First);
                assert_eq!(winner.card, Card::new(Rank::Seven, Suit::Hearts));
            }
            other => panic!("expected winner, got {:?}", other),
        }
        assert_eq!(session.phase(), Phase::Complete);
        assert!(session.completed_at().is_some());
    }

    #[test]
    fn test_full_progression_to_continuous_draw() {
        let mut session = dealing_session("7S");
        assert_eq!(
            deal(&mut session, Side::Bahar, card("2H")).unwrap(),
            DealOutcome::Continue { next_side: Side::Andar }
        );
        let reopened = deal(&mut session, Side::Andar, card("3H")).unwrap();
        assert_eq!(
            reopened,
            DealOutcome::BettingReopened { round: Round::Second, timer_secs: 10 }
        );
        assert_eq!(session.phase(), Phase::Betting);
        assert!(!session.betting_locked());

        close_betting(&mut session).unwrap();
        deal(&mut session, Side::Bahar, card("4H")).unwrap();
        assert_eq!(
            deal(&mut session, Side::Andar, card("5H")).unwrap(),
            DealOutcome::ContinuousDraw { next_side: Side::Bahar }
        );
        assert_eq!(session.round(), Round::Continuous);
        assert_eq!(session.phase(), Phase::Dealing);

        deal(&mut session, Side::Bahar, card("6H")).unwrap();
        deal(&mut session, Side::Andar, card("8H")).unwrap();
        let outcome = deal(&mut session, Side::Bahar, card("7D")).unwrap();
        assert!(matches!(outcome, DealOutcome::Winner(Winner { round: Round::Continuous, .. })));
        assert_eq!(session.cards(Side::Bahar).len(), 4);
        assert_eq!(session.cards(Side::Andar).len(), 3);
    }

    #[test]
    fn test_short_window_locks_immediately() {
        let mut session = Session::new();
        start(&mut session, card("7S"), 2).unwrap();
        assert!(enforce_lock_margin(&mut session, 2));
        assert!(session.betting_locked());
        assert!(!enforce_lock_margin(&mut session, 2));
    }

    #[test]
    fn test_close_betting_twice_fails() {
        let mut session = dealing_session("KH");
        assert!(close_betting(&mut session).is_err());
    }
}
