//! Per-session game state
//!
//! A [`Session`] is owned by the engine actor and mutated only from there.
//! Everything observers may see is copied into a [`SessionSnapshot`].

use super::sequence::next_expected_side;
use super::settlement::SettlementSummary;
use super::types::{Amount, BetId, Card, Phase, Round, Side, SessionId, UserId, UserStakes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A bet accepted into the current session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedBet {
    pub bet_id: BetId,
    pub round: Round,
    pub side: Side,
    pub amount: Amount,
}

/// The card that ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub side: Side,
    pub card: Card,
    pub round: Round,
}

/// Settlement progress of a complete session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementState {
    NotStarted,
    Failed { code: String, message: String },
    Settled { total_payouts: Amount, house_profit: i64 },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) phase: Phase,
    pub(crate) round: Round,
    pub(crate) opening_card: Option<Card>,
    pub(crate) andar_cards: Vec<Card>,
    pub(crate) bahar_cards: Vec<Card>,
    /// Betting window length chosen at start; reused for round 2
    pub(crate) betting_secs: u64,
    pub(crate) timer_remaining: u64,
    /// Bumped whenever a betting window opens or closes; stale ticks carry an old value
    pub(crate) timer_generation: u64,
    pub(crate) betting_locked: bool,
    pub(crate) aggregate_stakes: UserStakes,
    pub(crate) user_stakes: HashMap<UserId, UserStakes>,
    pub(crate) bets: HashMap<UserId, Vec<PlacedBet>>,
    pub(crate) winner: Option<Winner>,
    pub(crate) settlement: SettlementState,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Fresh idle session with a new id
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: Phase::Idle,
            round: Round::First,
            opening_card: None,
            andar_cards: Vec::new(),
            bahar_cards: Vec::new(),
            betting_secs: 0,
            timer_remaining: 0,
            timer_generation: 0,
            betting_locked: false,
            aggregate_stakes: UserStakes::default(),
            user_stakes: HashMap::new(),
            bets: HashMap::new(),
            winner: None,
            settlement: SettlementState::NotStarted,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn opening_card(&self) -> Option<Card> {
        self.opening_card
    }

    pub fn cards(&self, side: Side) -> &[Card] {
        match side {
            Side::Andar => &self.andar_cards,
            Side::Bahar => &self.bahar_cards,
        }
    }

    pub fn betting_locked(&self) -> bool {
        self.betting_locked
    }

    pub fn timer_remaining(&self) -> u64 {
        self.timer_remaining
    }

    pub fn timer_generation(&self) -> u64 {
        self.timer_generation
    }

    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    pub fn settlement(&self) -> &SettlementState {
        &self.settlement
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.settlement, SettlementState::Settled { .. })
    }

    pub fn aggregate_stakes(&self) -> &UserStakes {
        &self.aggregate_stakes
    }

    pub fn user_stakes(&self, user_id: &str) -> UserStakes {
        self.user_stakes.get(user_id).copied().unwrap_or_default()
    }

    pub fn user_bets(&self, user_id: &str) -> &[PlacedBet] {
        self.bets.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Users holding a nonzero stake, with their positions and bets
    pub fn positions(&self) -> impl Iterator<Item = (&UserId, &UserStakes, &[PlacedBet])> {
        self.user_stakes
            .iter()
            .filter(|(_, stakes)| !stakes.is_empty())
            .map(|(user, stakes)| (user, stakes, self.user_bets(user)))
    }

    pub fn player_count(&self) -> usize {
        self.positions().count()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Side the next dealt card must go to; `None` outside dealing
    pub fn next_expected_side(&self) -> Option<Side> {
        if self.phase != Phase::Dealing {
            return None;
        }
        next_expected_side(self.round, self.andar_cards.len(), self.bahar_cards.len())
    }

    /// Adds an accepted bet to the user's position and the round aggregates
    pub(crate) fn record_stake(&mut self, user_id: &str, bet: PlacedBet) -> UserStakes {
        self.aggregate_stakes.add(bet.round, bet.side, bet.amount);
        let stakes = self.user_stakes.entry(user_id.to_string()).or_default();
        stakes.add(bet.round, bet.side, bet.amount);
        let updated = *stakes;
        self.bets.entry(user_id.to_string()).or_default().push(bet);
        updated
    }

    pub(crate) fn mark_settled(&mut self, summary: &SettlementSummary) {
        self.settlement = SettlementState::Settled {
            total_payouts: summary.total_payouts,
            house_profit: summary.house_profit,
        };
    }

    pub(crate) fn mark_settlement_failed(&mut self, code: &str, message: String) {
        self.settlement = SettlementState::Failed {
            code: code.to_string(),
            message,
        };
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            phase: self.phase,
            round: self.round,
            opening_card: self.opening_card,
            andar_cards: self.andar_cards.clone(),
            bahar_cards: self.bahar_cards.clone(),
            next_side: self.next_expected_side(),
            timer_remaining: self.timer_remaining,
            betting_locked: self.betting_locked,
            stakes: self.aggregate_stakes,
            player_count: self.player_count(),
            winner: self.winner,
            settlement: self.settlement.clone(),
            started_at: self.started_at,
        }
    }
}

/// Read-only copy of the public session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub phase: Phase,
    pub round: Round,
    pub opening_card: Option<Card>,
    pub andar_cards: Vec<Card>,
    pub bahar_cards: Vec<Card>,
    pub next_side: Option<Side>,
    pub timer_remaining: u64,
    pub betting_locked: bool,
    /// Aggregate stakes per round and side
    pub stakes: UserStakes,
    pub player_count: usize,
    pub winner: Option<Winner>,
    pub settlement: SettlementState,
    pub started_at: Option<DateTime<Utc>>,
}
