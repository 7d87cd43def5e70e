//! Outbound game events and the broadcast dispatcher
//!
//! Every event is wrapped in an [`Envelope`] naming its audience. One
//! broadcast channel carries all envelopes; each connection filters by its
//! own principal, so targeted events never reach other users.

use super::session::SessionSnapshot;
use super::settlement::BetResult;
use super::types::{Amount, BetId, Card, Phase, Principal, Round, SessionId, Side, SideStakes, UserId, UserStakes};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameEvent {
    #[serde(rename = "opening_card_confirmed")]
    OpeningCardConfirmed {
        session_id: SessionId,
        opening_card: Card,
        timer_seconds: u64,
    },

    #[serde(rename = "timer_update")]
    TimerUpdate {
        seconds: u64,
        phase: Phase,
        round: Round,
        betting_locked: bool,
    },

    #[serde(rename = "phase_change")]
    PhaseChange {
        phase: Phase,
        round: Round,
        message: String,
    },

    /// Lock margin reached; the countdown keeps running
    #[serde(rename = "betting_locked")]
    BettingLocked { round: Round, seconds_left: u64 },

    #[serde(rename = "card_dealt")]
    CardDealt {
        card: Card,
        side: Side,
        is_winning_card: bool,
        andar_count: usize,
        bahar_count: usize,
        next_side: Option<Side>,
    },

    /// Aggregate stakes per round and side
    #[serde(rename = "betting_stats")]
    BettingStats { round: Round, stakes: UserStakes },

    #[serde(rename = "bet_confirmed")]
    BetConfirmed {
        bet_id: BetId,
        side: Side,
        round: Round,
        amount: Amount,
        new_balance: Amount,
    },

    #[serde(rename = "payout_received")]
    PayoutReceived {
        session_id: SessionId,
        amount: Amount,
        staked: Amount,
        new_balance: Option<Amount>,
        round: Round,
        result: BetResult,
    },

    #[serde(rename = "game_complete")]
    GameComplete {
        session_id: SessionId,
        winner: Side,
        winning_card: Card,
        round: Round,
        total_stakes: Amount,
        total_payouts: Amount,
    },

    /// Operator-only settlement totals
    #[serde(rename = "house_summary")]
    HouseSummary {
        session_id: SessionId,
        round: Round,
        total_stakes: Amount,
        total_payouts: Amount,
        house_profit: i64,
        stakes_by_side: SideStakes,
    },

    /// Operator-only; settlement aborted and the session awaits retry
    #[serde(rename = "settlement_alert")]
    SettlementAlert {
        session_id: SessionId,
        code: String,
        message: String,
    },

    #[serde(rename = "game_reset")]
    GameReset {
        previous_session_id: SessionId,
        session_id: SessionId,
    },

    /// Full state, sent to every new connection
    #[serde(rename = "session_snapshot")]
    Snapshot { snapshot: SessionSnapshot },
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::OpeningCardConfirmed { .. } => "opening_card_confirmed",
            GameEvent::TimerUpdate { .. } => "timer_update",
            GameEvent::PhaseChange { .. } => "phase_change",
            GameEvent::BettingLocked { .. } => "betting_locked",
            GameEvent::CardDealt { .. } => "card_dealt",
            GameEvent::BettingStats { .. } => "betting_stats",
            GameEvent::BetConfirmed { .. } => "bet_confirmed",
            GameEvent::PayoutReceived { .. } => "payout_received",
            GameEvent::GameComplete { .. } => "game_complete",
            GameEvent::HouseSummary { .. } => "house_summary",
            GameEvent::SettlementAlert { .. } => "settlement_alert",
            GameEvent::GameReset { .. } => "game_reset",
            GameEvent::Snapshot { .. } => "session_snapshot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    All,
    Operators,
    User(UserId),
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub audience: Audience,
    pub event: GameEvent,
}

impl Envelope {
    pub fn is_visible_to(&self, principal: &Principal) -> bool {
        match &self.audience {
            Audience::All => true,
            Audience::Operators => principal.is_operator(),
            Audience::User(user_id) => *user_id == principal.user_id,
        }
    }
}

/// Fan-out of game events to every connected observer
#[derive(Clone)]
pub struct Dispatcher {
    sender: broadcast::Sender<Envelope>,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn broadcast(&self, event: GameEvent) {
        self.send(Audience::All, event);
    }

    pub fn to_operators(&self, event: GameEvent) {
        self.send(Audience::Operators, event);
    }

    pub fn to_user(&self, user_id: impl Into<UserId>, event: GameEvent) {
        self.send(Audience::User(user_id.into()), event);
    }

    fn send(&self, audience: Audience, event: GameEvent) {
        let name = event.name();
        // No subscribers is not an error
        if self.sender.send(Envelope { audience, event }).is_err() {
            trace!("No subscribers for {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_event() -> GameEvent {
        GameEvent::GameReset {
            previous_session_id: uuid::Uuid::nil(),
            session_id: uuid::Uuid::nil(),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = GameEvent::BettingLocked {
            round: Round::First,
            seconds_left: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "betting_locked");
        assert_eq!(json["round"], 1);
        assert_eq!(event.name(), "betting_locked");
    }

    #[test]
    fn test_audience_filtering() {
        let alice = Principal::player("alice");
        let bob = Principal::player("bob");
        let dealer = Principal::operator("dealer");

        let targeted = Envelope {
            audience: Audience::User("alice".to_string()),
            event: reset_event(),
        };
        assert!(targeted.is_visible_to(&alice));
        assert!(!targeted.is_visible_to(&bob));
        assert!(!targeted.is_visible_to(&dealer));

        let operators = Envelope {
            audience: Audience::Operators,
            event: reset_event(),
        };
        assert!(operators.is_visible_to(&dealer));
        assert!(!operators.is_visible_to(&alice));
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_in_order() {
        let dispatcher = Dispatcher::new(16);
        let mut rx = dispatcher.subscribe();
        dispatcher.broadcast(reset_event());
        dispatcher.to_user("alice", GameEvent::BettingLocked { round: Round::First, seconds_left: 1 });

        assert_eq!(rx.recv().await.unwrap().event.name(), "game_reset");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.audience, Audience::User("alice".to_string()));
    }

    #[test]
    fn test_send_without_subscribers_is_silent() {
        let dispatcher = Dispatcher::new(4);
        dispatcher.broadcast(reset_event());
        assert_eq!(dispatcher.receiver_count(), 0);
    }
}
