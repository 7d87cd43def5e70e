//! Settlement of a completed session
//!
//! Settlement is idempotent per session: the settled marker is written in
//! the same atomic commit as the credits, so a second attempt replays the
//! committed summary instead of paying twice. History and period totals are
//! written afterwards on a detached task and never hold up the game.

use super::payout::calculate_payout;
use super::session::{PlacedBet, Session};
use super::types::{Amount, BetId, Card, Round, SessionId, Side, UserId, UserStakes};
use crate::errors::{SettlementError, StorageError};
use crate::metrics::GameMetrics;
use crate::storage::{
    call_with_deadline, call_with_deadline_then, period_key, GameHistoryRecord, GameStore,
    PeriodTotals,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetResult {
    Won,
    Lost,
}

/// One user's settled position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPayout {
    pub user_id: UserId,
    pub staked: Amount,
    pub payout: Amount,
    pub result: BetResult,
}

/// Committed outcome of a session, stored with the settled marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub session_id: SessionId,
    pub round: Round,
    pub winning_side: Side,
    pub winning_card: Card,
    pub stakes: UserStakes,
    pub total_stakes: Amount,
    pub total_payouts: Amount,
    /// Stakes minus payouts; negative when the house pays out more than it took
    pub house_profit: i64,
    pub payouts: Vec<UserPayout>,
    pub settled_at: DateTime<Utc>,
}

/// Everything the ledger must apply in one atomic commit
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementBatch {
    pub session_id: SessionId,
    /// Nonzero payouts only
    pub credits: Vec<(UserId, Amount)>,
    pub winning_bets: Vec<BetId>,
    pub losing_bets: Vec<BetId>,
    pub summary: SettlementSummary,
}

#[derive(Debug, Clone)]
pub struct UserPosition {
    pub user_id: UserId,
    pub stakes: UserStakes,
    pub bets: Vec<PlacedBet>,
}

/// Frozen copy of a complete session, taken before settlement runs
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub session_id: SessionId,
    pub round: Round,
    pub winning_side: Side,
    pub winning_card: Card,
    pub opening_card: Card,
    pub andar_cards: Vec<Card>,
    pub bahar_cards: Vec<Card>,
    pub aggregate_stakes: UserStakes,
    pub positions: Vec<UserPosition>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

impl SettlementRequest {
    pub fn from_session(session: &Session) -> Result<Self, SettlementError> {
        let (Some(winner), Some(opening_card)) = (session.winner(), session.opening_card()) else {
            return Err(SettlementError::NotComplete);
        };
        let mut positions: Vec<UserPosition> = session
            .positions()
            .map(|(user_id, stakes, bets)| UserPosition {
                user_id: user_id.clone(),
                stakes: *stakes,
                bets: bets.to_vec(),
            })
            .collect();
        positions.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        Ok(Self {
            session_id: session.id(),
            round: winner.round,
            winning_side: winner.side,
            winning_card: winner.card,
            opening_card,
            andar_cards: session.cards(Side::Andar).to_vec(),
            bahar_cards: session.cards(Side::Bahar).to_vec(),
            aggregate_stakes: *session.aggregate_stakes(),
            positions,
            started_at: session.started_at(),
            completed_at: session.completed_at().unwrap_or_else(Utc::now),
        })
    }

    pub fn history_record(&self, summary: &SettlementSummary) -> GameHistoryRecord {
        GameHistoryRecord {
            session_id: self.session_id,
            opening_card: self.opening_card,
            winning_card: self.winning_card,
            winning_side: self.winning_side,
            round: self.round,
            andar_cards: self.andar_cards.clone(),
            bahar_cards: self.bahar_cards.clone(),
            total_stakes: summary.total_stakes,
            total_payouts: summary.total_payouts,
            house_profit: summary.house_profit,
            player_count: self.positions.len(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Pure payout computation for every staking user
pub fn compute_batch(request: &SettlementRequest) -> SettlementBatch {
    let mut credits = Vec::new();
    let mut winning_bets = Vec::new();
    let mut losing_bets = Vec::new();
    let mut payouts = Vec::with_capacity(request.positions.len());

    for position in &request.positions {
        let payout = calculate_payout(request.round, request.winning_side, &position.stakes);
        if payout > 0 {
            credits.push((position.user_id.clone(), payout));
        }
        for bet in &position.bets {
            if bet.side == request.winning_side {
                winning_bets.push(bet.bet_id.clone());
            } else {
                losing_bets.push(bet.bet_id.clone());
            }
        }
        payouts.push(UserPayout {
            user_id: position.user_id.clone(),
            staked: position.stakes.total(),
            payout,
            result: if payout > 0 { BetResult::Won } else { BetResult::Lost },
        });
    }

    let total_stakes = request.aggregate_stakes.total();
    let total_payouts: Amount = payouts.iter().map(|p| p.payout).sum();
    let summary = SettlementSummary {
        session_id: request.session_id,
        round: request.round,
        winning_side: request.winning_side,
        winning_card: request.winning_card,
        stakes: request.aggregate_stakes,
        total_stakes,
        total_payouts,
        house_profit: total_stakes as i64 - total_payouts as i64,
        payouts,
        settled_at: Utc::now(),
    };

    SettlementBatch {
        session_id: request.session_id,
        credits,
        winning_bets,
        losing_bets,
        summary,
    }
}

/// Result handed back to the engine
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub summary: SettlementSummary,
    /// True when the session had already been settled
    pub replayed: bool,
    /// Balances read back after the commit; users whose read failed are absent
    pub balances: HashMap<UserId, Amount>,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

pub struct Settler {
    store: Arc<dyn GameStore>,
    metrics: GameMetrics,
    commit_timeout: Duration,
    history_retry: HistoryRetry,
}

impl Settler {
    pub fn new(
        store: Arc<dyn GameStore>,
        metrics: GameMetrics,
        commit_timeout: Duration,
        history_retry: HistoryRetry,
    ) -> Self {
        Self {
            store,
            metrics,
            commit_timeout,
            history_retry,
        }
    }

    /// Settle a completed session exactly once
    ///
    /// Every store call runs under the commit timeout; an expired call is
    /// reported as [`SettlementError::Timeout`] and the session stays retryable.
    pub async fn settle(&self, request: &SettlementRequest) -> Result<SettlementOutcome, SettlementError> {
        let session_id = request.session_id;
        if let Some(summary) = self.committed_summary(session_id).await? {
            info!("Session {} already settled; replaying summary", session_id);
            self.metrics.record_settlement("replayed");
            let balances = self.read_balances(&summary).await;
            return Ok(SettlementOutcome {
                summary,
                replayed: true,
                balances,
            });
        }

        let batch = compute_batch(request);
        debug!(
            "Committing settlement for {}: {} credits, {} winning bets, {} losing bets",
            session_id,
            batch.credits.len(),
            batch.winning_bets.len(),
            batch.losing_bets.len()
        );

        let commit = batch.clone();
        let committed = call_with_deadline_then(
            &self.store,
            self.commit_timeout,
            move |store| async move { store.commit_settlement(&commit).await },
            move |late| async move {
                match late {
                    Ok(()) => warn!("Settlement for {} landed after its deadline; a retry will replay it", session_id),
                    Err(e) => warn!("Settlement for {} failed after its deadline: {}", session_id, e),
                }
            },
        )
        .await;
        match committed {
            Ok(()) => {}
            Err(StorageError::TimedOut { .. }) => {
                self.metrics.record_settlement("aborted");
                return Err(self.timed_out());
            }
            Err(e) => {
                self.metrics.record_settlement("aborted");
                return Err(SettlementError::CommitFailed(e));
            }
        }

        self.metrics.record_settlement("settled");
        info!(
            "Settled session {}: stakes {}, payouts {}, house {}",
            session_id,
            batch.summary.total_stakes,
            batch.summary.total_payouts,
            batch.summary.house_profit
        );

        self.spawn_history_writes(request.history_record(&batch.summary), batch.summary.clone());
        let balances = self.read_balances(&batch.summary).await;
        Ok(SettlementOutcome {
            summary: batch.summary,
            replayed: false,
            balances,
        })
    }

    fn timed_out(&self) -> SettlementError {
        SettlementError::Timeout {
            secs: self.commit_timeout.as_secs(),
        }
    }

    /// Summary behind the settled marker, if the session was already committed
    async fn committed_summary(&self, session_id: SessionId) -> Result<Option<SettlementSummary>, SettlementError> {
        let lookup = call_with_deadline(&self.store, self.commit_timeout, move |store| {
            load_committed(store, session_id)
        })
        .await;
        match lookup {
            Ok(summary) => Ok(summary),
            Err(StorageError::TimedOut { .. }) => Err(self.timed_out()),
            Err(e) => Err(SettlementError::Storage(e)),
        }
    }

    async fn read_balances(&self, summary: &SettlementSummary) -> HashMap<UserId, Amount> {
        let users: Vec<UserId> = summary.payouts.iter().map(|p| p.user_id.clone()).collect();
        let session_id = summary.session_id;
        let reads = call_with_deadline(&self.store, self.commit_timeout, move |store| {
            load_balances(store, users)
        })
        .await;
        reads.unwrap_or_else(|e| {
            warn!("Balance reads after settling {} abandoned: {}", session_id, e);
            HashMap::new()
        })
    }

    /// Report, history entry and period totals, each with bounded retries
    fn spawn_history_writes(&self, record: GameHistoryRecord, summary: SettlementSummary) {
        let store = Arc::clone(&self.store);
        let metrics = self.metrics.clone();
        let retry = self.history_retry;
        tokio::spawn(async move {
            let period = period_key(summary.settled_at);
            let delta = PeriodTotals::from_summary(&summary);

            let report = with_retries(retry, || store.persist_settlement(&summary)).await;
            let history = with_retries(retry, || store.persist_history(&record)).await;
            let totals = with_retries(retry, || store.record_period_totals(&period, &delta)).await;

            for (what, result) in [("report", report), ("history", history), ("period totals", totals)] {
                if let Err(e) = result {
                    metrics.record_history_failure();
                    error!(
                        "Giving up on {} write for session {}: {}",
                        what, summary.session_id, e
                    );
                }
            }
        });
    }
}

async fn load_committed(
    store: Arc<dyn GameStore>,
    session_id: SessionId,
) -> Result<Option<SettlementSummary>, StorageError> {
    if !store.is_session_settled(session_id).await? {
        return Ok(None);
    }
    match store.load_settlement(session_id).await? {
        Some(summary) => Ok(Some(summary)),
        None => Err(StorageError::CorruptedData(format!(
            "settled marker for {} has no summary",
            session_id
        ))),
    }
}

/// Users whose read fails are left out
async fn load_balances(
    store: Arc<dyn GameStore>,
    users: Vec<UserId>,
) -> Result<HashMap<UserId, Amount>, StorageError> {
    let mut balances = HashMap::with_capacity(users.len());
    for user_id in users {
        match store.balance(&user_id).await {
            Ok(balance) => {
                balances.insert(user_id, balance);
            }
            Err(e) => warn!("Could not read balance for {} after settlement: {}", user_id, e),
        }
    }
    Ok(balances)
}

async fn with_retries<F, Fut>(retry: HistoryRetry, mut op: F) -> Result<(), StorageError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), StorageError>>,
{
    let attempts = retry.attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("Write attempt {}/{} failed: {}", attempt, attempts, e);
                last = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(retry.backoff * attempt).await;
                }
            }
        }
    }
    Err(last.unwrap_or_else(|| StorageError::WriteFailed("no attempts made".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::{Rank, Suit};
    use crate::storage::{MemoryStore, NewBet};
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn stakes(r1a: Amount, r1b: Amount, r2a: Amount, r2b: Amount) -> UserStakes {
        let mut s = UserStakes::default();
        s.add(Round::First, Side::Andar, r1a);
        s.add(Round::First, Side::Bahar, r1b);
        s.add(Round::Second, Side::Andar, r2a);
        s.add(Round::Second, Side::Bahar, r2b);
        s
    }

    async fn request_with(
        store: &MemoryStore,
        round: Round,
        winning_side: Side,
        users: &[(&str, UserStakes)],
    ) -> SettlementRequest {
        let session_id = Uuid::new_v4();
        let mut positions = Vec::new();
        let mut aggregate = UserStakes::default();
        for (user, s) in users {
            let mut bets = Vec::new();
            for (r, side_stakes) in [(Round::First, s.round1), (Round::Second, s.round2)] {
                for side in [Side::Andar, Side::Bahar] {
                    let amount = side_stakes.get(side);
                    if amount == 0 {
                        continue;
                    }
                    let bet_id = store
                        .record_bet(NewBet {
                            session_id,
                            user_id: user.to_string(),
                            round: r,
                            side,
                            amount,
                        })
                        .await
                        .unwrap();
                    bets.push(PlacedBet { bet_id, round: r, side, amount });
                    aggregate.add(r, side, amount);
                }
            }
            positions.push(UserPosition {
                user_id: user.to_string(),
                stakes: *s,
                bets,
            });
        }
        SettlementRequest {
            session_id,
            round,
            winning_side,
            winning_card: Card::new(Rank::Seven, Suit::Hearts),
            opening_card: Card::new(Rank::Seven, Suit::Spades),
            andar_cards: vec![],
            bahar_cards: vec![Card::new(Rank::Seven, Suit::Hearts)],
            aggregate_stakes: aggregate,
            positions,
            started_at: None,
            completed_at: Utc::now(),
        }
    }

    fn settler(store: Arc<MemoryStore>, timeout: Duration) -> Settler {
        Settler::new(
            store,
            GameMetrics::new().unwrap(),
            timeout,
            HistoryRetry {
                attempts: 2,
                backoff: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_compute_batch_splits_bets_by_side() {
        let store = MemoryStore::new();
        let request = request_with(
            &store,
            Round::First,
            Side::Andar,
            &[("alice", stakes(1000, 0, 0, 0)), ("bob", stakes(0, 500, 0, 0))],
        )
        .await;
        let batch = compute_batch(&request);
        assert_eq!(batch.credits, vec![("alice".to_string(), 2000)]);
        assert_eq!(batch.winning_bets.len(), 1);
        assert_eq!(batch.losing_bets.len(), 1);
        assert_eq!(batch.summary.total_stakes, 1500);
        assert_eq!(batch.summary.total_payouts, 2000);
        assert_eq!(batch.summary.house_profit, -500);
        let bob = batch.summary.payouts.iter().find(|p| p.user_id == "bob").unwrap();
        assert_eq!(bob.result, BetResult::Lost);
    }

    #[tokio::test]
    async fn test_settle_twice_replays() {
        let store = Arc::new(MemoryStore::new());
        let request = request_with(&store, Round::First, Side::Andar, &[("alice", stakes(1000, 0, 0, 0))]).await;
        let settler = settler(store.clone(), Duration::from_secs(5));

        let first = settler.settle(&request).await.unwrap();
        assert!(!first.replayed);
        assert_eq!(first.balances.get("alice"), Some(&2000));

        let second = settler.settle(&request).await.unwrap();
        assert!(second.replayed);
        assert_eq!(second.summary, first.summary);
        assert_eq!(store.balance("alice").await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn test_failed_commit_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let request = request_with(&store, Round::First, Side::Andar, &[("alice", stakes(1000, 0, 0, 0))]).await;
        store.faults().fail_commit.store(true, Ordering::SeqCst);
        let settler = settler(store.clone(), Duration::from_secs(5));

        let err = settler.settle(&request).await.unwrap_err();
        assert!(matches!(err, SettlementError::CommitFailed(_)));
        assert_eq!(store.balance("alice").await.unwrap(), 0);
        assert!(!store.is_session_settled(request.session_id).await.unwrap());

        store.faults().fail_commit.store(false, Ordering::SeqCst);
        let outcome = settler.settle(&request).await.unwrap();
        assert!(!outcome.replayed);
        assert_eq!(store.balance("alice").await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn test_blocked_commit_is_bounded_by_timeout() {
        let store = Arc::new(MemoryStore::new());
        let request = request_with(&store, Round::First, Side::Bahar, &[("alice", stakes(0, 100, 0, 0))]).await;
        store.faults().commit_stall_ms.store(500, Ordering::SeqCst);
        let settler = settler(store.clone(), Duration::from_millis(20));

        let started = std::time::Instant::now();
        let err = settler.settle(&request).await.unwrap_err();
        assert!(matches!(err, SettlementError::Timeout { .. }));
        assert!(
            started.elapsed() < Duration::from_millis(250),
            "settle waited {:?} on a 20ms commit timeout",
            started.elapsed()
        );
        assert_eq!(settler.metrics.settlements_with_result("aborted"), 1);

        // The stalled commit lands later; the next attempt replays it
        store.faults().commit_stall_ms.store(0, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.is_session_settled(request.session_id).await.unwrap() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let outcome = settler.settle(&request).await.unwrap();
        assert!(outcome.replayed);
        assert_eq!(store.balance("alice").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_history_written_in_background() {
        let store = Arc::new(MemoryStore::new());
        let request = request_with(&store, Round::Second, Side::Bahar, &[("alice", stakes(0, 1000, 0, 500))]).await;
        let settler = settler(store.clone(), Duration::from_secs(5));
        let outcome = settler.settle(&request).await.unwrap();
        assert_eq!(outcome.summary.total_payouts, 2500);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let history = store.recent_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].session_id, request.session_id);
        let totals = store.period_totals(&period_key(outcome.summary.settled_at)).await.unwrap();
        assert_eq!(totals.games, 1);
    }

    #[tokio::test]
    async fn test_history_failure_does_not_fail_settlement() {
        let store = Arc::new(MemoryStore::new());
        store.faults().fail_history.store(true, Ordering::SeqCst);
        let request = request_with(&store, Round::First, Side::Andar, &[("alice", stakes(100, 0, 0, 0))]).await;
        let settler = settler(store.clone(), Duration::from_secs(5));
        assert!(settler.settle(&request).await.is_ok());
        assert!(store.is_session_settled(request.session_id).await.unwrap());
    }
}
