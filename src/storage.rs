//! Ledger and bet store collaborators
//!
//! [`GameStore`] is the seam between the engine and persistence. Balance
//! debits are an atomic check-and-decrement, and [`GameStore::commit_settlement`]
//! applies every credit, every bet status change and the settled marker as
//! one unit: either all of it lands or none of it does.

use crate::errors::StorageError;
use crate::games::settlement::{SettlementBatch, SettlementSummary};
use crate::games::types::{Amount, BetId, Card, Round, Side, SessionId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
}

/// A bet about to be written to the bet store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBet {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub round: Round,
    pub side: Side,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRecord {
    pub bet_id: BetId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub round: Round,
    pub side: Side,
    pub amount: Amount,
    pub status: BetStatus,
    pub placed_at: DateTime<Utc>,
}

impl BetRecord {
    fn from_new(bet_id: BetId, bet: NewBet) -> Self {
        Self {
            bet_id,
            session_id: bet.session_id,
            user_id: bet.user_id,
            round: bet.round,
            side: bet.side,
            amount: bet.amount,
            status: BetStatus::Pending,
            placed_at: Utc::now(),
        }
    }
}

/// One finished game, as kept in the history log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameHistoryRecord {
    pub session_id: SessionId,
    pub opening_card: Card,
    pub winning_card: Card,
    pub winning_side: Side,
    pub round: Round,
    pub andar_cards: Vec<Card>,
    pub bahar_cards: Vec<Card>,
    pub total_stakes: Amount,
    pub total_payouts: Amount,
    pub house_profit: i64,
    pub player_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

/// Running totals for a reporting period (one UTC day)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub games: u64,
    pub total_stakes: Amount,
    pub total_payouts: Amount,
    pub house_profit: i64,
}

impl PeriodTotals {
    pub fn from_summary(summary: &SettlementSummary) -> Self {
        Self {
            games: 1,
            total_stakes: summary.total_stakes,
            total_payouts: summary.total_payouts,
            house_profit: summary.house_profit,
        }
    }

    pub fn merge(&mut self, other: &PeriodTotals) {
        self.games += other.games;
        self.total_stakes += other.total_stakes;
        self.total_payouts += other.total_payouts;
        self.house_profit += other.house_profit;
    }
}

/// Reporting period key for a timestamp, e.g. `2026-10-19`
pub fn period_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

#[async_trait]
pub trait GameStore: Send + Sync {
    /// Current balance; unknown users hold zero
    async fn balance(&self, user_id: &str) -> StorageResult<Amount>;

    /// Atomic check-and-decrement; returns the new balance
    async fn debit_balance(&self, user_id: &str, amount: Amount) -> StorageResult<Amount>;

    /// Returns the new balance
    async fn credit_balance(&self, user_id: &str, amount: Amount) -> StorageResult<Amount>;

    async fn record_bet(&self, bet: NewBet) -> StorageResult<BetId>;

    async fn load_bet(&self, bet_id: &str) -> StorageResult<Option<BetRecord>>;

    async fn is_session_settled(&self, session_id: SessionId) -> StorageResult<bool>;

    /// Summary written by the committed settlement, if any
    async fn load_settlement(&self, session_id: SessionId) -> StorageResult<Option<SettlementSummary>>;

    /// All credits, bet statuses and the settled marker, atomically
    async fn commit_settlement(&self, batch: &SettlementBatch) -> StorageResult<()>;

    /// Best-effort settlement report for operators
    async fn persist_settlement(&self, summary: &SettlementSummary) -> StorageResult<()>;

    async fn persist_history(&self, record: &GameHistoryRecord) -> StorageResult<()>;

    async fn record_period_totals(&self, period: &str, delta: &PeriodTotals) -> StorageResult<()>;

    async fn period_totals(&self, period: &str) -> StorageResult<PeriodTotals>;

    /// Newest first
    async fn recent_history(&self, limit: usize) -> StorageResult<Vec<GameHistoryRecord>>;
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<UserId, Amount>,
    bets: HashMap<BetId, BetRecord>,
    settled: HashMap<SessionId, SettlementSummary>,
    reports: HashMap<SessionId, SettlementSummary>,
    history: Vec<GameHistoryRecord>,
    periods: HashMap<String, PeriodTotals>,
}

/// Run a store call on the blocking pool and give up waiting after `limit`
///
/// A backend that blocks its thread cannot hold the caller past the
/// deadline. On expiry the call keeps running and its eventual result is
/// handed to `late`, so callers can reconcile a write that lands after
/// they reported [`StorageError::TimedOut`].
pub async fn call_with_deadline_then<T, F, Fut, L, LFut>(
    store: &Arc<dyn GameStore>,
    limit: Duration,
    op: F,
    late: L,
) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<dyn GameStore>) -> Fut + Send + 'static,
    Fut: Future<Output = StorageResult<T>> + Send + 'static,
    L: FnOnce(StorageResult<T>) -> LFut + Send + 'static,
    LFut: Future<Output = ()> + Send + 'static,
{
    let store = Arc::clone(store);
    let handle = Handle::current();
    let mut task = tokio::task::spawn_blocking(move || handle.block_on(op(store)));

    match tokio::time::timeout(limit, &mut task).await {
        Ok(joined) => joined.unwrap_or_else(|e| Err(join_failure(e))),
        Err(_) => {
            tokio::spawn(async move {
                let result = task.await.unwrap_or_else(|e| Err(join_failure(e)));
                late(result).await;
            });
            Err(StorageError::TimedOut {
                millis: limit.as_millis() as u64,
            })
        }
    }
}

/// [`call_with_deadline_then`] for calls whose late result needs no reconciliation
pub async fn call_with_deadline<T, F, Fut>(
    store: &Arc<dyn GameStore>,
    limit: Duration,
    op: F,
) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<dyn GameStore>) -> Fut + Send + 'static,
    Fut: Future<Output = StorageResult<T>> + Send + 'static,
{
    call_with_deadline_then(store, limit, op, |result: StorageResult<T>| async move {
        if let Err(e) = result {
            warn!("Store call failed after its deadline: {}", e);
        }
    })
    .await
}

fn join_failure(e: tokio::task::JoinError) -> StorageError {
    StorageError::Unavailable(format!("store task failed: {}", e))
}

/// Switches for exercising failure paths in tests and drills
///
/// The stall switches block the calling thread, the way a wedged disk would.
#[derive(Debug, Default)]
pub struct FaultInjection {
    pub fail_commit: AtomicBool,
    pub fail_history: AtomicBool,
    pub fail_record_bet: AtomicBool,
    pub fail_credit: AtomicBool,
    pub commit_stall_ms: AtomicU64,
    pub record_bet_stall_ms: AtomicU64,
}

fn stall(millis: &AtomicU64) {
    let millis = millis.load(Ordering::SeqCst);
    if millis > 0 {
        std::thread::sleep(Duration::from_millis(millis));
    }
}

/// In-process ledger; every commit happens under a single lock
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<LedgerState>,
    next_bet: AtomicU64,
    faults: FaultInjection,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances(balances: HashMap<UserId, Amount>) -> Self {
        let store = Self::new();
        store
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .balances = balances;
        store
    }

    pub fn faults(&self) -> &FaultInjection {
        &self.faults
    }

    pub fn seed_balance(&self, user_id: &str, amount: Amount) -> StorageResult<()> {
        self.lock()?.balances.insert(user_id.to_string(), amount);
        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable("ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn balance(&self, user_id: &str) -> StorageResult<Amount> {
        Ok(self.lock()?.balances.get(user_id).copied().unwrap_or(0))
    }

    async fn debit_balance(&self, user_id: &str, amount: Amount) -> StorageResult<Amount> {
        let mut state = self.lock()?;
        let balance = state.balances.get(user_id).copied().unwrap_or(0);
        if balance < amount {
            return Err(StorageError::InsufficientFunds {
                balance,
                requested: amount,
            });
        }
        let updated = balance - amount;
        state.balances.insert(user_id.to_string(), updated);
        Ok(updated)
    }

    async fn credit_balance(&self, user_id: &str, amount: Amount) -> StorageResult<Amount> {
        if self.faults.fail_credit.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("ledger rejected credit".to_string()));
        }
        let mut state = self.lock()?;
        let balance = state.balances.entry(user_id.to_string()).or_insert(0);
        *balance += amount;
        Ok(*balance)
    }

    async fn record_bet(&self, bet: NewBet) -> StorageResult<BetId> {
        stall(&self.faults.record_bet_stall_ms);
        if self.faults.fail_record_bet.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("bet store rejected write".to_string()));
        }
        let bet_id = format!("bet-{}", self.next_bet.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock()?
            .bets
            .insert(bet_id.clone(), BetRecord::from_new(bet_id.clone(), bet));
        Ok(bet_id)
    }

    async fn load_bet(&self, bet_id: &str) -> StorageResult<Option<BetRecord>> {
        Ok(self.lock()?.bets.get(bet_id).cloned())
    }

    async fn is_session_settled(&self, session_id: SessionId) -> StorageResult<bool> {
        Ok(self.lock()?.settled.contains_key(&session_id))
    }

    async fn load_settlement(&self, session_id: SessionId) -> StorageResult<Option<SettlementSummary>> {
        Ok(self.lock()?.settled.get(&session_id).cloned())
    }

    async fn commit_settlement(&self, batch: &SettlementBatch) -> StorageResult<()> {
        stall(&self.faults.commit_stall_ms);
        if self.faults.fail_commit.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("settlement commit rejected".to_string()));
        }

        let mut state = self.lock()?;
        if state.settled.contains_key(&batch.session_id) {
            return Err(StorageError::WriteFailed(format!(
                "session {} already settled",
                batch.session_id
            )));
        }
        if let Some(missing) = batch
            .winning_bets
            .iter()
            .chain(batch.losing_bets.iter())
            .find(|id| !state.bets.contains_key(id.as_str()))
        {
            return Err(StorageError::WriteFailed(format!("unknown bet {}", missing)));
        }

        for (user_id, amount) in &batch.credits {
            *state.balances.entry(user_id.clone()).or_insert(0) += amount;
        }
        for bet_id in &batch.winning_bets {
            if let Some(bet) = state.bets.get_mut(bet_id) {
                bet.status = BetStatus::Won;
            }
        }
        for bet_id in &batch.losing_bets {
            if let Some(bet) = state.bets.get_mut(bet_id) {
                bet.status = BetStatus::Lost;
            }
        }
        state.settled.insert(batch.session_id, batch.summary.clone());
        Ok(())
    }

    async fn persist_settlement(&self, summary: &SettlementSummary) -> StorageResult<()> {
        self.lock()?.reports.insert(summary.session_id, summary.clone());
        Ok(())
    }

    async fn persist_history(&self, record: &GameHistoryRecord) -> StorageResult<()> {
        if self.faults.fail_history.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("history log unavailable".to_string()));
        }
        self.lock()?.history.push(record.clone());
        Ok(())
    }

    async fn record_period_totals(&self, period: &str, delta: &PeriodTotals) -> StorageResult<()> {
        if self.faults.fail_history.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("period totals unavailable".to_string()));
        }
        self.lock()?
            .periods
            .entry(period.to_string())
            .or_default()
            .merge(delta);
        Ok(())
    }

    async fn period_totals(&self, period: &str) -> StorageResult<PeriodTotals> {
        Ok(self.lock()?.periods.get(period).copied().unwrap_or_default())
    }

    async fn recent_history(&self, limit: usize) -> StorageResult<Vec<GameHistoryRecord>> {
        Ok(self.lock()?.history.iter().rev().take(limit).cloned().collect())
    }
}

const BALANCE_PREFIX: &str = "ledger:balance:";
const BET_PREFIX: &str = "bet:";
const SETTLED_PREFIX: &str = "settlement:committed:";
const REPORT_PREFIX: &str = "settlement:report:";
const HISTORY_PREFIX: &[u8] = b"history:recent:";
const PERIOD_PREFIX: &str = "totals:period:";

fn balance_key(user_id: &str) -> Vec<u8> {
    format!("{}{}", BALANCE_PREFIX, user_id).into_bytes()
}

fn bet_key(bet_id: &str) -> Vec<u8> {
    format!("{}{}", BET_PREFIX, bet_id).into_bytes()
}

fn settled_key(session_id: SessionId) -> Vec<u8> {
    format!("{}{}", SETTLED_PREFIX, session_id).into_bytes()
}

fn report_key(session_id: SessionId) -> Vec<u8> {
    format!("{}{}", REPORT_PREFIX, session_id).into_bytes()
}

fn period_storage_key(period: &str) -> Vec<u8> {
    format!("{}{}", PERIOD_PREFIX, period).into_bytes()
}

fn history_key(completed_at: DateTime<Utc>, session_id: SessionId) -> Vec<u8> {
    // Newest first: inverted completion time, then the session id
    let millis = completed_at.timestamp_millis().max(0) as u64;
    let inverted = u64::MAX - millis;
    let mut key = Vec::with_capacity(HISTORY_PREFIX.len() + 8 + 16);
    key.extend_from_slice(HISTORY_PREFIX);
    key.extend_from_slice(&inverted.to_be_bytes());
    key.extend_from_slice(session_id.as_bytes());
    key
}

/// RocksDB-backed ledger and bet store
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    /// Serializes read-modify-write of balances and totals
    write_lock: Arc<Mutex<()>>,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref())
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        info!("Opened RocksDB store at {}", path.as_ref().display());
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// RocksDB calls and the write lock both block, so they run off the runtime
    async fn run_blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RocksStore) -> StorageResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(join_failure)?
    }

    fn write_guard(&self) -> StorageResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StorageError::Unavailable("write lock poisoned".to_string()))
    }

    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> StorageResult<Option<T>> {
        match self.db.get(key).map_err(|e| StorageError::ReadFailed(e.to_string()))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, key: &[u8], value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put(key, bytes)?;
        Ok(())
    }

    fn has_key(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self
            .db
            .get_pinned(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?
            .is_some())
    }

    fn read_balance(&self, user_id: &str) -> StorageResult<Amount> {
        Ok(self.get_json(&balance_key(user_id))?.unwrap_or(0))
    }

    pub fn seed_balance(&self, user_id: &str, amount: Amount) -> StorageResult<()> {
        let _guard = self.write_guard()?;
        self.put_json(&balance_key(user_id), &amount)
    }

    /// Opening balance for accounts the ledger has never seen; returns
    /// whether the account was created
    pub fn seed_balance_if_absent(&self, user_id: &str, amount: Amount) -> StorageResult<bool> {
        let _guard = self.write_guard()?;
        let key = balance_key(user_id);
        if self.get_json::<Amount>(&key)?.is_some() {
            return Ok(false);
        }
        self.put_json(&key, &amount)?;
        Ok(true)
    }

    fn debit(&self, user_id: &str, amount: Amount) -> StorageResult<Amount> {
        let _guard = self.write_guard()?;
        let balance = self.read_balance(user_id)?;
        if balance < amount {
            return Err(StorageError::InsufficientFunds {
                balance,
                requested: amount,
            });
        }
        let updated = balance - amount;
        self.put_json(&balance_key(user_id), &updated)?;
        Ok(updated)
    }

    fn credit(&self, user_id: &str, amount: Amount) -> StorageResult<Amount> {
        let _guard = self.write_guard()?;
        let updated = self.read_balance(user_id)? + amount;
        self.put_json(&balance_key(user_id), &updated)?;
        Ok(updated)
    }

    fn write_settlement(&self, batch: &SettlementBatch) -> StorageResult<()> {
        let _guard = self.write_guard()?;
        if self.has_key(&settled_key(batch.session_id))? {
            return Err(StorageError::WriteFailed(format!(
                "session {} already settled",
                batch.session_id
            )));
        }

        let mut write = WriteBatch::default();

        let mut credits: HashMap<&str, Amount> = HashMap::new();
        for (user_id, amount) in &batch.credits {
            *credits.entry(user_id.as_str()).or_insert(0) += amount;
        }
        for (user_id, amount) in credits {
            let updated = self.read_balance(user_id)? + amount;
            write.put(balance_key(user_id), serde_json::to_vec(&updated)?);
        }

        let statuses = batch
            .winning_bets
            .iter()
            .map(|id| (id, BetStatus::Won))
            .chain(batch.losing_bets.iter().map(|id| (id, BetStatus::Lost)));
        for (bet_id, status) in statuses {
            let mut record: BetRecord = self
                .get_json(&bet_key(bet_id))?
                .ok_or_else(|| StorageError::WriteFailed(format!("unknown bet {}", bet_id)))?;
            record.status = status;
            write.put(bet_key(bet_id), serde_json::to_vec(&record)?);
        }

        write.put(settled_key(batch.session_id), serde_json::to_vec(&batch.summary)?);
        self.db.write(write)?;
        debug!(
            "Committed settlement for session {} ({} credits)",
            batch.session_id,
            batch.credits.len()
        );
        Ok(())
    }

    fn merge_period_totals(&self, period: &str, delta: &PeriodTotals) -> StorageResult<()> {
        let _guard = self.write_guard()?;
        let key = period_storage_key(period);
        let mut totals: PeriodTotals = self.get_json(&key)?.unwrap_or_default();
        totals.merge(delta);
        self.put_json(&key, &totals)
    }

    fn scan_history(&self, limit: usize) -> StorageResult<Vec<GameHistoryRecord>> {
        let mut records = Vec::with_capacity(limit.min(256));
        let iter = self
            .db
            .iterator(IteratorMode::From(HISTORY_PREFIX, Direction::Forward));
        for item in iter {
            if records.len() >= limit {
                break;
            }
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(HISTORY_PREFIX) {
                break;
            }
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl GameStore for RocksStore {
    async fn balance(&self, user_id: &str) -> StorageResult<Amount> {
        let user_id = user_id.to_string();
        self.run_blocking(move |db| db.read_balance(&user_id)).await
    }

    async fn debit_balance(&self, user_id: &str, amount: Amount) -> StorageResult<Amount> {
        let user_id = user_id.to_string();
        self.run_blocking(move |db| db.debit(&user_id, amount)).await
    }

    async fn credit_balance(&self, user_id: &str, amount: Amount) -> StorageResult<Amount> {
        let user_id = user_id.to_string();
        self.run_blocking(move |db| db.credit(&user_id, amount)).await
    }

    async fn record_bet(&self, bet: NewBet) -> StorageResult<BetId> {
        self.run_blocking(move |db| {
            let bet_id = Uuid::new_v4().to_string();
            let record = BetRecord::from_new(bet_id.clone(), bet);
            db.put_json(&bet_key(&bet_id), &record)?;
            Ok(bet_id)
        })
        .await
    }

    async fn load_bet(&self, bet_id: &str) -> StorageResult<Option<BetRecord>> {
        let key = bet_key(bet_id);
        self.run_blocking(move |db| db.get_json(&key)).await
    }

    async fn is_session_settled(&self, session_id: SessionId) -> StorageResult<bool> {
        self.run_blocking(move |db| db.has_key(&settled_key(session_id))).await
    }

    async fn load_settlement(&self, session_id: SessionId) -> StorageResult<Option<SettlementSummary>> {
        self.run_blocking(move |db| db.get_json(&settled_key(session_id))).await
    }

    async fn commit_settlement(&self, batch: &SettlementBatch) -> StorageResult<()> {
        let batch = batch.clone();
        self.run_blocking(move |db| db.write_settlement(&batch)).await
    }

    async fn persist_settlement(&self, summary: &SettlementSummary) -> StorageResult<()> {
        let summary = summary.clone();
        self.run_blocking(move |db| db.put_json(&report_key(summary.session_id), &summary))
            .await
    }

    async fn persist_history(&self, record: &GameHistoryRecord) -> StorageResult<()> {
        let record = record.clone();
        self.run_blocking(move |db| {
            db.put_json(&history_key(record.completed_at, record.session_id), &record)
        })
        .await
    }

    async fn record_period_totals(&self, period: &str, delta: &PeriodTotals) -> StorageResult<()> {
        let period = period.to_string();
        let delta = *delta;
        self.run_blocking(move |db| db.merge_period_totals(&period, &delta)).await
    }

    async fn period_totals(&self, period: &str) -> StorageResult<PeriodTotals> {
        let key = period_storage_key(period);
        self.run_blocking(move |db| Ok(db.get_json(&key)?.unwrap_or_default()))
            .await
    }

    async fn recent_history(&self, limit: usize) -> StorageResult<Vec<GameHistoryRecord>> {
        self.run_blocking(move |db| db.scan_history(limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_bet(user: &str, side: Side, amount: Amount) -> NewBet {
        NewBet {
            session_id: Uuid::nil(),
            user_id: user.to_string(),
            round: Round::First,
            side,
            amount,
        }
    }

    #[tokio::test]
    async fn test_memory_debit_is_check_and_decrement() {
        let store = MemoryStore::new();
        store.seed_balance("alice", 100).unwrap();
        assert_eq!(store.debit_balance("alice", 60).await.unwrap(), 40);
        assert_eq!(
            store.debit_balance("alice", 60).await.unwrap_err(),
            StorageError::InsufficientFunds { balance: 40, requested: 60 }
        );
        assert_eq!(store.balance("alice").await.unwrap(), 40);
        assert_eq!(store.balance("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_bet_ids_are_unique() {
        let store = MemoryStore::new();
        let a = store.record_bet(new_bet("alice", Side::Andar, 10)).await.unwrap();
        let b = store.record_bet(new_bet("alice", Side::Andar, 10)).await.unwrap();
        assert_ne!(a, b);
        let record = store.load_bet(&a).await.unwrap().unwrap();
        assert_eq!(record.status, BetStatus::Pending);
    }

    #[tokio::test]
    async fn test_period_totals_accumulate() {
        let store = MemoryStore::new();
        let delta = PeriodTotals {
            games: 1,
            total_stakes: 100,
            total_payouts: 150,
            house_profit: -50,
        };
        store.record_period_totals("2026-10-19", &delta).await.unwrap();
        store.record_period_totals("2026-10-19", &delta).await.unwrap();
        let totals = store.period_totals("2026-10-19").await.unwrap();
        assert_eq!(totals.games, 2);
        assert_eq!(totals.house_profit, -100);
    }

    #[test]
    fn test_with_balances_seeds_ledger() {
        let store = MemoryStore::with_balances(HashMap::from([("alice".to_string(), 250)]));
        assert_eq!(store.lock().unwrap().balances.get("alice"), Some(&250));
    }

    #[tokio::test]
    async fn test_deadline_bounds_a_blocked_call() {
        let memory = Arc::new(MemoryStore::new());
        memory.faults().record_bet_stall_ms.store(400, Ordering::SeqCst);
        let store: Arc<dyn GameStore> = memory.clone();
        let (late_tx, late_rx) = tokio::sync::oneshot::channel();

        let started = std::time::Instant::now();
        let result = call_with_deadline_then(
            &store,
            Duration::from_millis(20),
            |store| async move { store.record_bet(new_bet("alice", Side::Andar, 10)).await },
            move |late| async move {
                let _ = late_tx.send(late);
            },
        )
        .await;
        assert_eq!(result, Err(StorageError::TimedOut { millis: 20 }));
        assert!(started.elapsed() < Duration::from_millis(300));

        // The write still lands and is handed to the late handler
        let bet_id = late_rx.await.unwrap().unwrap();
        assert!(memory.load_bet(&bet_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deadline_passes_through_prompt_results() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_balance("alice", 90).unwrap();
        let store: Arc<dyn GameStore> = memory;
        let balance = call_with_deadline(&store, Duration::from_secs(1), |store| async move {
            store.balance("alice").await
        })
        .await;
        assert_eq!(balance, Ok(90));
    }

    #[test]
    fn test_history_keys_sort_newest_first() {
        let older = history_key(Utc::now() - chrono::Duration::seconds(10), Uuid::new_v4());
        let newer = history_key(Utc::now(), Uuid::new_v4());
        assert!(newer < older);
    }
}
