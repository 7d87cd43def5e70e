//! Game engine actor
//!
//! One task owns the [`Session`] and handles every command, timer tick and
//! reset in arrival order, so mutations never interleave. Callers talk to it
//! through the cloneable [`GameEngine`] handle; observers read the latest
//! [`SessionSnapshot`] from a watch channel or subscribe to the dispatcher.

use super::betting::{BetIntake, BetReceipt, BetRequest};
use super::events::{Dispatcher, GameEvent};
use super::round::{self, DealOutcome, TickOutcome};
use super::session::{Session, SessionSnapshot};
use super::settlement::{HistoryRetry, SettlementRequest, SettlementSummary, Settler};
use super::types::{Amount, Card, Phase, Principal, SessionId, Side, SideStakes};
use crate::config::GameConfig;
use crate::errors::{GameError, GameResult};
use crate::metrics::GameMetrics;
use crate::storage::{GameHistoryRecord, GameStore, PeriodTotals};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Most history entries a single query returns
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Messages handled by the engine actor
pub enum Message {
    Start {
        principal: Principal,
        opening_card: Card,
        timer_secs: Option<u64>,
        response: oneshot::Sender<GameResult<SessionSnapshot>>,
    },
    Deal {
        principal: Principal,
        side: Side,
        card: Card,
        response: oneshot::Sender<GameResult<DealReceipt>>,
    },
    PlaceBet {
        principal: Principal,
        request: BetRequest,
        response: oneshot::Sender<GameResult<BetReceipt>>,
    },
    LockBetting {
        principal: Principal,
        response: oneshot::Sender<GameResult<SessionSnapshot>>,
    },
    Reset {
        principal: Principal,
        response: oneshot::Sender<GameResult<SessionSnapshot>>,
    },
    RetrySettlement {
        principal: Principal,
        response: oneshot::Sender<GameResult<SettlementSummary>>,
    },
    Tick {
        session_id: SessionId,
        generation: u64,
    },
    AutoReset {
        session_id: SessionId,
    },
}

/// Settlement state reported alongside a winning deal
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementReport {
    Settled { summary: SettlementSummary },
    Failed { code: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DealReceipt {
    pub card: Card,
    pub side: Side,
    pub is_winning_card: bool,
    pub next_side: Option<Side>,
    pub snapshot: SessionSnapshot,
    pub settlement: Option<SettlementReport>,
}

/// Cloneable handle to the engine actor
#[derive(Clone)]
pub struct GameEngine {
    mailbox: mpsc::Sender<Message>,
    snapshots: watch::Receiver<SessionSnapshot>,
    dispatcher: Dispatcher,
    store: Arc<dyn GameStore>,
    metrics: GameMetrics,
}

impl GameEngine {
    /// Spawn the actor; it stops once every handle is dropped
    pub fn spawn(
        config: GameConfig,
        store: Arc<dyn GameStore>,
        dispatcher: Dispatcher,
        metrics: GameMetrics,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.server.mailbox_size.max(1));
        let session = Session::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let settler = Settler::new(
            Arc::clone(&store),
            metrics.clone(),
            config.commit_timeout(),
            HistoryRetry {
                attempts: config.settlement.history_retry_attempts,
                backoff: Duration::from_millis(config.settlement.history_retry_backoff_ms),
            },
        );
        let actor = EngineActor {
            intake: BetIntake::new(config.betting.clone(), config.store_call_timeout()),
            settler,
            config,
            session,
            store: Arc::clone(&store),
            dispatcher: dispatcher.clone(),
            metrics: metrics.clone(),
            mailbox: receiver,
            self_sender: sender.downgrade(),
            snapshots: snapshot_tx,
            timer: None,
            auto_reset: None,
        };
        let handle = tokio::spawn(actor.run());

        (
            Self {
                mailbox: sender,
                snapshots: snapshot_rx,
                dispatcher,
                store,
                metrics,
            },
            handle,
        )
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<GameResult<T>>) -> Message,
    ) -> GameResult<T> {
        let (response, receiver) = oneshot::channel();
        self.mailbox
            .send(build(response))
            .await
            .map_err(|_| GameError::EngineUnavailable)?;
        receiver.await.map_err(|_| GameError::EngineUnavailable)?
    }

    pub async fn start_game(
        &self,
        principal: Principal,
        opening_card: Card,
        timer_secs: Option<u64>,
    ) -> GameResult<SessionSnapshot> {
        self.request(|response| Message::Start {
            principal,
            opening_card,
            timer_secs,
            response,
        })
        .await
    }

    pub async fn deal_card(&self, principal: Principal, side: Side, card: Card) -> GameResult<DealReceipt> {
        self.request(|response| Message::Deal {
            principal,
            side,
            card,
            response,
        })
        .await
    }

    pub async fn place_bet(&self, principal: Principal, request: BetRequest) -> GameResult<BetReceipt> {
        self.request(|response| Message::PlaceBet {
            principal,
            request,
            response,
        })
        .await
    }

    /// Close the betting window now instead of waiting for the timer
    pub async fn lock_betting(&self, principal: Principal) -> GameResult<SessionSnapshot> {
        self.request(|response| Message::LockBetting { principal, response })
            .await
    }

    pub async fn reset_game(&self, principal: Principal) -> GameResult<SessionSnapshot> {
        self.request(|response| Message::Reset { principal, response })
            .await
    }

    pub async fn retry_settlement(&self, principal: Principal) -> GameResult<SettlementSummary> {
        self.request(|response| Message::RetrySettlement { principal, response })
            .await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &GameMetrics {
        &self.metrics
    }

    /// Players may only read their own balance
    pub async fn balance(&self, principal: &Principal, user_id: &str) -> GameResult<Amount> {
        if !principal.is_operator() && principal.user_id != user_id {
            return Err(GameError::Forbidden {
                action: "read_balance",
                role: principal.role.to_string(),
            });
        }
        Ok(self.store.balance(user_id).await?)
    }

    pub async fn history(&self, limit: usize) -> GameResult<Vec<GameHistoryRecord>> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.store.recent_history(limit).await?)
    }

    pub async fn period_totals(&self, principal: &Principal, period: &str) -> GameResult<PeriodTotals> {
        require_operator(principal, "read_period_totals")?;
        Ok(self.store.period_totals(period).await?)
    }
}

fn require_operator(principal: &Principal, action: &'static str) -> GameResult<()> {
    if principal.is_operator() {
        Ok(())
    } else {
        Err(GameError::Forbidden {
            action,
            role: principal.role.to_string(),
        })
    }
}

struct EngineActor {
    config: GameConfig,
    session: Session,
    store: Arc<dyn GameStore>,
    intake: BetIntake,
    settler: Settler,
    dispatcher: Dispatcher,
    metrics: GameMetrics,
    mailbox: mpsc::Receiver<Message>,
    self_sender: mpsc::WeakSender<Message>,
    snapshots: watch::Sender<SessionSnapshot>,
    timer: Option<JoinHandle<()>>,
    auto_reset: Option<JoinHandle<()>>,
}

impl EngineActor {
    async fn run(mut self) {
        info!("Game engine started with session {}", self.session.id());
        let prune_every = self.config.rate_limit_window();
        let mut prune = interval_at(Instant::now() + prune_every, prune_every);

        loop {
            tokio::select! {
                message = self.mailbox.recv() => {
                    let Some(message) = message else { break };
                    self.handle(message).await;
                    self.snapshots.send_replace(self.session.snapshot());
                }
                _ = prune.tick() => self.intake.prune_rate_limits(),
            }
        }

        self.cancel_timer();
        if let Some(task) = self.auto_reset.take() {
            task.abort();
        }
        info!("Game engine stopped");
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Start {
                principal,
                opening_card,
                timer_secs,
                response,
            } => {
                let result = self.start(&principal, opening_card, timer_secs);
                self.reply(response, result);
            }
            Message::Deal {
                principal,
                side,
                card,
                response,
            } => {
                let result = self.deal(&principal, side, card).await;
                self.reply(response, result);
            }
            Message::PlaceBet {
                principal,
                request,
                response,
            } => {
                let result = self.place_bet(&principal, &request).await;
                self.reply(response, result);
            }
            Message::LockBetting { principal, response } => {
                let result = self.lock_betting(&principal);
                self.reply(response, result);
            }
            Message::Reset { principal, response } => {
                let result = self.reset(&principal);
                self.reply(response, result);
            }
            Message::RetrySettlement { principal, response } => {
                let result = self.retry_settlement(&principal).await;
                self.reply(response, result);
            }
            Message::Tick {
                session_id,
                generation,
            } => self.tick(session_id, generation),
            Message::AutoReset { session_id } => {
                if session_id == self.session.id()
                    && self.session.phase() == Phase::Complete
                    && self.session.is_settled()
                {
                    info!("Auto-resetting settled session {}", session_id);
                    self.replace_session();
                } else {
                    debug!("Ignoring stale auto-reset for {}", session_id);
                }
            }
        }
    }

    /// Publish the post-command snapshot before the caller sees the result
    fn reply<T>(&self, response: oneshot::Sender<GameResult<T>>, result: GameResult<T>) {
        self.snapshots.send_replace(self.session.snapshot());
        let _ = response.send(result);
    }

    fn start(&mut self, principal: &Principal, opening_card: Card, timer_secs: Option<u64>) -> GameResult<SessionSnapshot> {
        require_operator(principal, "start_game")?;
        let timer_secs = timer_secs.unwrap_or(self.config.timer.default_betting_secs);
        if timer_secs == 0 || timer_secs > self.config.timer.max_betting_secs {
            return Err(GameError::InvalidTimer {
                seconds: timer_secs,
                max: self.config.timer.max_betting_secs,
            });
        }

        round::start(&mut self.session, opening_card, timer_secs)?;
        info!(
            "Session {} started by {}: opening card {}, {}s betting",
            self.session.id(),
            principal.user_id,
            opening_card,
            timer_secs
        );

        self.dispatcher.broadcast(GameEvent::OpeningCardConfirmed {
            session_id: self.session.id(),
            opening_card,
            timer_seconds: timer_secs,
        });
        self.announce_phase("Betting open for round 1");
        self.open_betting_window();
        Ok(self.session.snapshot())
    }

    /// Start the countdown for the betting window that was just opened
    fn open_betting_window(&mut self) {
        if round::enforce_lock_margin(&mut self.session, self.config.timer.lock_margin_secs) {
            self.dispatcher.broadcast(GameEvent::BettingLocked {
                round: self.session.round(),
                seconds_left: self.session.timer_remaining(),
            });
        }
        self.start_timer();
    }

    fn start_timer(&mut self) {
        self.cancel_timer();
        let sender = self.self_sender.clone();
        let session_id = self.session.id();
        let generation = self.session.timer_generation();
        let period = self.config.tick_interval();

        self.timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(sender) = sender.upgrade() else { break };
                if sender
                    .send(Message::Tick {
                        session_id,
                        generation,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn tick(&mut self, session_id: SessionId, generation: u64) {
        if session_id != self.session.id() || generation != self.session.timer_generation() {
            debug!("Ignoring stale tick (generation {})", generation);
            return;
        }
        let outcome = match round::tick(&mut self.session, self.config.timer.lock_margin_secs) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Timer tick rejected: {}", e);
                self.cancel_timer();
                return;
            }
        };

        self.dispatcher.broadcast(GameEvent::TimerUpdate {
            seconds: self.session.timer_remaining(),
            phase: self.session.phase(),
            round: self.session.round(),
            betting_locked: self.session.betting_locked(),
        });
        match outcome {
            TickOutcome::Running { .. } | TickOutcome::LockedRunning { .. } => {}
            TickOutcome::Locked { remaining } => {
                info!("Betting locked for round {} ({}s left)", self.session.round(), remaining);
                self.dispatcher.broadcast(GameEvent::BettingLocked {
                    round: self.session.round(),
                    seconds_left: remaining,
                });
            }
            TickOutcome::Expired => {
                self.cancel_timer();
                info!("Betting closed for round {}", self.session.round());
                self.announce_phase("Betting closed, dealing cards");
            }
        }
    }

    fn lock_betting(&mut self, principal: &Principal) -> GameResult<SessionSnapshot> {
        require_operator(principal, "lock_betting")?;
        round::close_betting(&mut self.session)?;
        self.cancel_timer();
        info!(
            "Betting for round {} closed early by {}",
            self.session.round(),
            principal.user_id
        );
        self.announce_phase("Betting closed by operator, dealing cards");
        Ok(self.session.snapshot())
    }

    async fn deal(&mut self, principal: &Principal, side: Side, card: Card) -> GameResult<DealReceipt> {
        require_operator(principal, "deal_card")?;
        let outcome = round::deal(&mut self.session, side, card)?;
        self.metrics.record_card_dealt();
        let is_winning_card = matches!(outcome, DealOutcome::Winner(_));
        debug!("Dealt {} to {} (winner: {})", card, side, is_winning_card);

        self.dispatcher.broadcast(GameEvent::CardDealt {
            card,
            side,
            is_winning_card,
            andar_count: self.session.cards(Side::Andar).len(),
            bahar_count: self.session.cards(Side::Bahar).len(),
            next_side: self.session.next_expected_side(),
        });

        let mut settlement = None;
        match outcome {
            DealOutcome::Winner(winner) => {
                info!(
                    "Session {} complete: {} wins with {} in round {}",
                    self.session.id(),
                    winner.side,
                    winner.card,
                    winner.round
                );
                self.announce_phase(&format!("{} wins", winner.side));
                settlement = Some(match self.settle_current().await {
                    Ok(summary) => SettlementReport::Settled { summary },
                    Err(e) => SettlementReport::Failed {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    },
                });
            }
            DealOutcome::Continue { .. } => {}
            DealOutcome::BettingReopened { round, timer_secs } => {
                info!("Round {} betting open for {}s", round, timer_secs);
                self.announce_phase("Betting open for round 2");
                self.open_betting_window();
            }
            DealOutcome::ContinuousDraw { .. } => {
                info!("Session {} moves to continuous draw", self.session.id());
                self.announce_phase("Round 3: dealing until a match");
            }
        }

        Ok(DealReceipt {
            card,
            side,
            is_winning_card,
            next_side: self.session.next_expected_side(),
            snapshot: self.session.snapshot(),
            settlement,
        })
    }

    async fn place_bet(&mut self, principal: &Principal, request: &BetRequest) -> GameResult<BetReceipt> {
        match self
            .intake
            .place(principal, request, &mut self.session, Arc::clone(&self.store))
            .await
        {
            Ok(receipt) => {
                self.metrics.record_bet("accepted");
                self.dispatcher.to_user(
                    principal.user_id.clone(),
                    GameEvent::BetConfirmed {
                        bet_id: receipt.bet_id.clone(),
                        side: receipt.side,
                        round: receipt.round,
                        amount: receipt.amount,
                        new_balance: receipt.new_balance,
                    },
                );
                self.dispatcher.broadcast(GameEvent::BettingStats {
                    round: receipt.round,
                    stakes: *self.session.aggregate_stakes(),
                });
                Ok(receipt)
            }
            Err(e) => {
                self.metrics.record_bet(e.code());
                if let GameError::StakeUnrecorded { .. } = e {
                    self.metrics.record_operator_alert("stake_unrecorded");
                }
                debug!("Bet from {} rejected: {}", principal.user_id, e);
                Err(e)
            }
        }
    }

    fn reset(&mut self, principal: &Principal) -> GameResult<SessionSnapshot> {
        require_operator(principal, "reset_game")?;
        match self.session.phase() {
            Phase::Betting | Phase::Dealing => {
                return Err(GameError::WrongPhase {
                    expected: Phase::Complete,
                    actual: self.session.phase(),
                })
            }
            Phase::Complete if !self.session.is_settled() => {
                warn!(
                    "Resetting session {} before settlement succeeded; staked funds stay debited",
                    self.session.id()
                );
            }
            _ => {}
        }
        self.replace_session();
        Ok(self.session.snapshot())
    }

    fn replace_session(&mut self) {
        self.cancel_timer();
        if let Some(task) = self.auto_reset.take() {
            task.abort();
        }
        let previous = self.session.id();
        self.session = Session::new();
        info!("Session {} replaced by {}", previous, self.session.id());
        self.dispatcher.broadcast(GameEvent::GameReset {
            previous_session_id: previous,
            session_id: self.session.id(),
        });
        self.announce_phase("Waiting for the opening card");
    }

    async fn retry_settlement(&mut self, principal: &Principal) -> GameResult<SettlementSummary> {
        require_operator(principal, "retry_settlement")?;
        if self.session.phase() != Phase::Complete {
            return Err(GameError::WrongPhase {
                expected: Phase::Complete,
                actual: self.session.phase(),
            });
        }
        info!("Settlement retry for session {} requested by {}", self.session.id(), principal.user_id);
        self.settle_current().await
    }

    async fn settle_current(&mut self) -> GameResult<SettlementSummary> {
        let request = SettlementRequest::from_session(&self.session)?;
        let first_success = !self.session.is_settled();

        match self.settler.settle(&request).await {
            Ok(outcome) => {
                self.session.mark_settled(&outcome.summary);
                if first_success {
                    self.notify_settlement(&outcome.summary, &outcome.balances);
                    self.schedule_auto_reset();
                }
                Ok(outcome.summary)
            }
            Err(e) => {
                let err: GameError = e.into();
                error!("Settlement of session {} aborted: {}", request.session_id, err);
                self.session.mark_settlement_failed(err.code(), err.to_string());
                self.dispatcher.to_operators(GameEvent::SettlementAlert {
                    session_id: request.session_id,
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn notify_settlement(&self, summary: &SettlementSummary, balances: &HashMap<String, Amount>) {
        for payout in &summary.payouts {
            self.dispatcher.to_user(
                payout.user_id.clone(),
                GameEvent::PayoutReceived {
                    session_id: summary.session_id,
                    amount: payout.payout,
                    staked: payout.staked,
                    new_balance: balances.get(&payout.user_id).copied(),
                    round: summary.round,
                    result: payout.result,
                },
            );
        }
        self.dispatcher.broadcast(GameEvent::GameComplete {
            session_id: summary.session_id,
            winner: summary.winning_side,
            winning_card: summary.winning_card,
            round: summary.round,
            total_stakes: summary.total_stakes,
            total_payouts: summary.total_payouts,
        });
        self.dispatcher.to_operators(GameEvent::HouseSummary {
            session_id: summary.session_id,
            round: summary.round,
            total_stakes: summary.total_stakes,
            total_payouts: summary.total_payouts,
            house_profit: summary.house_profit,
            stakes_by_side: SideStakes {
                andar: summary.stakes.on_side(Side::Andar),
                bahar: summary.stakes.on_side(Side::Bahar),
            },
        });
    }

    fn schedule_auto_reset(&mut self) {
        let Some(delay) = self.config.settlement.auto_reset_delay_secs else {
            return;
        };
        let sender = self.self_sender.clone();
        let session_id = self.session.id();
        self.auto_reset = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(Message::AutoReset { session_id }).await;
            }
        }));
    }

    fn announce_phase(&self, message: &str) {
        self.dispatcher.broadcast(GameEvent::PhaseChange {
            phase: self.session.phase(),
            round: self.session.round(),
            message: message.to_string(),
        });
    }
}
