//! Bet intake
//!
//! Guards run in a fixed order: role, rate limit, amount and round, phase,
//! then balance. The first failing guard decides the rejection and nothing
//! is debited. Once every guard passes the stake is debited from the
//! ledger, recorded in the bet store and added to the session. Each store
//! call runs under the configured deadline so a stalled backend cannot hold
//! the engine.

use super::rate_limit::SlidingWindowLimiter;
use super::session::{PlacedBet, Session};
use super::types::{Amount, BetId, Phase, Principal, Round, Side, UserStakes};
use crate::config::BettingConfig;
use crate::errors::{GameError, GameResult, StorageError};
use crate::storage::{call_with_deadline, call_with_deadline_then, GameStore, NewBet, StorageResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A player's request to stake on a side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRequest {
    pub side: Side,
    pub amount: Amount,
    /// Round the player believes is open; defaults to the current round
    pub round: Option<Round>,
}

/// Receipt for an accepted bet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetReceipt {
    pub bet_id: BetId,
    pub user_id: String,
    pub round: Round,
    pub side: Side,
    pub amount: Amount,
    pub new_balance: Amount,
    pub position: UserStakes,
}

pub struct BetIntake {
    config: BettingConfig,
    limiter: SlidingWindowLimiter,
    store_timeout: Duration,
}

impl BetIntake {
    pub fn new(config: BettingConfig, store_timeout: Duration) -> Self {
        let limiter = SlidingWindowLimiter::new(
            config.rate_limit_max_bets,
            Duration::from_secs(config.rate_limit_window_secs),
        );
        Self {
            config,
            limiter,
            store_timeout,
        }
    }

    /// Guards 1-4; balance is checked against the ledger afterwards
    pub fn check(&self, principal: &Principal, request: &BetRequest, session: &Session, now: Instant) -> GameResult<Round> {
        if principal.is_operator() {
            return Err(GameError::Forbidden {
                action: "place_bet",
                role: principal.role.to_string(),
            });
        }

        if !self.limiter.try_acquire(&principal.user_id, now) {
            return Err(GameError::RateLimited {
                max_bets: self.limiter.max_bets(),
                window_secs: self.limiter.window().as_secs(),
            });
        }

        if request.amount < self.config.min_bet {
            return Err(GameError::BetBelowMinimum {
                amount: request.amount,
                min: self.config.min_bet,
            });
        }
        if request.amount > self.config.max_bet {
            return Err(GameError::BetAboveMaximum {
                amount: request.amount,
                max: self.config.max_bet,
            });
        }
        let requested = request.round.unwrap_or(session.round());
        if !requested.accepts_bets() || requested != session.round() {
            return Err(GameError::WrongRound {
                requested,
                current: session.round(),
            });
        }

        if session.phase() != Phase::Betting || session.betting_locked() {
            return Err(GameError::BettingClosed {
                phase: session.phase(),
                locked: session.betting_locked(),
            });
        }

        Ok(requested)
    }

    /// Run every guard, then debit, record and apply the stake
    pub async fn place(
        &self,
        principal: &Principal,
        request: &BetRequest,
        session: &mut Session,
        store: Arc<dyn GameStore>,
    ) -> GameResult<BetReceipt> {
        let round = self.check(principal, request, session, Instant::now())?;
        let user_id = principal.user_id.as_str();
        let amount = request.amount;
        let limit = self.store_timeout;

        // The ledger already nets out earlier stakes, so the live balance is the whole check.
        let user = user_id.to_string();
        let balance = call_with_deadline(&store, limit, move |store| async move {
            store.balance(&user).await
        })
        .await?;
        if balance < amount {
            return Err(GameError::InsufficientBalance {
                balance,
                required: amount,
            });
        }

        let user = user_id.to_string();
        let late_user = user_id.to_string();
        let late_store = Arc::clone(&store);
        let debited = call_with_deadline_then(
            &store,
            limit,
            move |store| async move { store.debit_balance(&user, amount).await },
            move |late| reverse_late_debit(late_store, late_user, amount, late),
        )
        .await;
        let new_balance = match debited {
            Ok(updated) => updated,
            Err(StorageError::InsufficientFunds { balance, requested }) => {
                return Err(GameError::InsufficientBalance {
                    balance,
                    required: requested,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let bet = NewBet {
            session_id: session.id(),
            user_id: user_id.to_string(),
            round,
            side: request.side,
            amount,
        };
        let late_user = user_id.to_string();
        let recorded = call_with_deadline_then(
            &store,
            limit,
            move |store| async move { store.record_bet(bet).await },
            move |late| async move {
                if let Ok(bet_id) = late {
                    warn!(
                        "Bet record {} for {} landed after its deadline; the stake was refunded and the record stays pending",
                        bet_id, late_user
                    );
                }
            },
        )
        .await;
        let bet_id = match recorded {
            Ok(id) => id,
            Err(e) => {
                warn!("Recording bet for {} failed, refunding stake: {}", user_id, e);
                let user = user_id.to_string();
                let refund = call_with_deadline(&store, limit, move |store| async move {
                    store.credit_balance(&user, amount).await
                })
                .await;
                if let Err(refund) = refund {
                    error!(
                        "Refund of {} to {} failed after bet store error ({}): {}",
                        amount, user_id, e, refund
                    );
                    return Err(GameError::StakeUnrecorded {
                        user_id: user_id.to_string(),
                        amount,
                    });
                }
                return Err(e.into());
            }
        };

        let position = session.record_stake(
            user_id,
            PlacedBet {
                bet_id: bet_id.clone(),
                round,
                side: request.side,
                amount: request.amount,
            },
        );
        info!(
            "Bet {} accepted: {} staked {} on {} in round {}",
            bet_id, user_id, request.amount, request.side, round
        );

        Ok(BetReceipt {
            bet_id,
            user_id: user_id.to_string(),
            round,
            side: request.side,
            amount: request.amount,
            new_balance,
            position,
        })
    }

    pub fn prune_rate_limits(&self) {
        self.limiter.prune(Instant::now());
    }
}

/// A debit that lands after its deadline never became a bet
async fn reverse_late_debit(
    store: Arc<dyn GameStore>,
    user_id: String,
    amount: Amount,
    late: StorageResult<Amount>,
) {
    if late.is_err() {
        return;
    }
    match store.credit_balance(&user_id, amount).await {
        Ok(_) => warn!("Reversed a debit of {} for {} that landed after its deadline", amount, user_id),
        Err(e) => error!("Could not reverse late debit of {} for {}: {}", amount, user_id, e),
    }
}
