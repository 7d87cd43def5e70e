//! API Request and Response Models
//!
//! Wire types shared by the HTTP handlers and the WebSocket command channel.
//! Cards, sides and amounts arrive as loose JSON and are parsed here so
//! that malformed input is rejected with the engine's own error codes.

use crate::errors::{GameError, GameResult};
use crate::games::betting::BetRequest;
use crate::games::types::{Amount, Card, Phase, Round, SessionId, Side, UserId};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub session_id: SessionId,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: Amount,
}

/// POST /api/game/start
#[derive(Debug, Clone, Deserialize)]
pub struct StartGameRequest {
    pub opening_card: String,
    #[serde(default)]
    pub timer_seconds: Option<u64>,
}

/// POST /api/game/deal
#[derive(Debug, Clone, Deserialize)]
pub struct DealCardRequest {
    pub side: String,
    pub card: String,
}

/// POST /api/game/bet
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceBetRequest {
    pub side: String,
    pub amount: serde_json::Value,
    #[serde(default)]
    pub round: Option<u8>,
}

impl PlaceBetRequest {
    pub fn into_bet_request(self) -> GameResult<BetRequest> {
        Ok(BetRequest {
            side: parse_side(&self.side)?,
            amount: parse_amount(&self.amount)?,
            round: parse_round(self.round)?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct TotalsQuery {
    /// `YYYY-MM-DD`; defaults to today (UTC)
    #[serde(default)]
    pub period: Option<String>,
}

pub fn parse_card(raw: &str) -> GameResult<Card> {
    raw.parse().map_err(GameError::InvalidCard)
}

pub fn parse_side(raw: &str) -> GameResult<Side> {
    raw.parse().map_err(GameError::InvalidSide)
}

/// Amounts must be positive whole numbers
pub fn parse_amount(value: &serde_json::Value) -> GameResult<Amount> {
    match value.as_u64() {
        Some(0) => Err(GameError::InvalidAmount("amount must be positive".to_string())),
        Some(amount) => Ok(amount),
        None => Err(GameError::InvalidAmount(format!(
            "{} is not a positive whole number",
            value
        ))),
    }
}

pub fn parse_round(raw: Option<u8>) -> GameResult<Option<Round>> {
    raw.map(|n| Round::try_from(n).map_err(|_| GameError::InvalidRound(n)))
        .transpose()
}
