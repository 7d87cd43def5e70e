//! Error types for the Andar Bahar round engine
//!
//! Every rejection that crosses the command boundary is a [`GameError`] with a
//! stable code and a category, so callers can render a precise message
//! without parsing strings.

use crate::games::types::{Amount, Phase, Round, Side};
use serde::Serialize;

/// Broad classes of failure, used for HTTP status mapping and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Bad input; rejected locally, nothing mutated
    Validation,
    /// Wrong phase or dealing order; rejected locally, nothing mutated
    Sequencing,
    /// Balance or rate exhaustion; rejected locally, nothing mutated
    Resource,
    /// Atomic payout application failed; session stays retryable
    Settlement,
    /// Storage collaborator failure outside settlement
    Persistence,
}

/// Command-boundary error returned for every rejected engine command
#[derive(Debug, Clone, thiserror::Error)]
pub enum GameError {
    #[error("{action} is not permitted for the {role} role")]
    Forbidden { action: &'static str, role: String },

    #[error("Rate limited: at most {max_bets} bets per {window_secs}s")]
    RateLimited { max_bets: u32, window_secs: u64 },

    #[error("Bet of {amount} is below the minimum of {min}")]
    BetBelowMinimum { amount: Amount, min: Amount },

    #[error("Bet of {amount} is above the maximum of {max}")]
    BetAboveMaximum { amount: Amount, max: Amount },

    #[error("Bets are not accepted for round {requested} (current round {current})")]
    WrongRound { requested: Round, current: Round },

    #[error("Betting is closed (phase {phase}, locked: {locked})")]
    BettingClosed { phase: Phase, locked: bool },

    #[error("Insufficient balance: {balance} available, {required} required")]
    InsufficientBalance { balance: Amount, required: Amount },

    #[error("Invalid side: {0}")]
    InvalidSide(String),

    #[error("Invalid card: {0}")]
    InvalidCard(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid round: {0} (rounds are 1, 2 or 3)")]
    InvalidRound(u8),

    #[error("Expected phase {expected}, but the game is in {actual}")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("Next card must be dealt to {expected}, not {actual}")]
    UnexpectedSide { expected: Side, actual: Side },

    #[error("Invalid betting timer: {seconds}s (allowed 1..={max}s)")]
    InvalidTimer { seconds: u64, max: u64 },

    #[error("Settlement failed: {0}")]
    Settlement(String),

    #[error("Settlement unresolved after {secs}s; retry required")]
    SettlementUnresolved { secs: u64 },

    #[error("Stake of {amount} for {user_id} was debited but neither recorded nor refunded")]
    StakeUnrecorded { user_id: String, amount: Amount },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Game engine is not running")]
    EngineUnavailable,
}

impl GameError {
    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            GameError::Forbidden { .. } => "FORBIDDEN",
            GameError::RateLimited { .. } => "RATE_LIMITED",
            GameError::BetBelowMinimum { .. } => "BET_BELOW_MINIMUM",
            GameError::BetAboveMaximum { .. } => "BET_ABOVE_MAXIMUM",
            GameError::WrongRound { .. } => "WRONG_ROUND",
            GameError::BettingClosed { .. } => "BETTING_CLOSED",
            GameError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            GameError::InvalidSide(_) => "INVALID_SIDE",
            GameError::InvalidCard(_) => "INVALID_CARD",
            GameError::InvalidAmount(_) => "INVALID_AMOUNT",
            GameError::InvalidRound(_) => "INVALID_ROUND",
            GameError::WrongPhase { .. } => "WRONG_PHASE",
            GameError::UnexpectedSide { .. } => "UNEXPECTED_SIDE",
            GameError::InvalidTimer { .. } => "INVALID_TIMER",
            GameError::Settlement(_) => "SETTLEMENT_FAILED",
            GameError::SettlementUnresolved { .. } => "SETTLEMENT_UNRESOLVED",
            GameError::StakeUnrecorded { .. } => "STAKE_UNRECORDED",
            GameError::Storage(StorageError::TimedOut { .. }) => "STORAGE_TIMEOUT",
            GameError::Storage(_) => "STORAGE_ERROR",
            GameError::EngineUnavailable => "ENGINE_UNAVAILABLE",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            GameError::Forbidden { .. }
            | GameError::BetBelowMinimum { .. }
            | GameError::BetAboveMaximum { .. }
            | GameError::WrongRound { .. }
            | GameError::InvalidSide(_)
            | GameError::InvalidCard(_)
            | GameError::InvalidAmount(_)
            | GameError::InvalidRound(_)
            | GameError::InvalidTimer { .. } => ErrorCategory::Validation,
            GameError::BettingClosed { .. }
            | GameError::WrongPhase { .. }
            | GameError::UnexpectedSide { .. } => ErrorCategory::Sequencing,
            GameError::RateLimited { .. } | GameError::InsufficientBalance { .. } => {
                ErrorCategory::Resource
            }
            GameError::Settlement(_) | GameError::SettlementUnresolved { .. } => {
                ErrorCategory::Settlement
            }
            GameError::StakeUnrecorded { .. } | GameError::Storage(_) | GameError::EngineUnavailable => {
                ErrorCategory::Persistence
            }
        }
    }

    /// Structured context for clients (expected side, limits, phase)
    pub fn details(&self) -> Option<serde_json::Value> {
        use serde_json::json;
        match self {
            GameError::RateLimited { max_bets, window_secs } => {
                Some(json!({ "max_bets": max_bets, "window_secs": window_secs }))
            }
            GameError::BetBelowMinimum { amount, min } => Some(json!({ "amount": amount, "min": min })),
            GameError::BetAboveMaximum { amount, max } => Some(json!({ "amount": amount, "max": max })),
            GameError::WrongRound { requested, current } => {
                Some(json!({ "requested": requested, "current": current }))
            }
            GameError::BettingClosed { phase, locked } => Some(json!({ "phase": phase, "locked": locked })),
            GameError::InsufficientBalance { balance, required } => {
                Some(json!({ "balance": balance, "required": required }))
            }
            GameError::WrongPhase { expected, actual } => {
                Some(json!({ "expected": expected, "actual": actual }))
            }
            GameError::UnexpectedSide { expected, actual } => {
                Some(json!({ "expected": expected, "actual": actual }))
            }
            GameError::InvalidTimer { seconds, max } => Some(json!({ "seconds": seconds, "max": max })),
            GameError::StakeUnrecorded { user_id, amount } => {
                Some(json!({ "user_id": user_id, "amount": amount }))
            }
            GameError::Storage(StorageError::TimedOut { millis }) => {
                Some(json!({ "timeout_ms": millis, "retryable": true }))
            }
            _ => None,
        }
    }
}

/// Failures reported by the storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Amount, requested: Amount },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The call may still complete after this is reported
    #[error("Storage call timed out after {millis}ms")]
    TimedOut { millis: u64 },
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

/// Settlement error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettlementError {
    #[error("Settlement commit timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Atomic settlement commit failed: {0}")]
    CommitFailed(StorageError),

    #[error("Settlement storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session has no winning card yet")]
    NotComplete,
}

impl From<SettlementError> for GameError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::Timeout { secs } => GameError::SettlementUnresolved { secs },
            SettlementError::NotComplete => GameError::WrongPhase {
                expected: Phase::Complete,
                actual: Phase::Dealing,
            },
            other => GameError::Settlement(other.to_string()),
        }
    }
}

/// Configuration and validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue { field: String, value: String, reason: String },

    #[error("Missing required field: {0}")]
    MissingRequired(String),
}

impl From<std::io::Error> for ConfigurationError {
    fn from(e: std::io::Error) -> Self {
        ConfigurationError::LoadFailed(e.to_string())
    }
}

impl From<toml::de::Error> for ConfigurationError {
    fn from(e: toml::de::Error) -> Self {
        ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e))
    }
}

/// Convenience alias for engine command results
pub type GameResult<T> = Result<T, GameError>;
