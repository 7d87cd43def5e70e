//! API Error Handling
//!
//! Structured error responses with HTTP status codes derived from the
//! engine's error category, plus request tracking.

use crate::errors::{ErrorCategory, GameError, StorageError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with structured information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error code (WRONG_PHASE, RATE_LIMITED, BAD_REQUEST, ...)
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    BadRequest(String),
    Unauthorized(String),
    Game(GameError),
}

impl ApiError {
    pub fn bad_request(request_id: String, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message.into()),
            request_id,
        }
    }

    pub fn unauthorized(request_id: String, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized(message.into()),
            request_id,
        }
    }

    pub fn game(request_id: String, error: GameError) -> Self {
        Self {
            kind: ApiErrorKind::Game(error),
            request_id,
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.kind {
            ApiErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiErrorKind::Game(error) => game_status(error),
        }
    }
}

/// HTTP status for an engine rejection
pub fn game_status(error: &GameError) -> StatusCode {
    match error {
        GameError::Forbidden { .. } => StatusCode::FORBIDDEN,
        GameError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GameError::EngineUnavailable | GameError::Storage(StorageError::TimedOut { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => match error.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Sequencing | ErrorCategory::Resource => StatusCode::CONFLICT,
            ErrorCategory::Settlement => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::Unauthorized(msg) => write!(f, "[{}] Unauthorized: {}", self.request_id, msg),
            ApiErrorKind::Game(error) => write!(f, "[{}] {}: {}", self.request_id, error.code(), error),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self.kind {
            ApiErrorKind::BadRequest(message) => ErrorBody {
                code: "BAD_REQUEST".to_string(),
                message,
                details: None,
            },
            ApiErrorKind::Unauthorized(message) => ErrorBody {
                code: "UNAUTHORIZED".to_string(),
                message,
                details: None,
            },
            ApiErrorKind::Game(error) => ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
                details: error.details(),
            },
        };

        (
            status,
            Json(ErrorResponse {
                request_id: self.request_id,
                error,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::{Phase, Side};

    #[test]
    fn test_status_mapping() {
        let wrong_side = GameError::UnexpectedSide {
            expected: Side::Bahar,
            actual: Side::Andar,
        };
        assert_eq!(game_status(&wrong_side), StatusCode::CONFLICT);
        assert_eq!(
            game_status(&GameError::RateLimited { max_bets: 1, window_secs: 60 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            game_status(&GameError::InvalidCard("zz".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            game_status(&GameError::WrongPhase { expected: Phase::Idle, actual: Phase::Betting }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            game_status(&GameError::SettlementUnresolved { secs: 10 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            game_status(&GameError::Storage(StorageError::TimedOut { millis: 500 })),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            game_status(&GameError::Storage(StorageError::WriteFailed("disk".to_string()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_includes_code() {
        let err = ApiError::game("req-1".to_string(), GameError::EngineUnavailable);
        assert!(err.to_string().contains("ENGINE_UNAVAILABLE"));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
