//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Read side
        .route("/api/game/state", get(game_state_handler))
        .route("/api/balance/:user_id", get(balance_handler))
        .route("/api/history", get(history_handler))
        .route("/api/house/totals", get(period_totals_handler))
        // Commands
        .route("/api/game/start", post(start_game_handler))
        .route("/api/game/deal", post(deal_card_handler))
        .route("/api/game/bet", post(place_bet_handler))
        .route("/api/game/lock", post(lock_betting_handler))
        .route("/api/game/reset", post(reset_game_handler))
        .route("/api/game/settle", post(retry_settlement_handler))
        // Real-time events and commands
        .route("/ws", get(websocket_handler))
        .with_state(state)
}
