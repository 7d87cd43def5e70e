//! Request Handlers
//!
//! Thin adapters from HTTP to the engine handle. Every command handler
//! resolves the caller from the gateway headers and forwards to the actor;
//! rejections come back as structured [`ApiError`]s.

use super::{
    errors::ApiError,
    middleware::{principal_from_headers, RequestId},
    models::*,
    websocket::WebSocketManager,
};
use crate::games::{
    engine::{DealReceipt, GameEngine},
    BetReceipt, SessionSnapshot, SettlementSummary,
};
use crate::storage::{period_key, GameHistoryRecord, PeriodTotals};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub engine: GameEngine,
    pub version: String,
    pub websocket_manager: Arc<WebSocketManager>,
}

impl AppState {
    pub fn new(engine: GameEngine) -> Self {
        Self {
            websocket_manager: Arc::new(WebSocketManager::new(engine.clone())),
            engine,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.engine.snapshot();
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        session_id: snapshot.session_id,
        phase: snapshot.phase,
    })
}

/// Prometheus text exposition
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.engine.metrics().render(),
    )
}

/// GET /api/game/state
pub async fn game_state_handler(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.engine.snapshot())
}

/// GET /api/balance/:user_id
pub async fn balance_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let principal = principal_from_headers(&headers, &request_id.0)?;
    let balance = state
        .engine
        .balance(&principal, &user_id)
        .await
        .map_err(|e| ApiError::game(request_id.0, e))?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// GET /api/history?limit={n}
pub async fn history_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<GameHistoryRecord>>, ApiError> {
    let history = state
        .engine
        .history(params.limit)
        .await
        .map_err(|e| ApiError::game(request_id.0, e))?;
    Ok(Json(history))
}

/// Operator-only house totals for one day
/// GET /api/house/totals?period=YYYY-MM-DD
pub async fn period_totals_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<TotalsQuery>,
) -> Result<Json<PeriodTotals>, ApiError> {
    let principal = principal_from_headers(&headers, &request_id.0)?;
    let period = params.period.unwrap_or_else(|| period_key(Utc::now()));
    let totals = state
        .engine
        .period_totals(&principal, &period)
        .await
        .map_err(|e| ApiError::game(request_id.0, e))?;
    Ok(Json(totals))
}

/// POST /api/game/start
pub async fn start_game_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartGameRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let principal = principal_from_headers(&headers, &request_id.0)?;
    let result = match parse_card(&body.opening_card) {
        Ok(card) => state.engine.start_game(principal, card, body.timer_seconds).await,
        Err(e) => Err(e),
    };
    result.map(Json).map_err(|e| ApiError::game(request_id.0, e))
}

/// POST /api/game/deal
pub async fn deal_card_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DealCardRequest>,
) -> Result<Json<DealReceipt>, ApiError> {
    let principal = principal_from_headers(&headers, &request_id.0)?;
    let parsed = parse_side(&body.side).and_then(|side| Ok((side, parse_card(&body.card)?)));
    let result = match parsed {
        Ok((side, card)) => state.engine.deal_card(principal, side, card).await,
        Err(e) => Err(e),
    };
    result.map(Json).map_err(|e| ApiError::game(request_id.0, e))
}

/// POST /api/game/bet
pub async fn place_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PlaceBetRequest>,
) -> Result<Json<BetReceipt>, ApiError> {
    let principal = principal_from_headers(&headers, &request_id.0)?;
    let result = match body.into_bet_request() {
        Ok(request) => state.engine.place_bet(principal, request).await,
        Err(e) => Err(e),
    };
    result.map(Json).map_err(|e| ApiError::game(request_id.0, e))
}

/// POST /api/game/lock
pub async fn lock_betting_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let principal = principal_from_headers(&headers, &request_id.0)?;
    state
        .engine
        .lock_betting(principal)
        .await
        .map(Json)
        .map_err(|e| ApiError::game(request_id.0, e))
}

/// POST /api/game/reset
pub async fn reset_game_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let principal = principal_from_headers(&headers, &request_id.0)?;
    state
        .engine
        .reset_game(principal)
        .await
        .map(Json)
        .map_err(|e| ApiError::game(request_id.0, e))
}

/// Re-run settlement for a completed session; replays if already committed
/// POST /api/game/settle
pub async fn retry_settlement_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SettlementSummary>, ApiError> {
    let principal = principal_from_headers(&headers, &request_id.0)?;
    state
        .engine
        .retry_settlement(principal)
        .await
        .map(Json)
        .map_err(|e| ApiError::game(request_id.0, e))
}
