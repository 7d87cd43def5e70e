//! WebSocket Support for Real-time Game Events
//!
//! Each connection gets the current session snapshot on connect, then every
//! dispatcher event its principal may see. Clients may also send commands
//! (`start_game`, `deal_card`, `place_bet`, ...) tagged with an optional
//! `request_id`; each is answered with an `ack` or `error` frame.

use super::errors::ApiError;
use super::handlers::AppState;
use super::middleware::RequestId;
use super::models::{parse_amount, parse_card, parse_round, parse_side};
use crate::errors::{GameError, GameResult};
use crate::games::betting::BetRequest;
use crate::games::engine::GameEngine;
use crate::games::events::{Envelope, GameEvent};
use crate::games::types::{Principal, Role};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Connection parameters; browsers cannot set custom headers on upgrade
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Inbound command frame
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub command: ClientCommand,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    StartGame {
        opening_card: String,
        #[serde(default)]
        timer_seconds: Option<u64>,
    },
    DealCard {
        side: String,
        card: String,
    },
    PlaceBet {
        side: String,
        amount: serde_json::Value,
        #[serde(default)]
        round: Option<u8>,
    },
    LockBetting,
    ResetGame,
    RetrySettlement,
    GetState,
    GetBalance,
}

impl ClientCommand {
    fn name(&self) -> &'static str {
        match self {
            ClientCommand::StartGame { .. } => "start_game",
            ClientCommand::DealCard { .. } => "deal_card",
            ClientCommand::PlaceBet { .. } => "place_bet",
            ClientCommand::LockBetting => "lock_betting",
            ClientCommand::ResetGame => "reset_game",
            ClientCommand::RetrySettlement => "retry_settlement",
            ClientCommand::GetState => "get_state",
            ClientCommand::GetBalance => "get_balance",
        }
    }
}

/// Direct reply to a client command
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsReply {
    Ack {
        request_id: Option<String>,
        command: &'static str,
        result: serde_json::Value,
    },
    Error {
        request_id: Option<String>,
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

impl WsReply {
    fn from_error(request_id: Option<String>, error: &GameError) -> Self {
        WsReply::Error {
            request_id,
            code: error.code().to_string(),
            message: error.to_string(),
            details: error.details(),
        }
    }
}

/// WebSocket connection manager
#[derive(Clone)]
pub struct WebSocketManager {
    engine: GameEngine,
}

impl WebSocketManager {
    pub fn new(engine: GameEngine) -> Self {
        Self { engine }
    }

    pub fn client_count(&self) -> i64 {
        self.engine.metrics().ws_clients()
    }

    pub fn handle_upgrade(&self, ws: WebSocketUpgrade, principal: Principal) -> Response {
        let manager = self.clone();
        ws.on_upgrade(move |socket| async move { manager.handle_connection(socket, principal).await })
    }

    async fn handle_connection(&self, socket: WebSocket, principal: Principal) {
        let metrics = self.engine.metrics().clone();
        metrics.ws_client_connected();
        info!(
            "WebSocket client {} ({}) connected (total: {})",
            principal.user_id,
            principal.role,
            metrics.ws_clients()
        );

        let (mut sender, mut receiver) = socket.split();
        let mut events = self.engine.dispatcher().subscribe();
        let (reply_tx, mut reply_rx) = mpsc::channel::<String>(64);

        if send_json(&mut sender, &snapshot_event(&self.engine)).await.is_err() {
            warn!("Failed to send snapshot to {}", principal.user_id);
            metrics.ws_client_disconnected();
            return;
        }

        let engine = self.engine.clone();
        let send_principal = principal.clone();
        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(envelope) => {
                            if !envelope.is_visible_to(&send_principal) {
                                continue;
                            }
                            if forward(&mut sender, &envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Client {} lagged by {} events; resending snapshot", send_principal.user_id, skipped);
                            if send_json(&mut sender, &snapshot_event(&engine)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    reply = reply_rx.recv() => match reply {
                        Some(text) => {
                            if sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let engine = self.engine.clone();
        let recv_principal = principal.clone();
        let mut receive_task = tokio::spawn(async move {
            while let Some(message) = receiver.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let reply = handle_text(&engine, &recv_principal, &text).await;
                        let Ok(encoded) = serde_json::to_string(&reply) else { continue };
                        if reply_tx.send(encoded).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Client {} requested close", recv_principal.user_id);
                        break;
                    }
                    Err(e) => {
                        warn!("WebSocket error from {}: {}", recv_principal.user_id, e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => receive_task.abort(),
            _ = &mut receive_task => send_task.abort(),
        }

        metrics.ws_client_disconnected();
        info!(
            "WebSocket client {} disconnected (remaining: {})",
            principal.user_id,
            metrics.ws_clients()
        );
    }
}

fn snapshot_event(engine: &GameEngine) -> GameEvent {
    GameEvent::Snapshot {
        snapshot: engine.snapshot(),
    }
}

async fn forward<S>(sender: &mut S, envelope: &Envelope) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    send_json(sender, &envelope.event).await
}

async fn send_json<S, T>(sender: &mut S, value: &T) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
    T: Serialize,
{
    let text = serde_json::to_string(value).map_err(|e| warn!("Failed to encode event: {}", e))?;
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

/// Parse and execute one inbound frame
pub async fn handle_text(engine: &GameEngine, principal: &Principal, text: &str) -> WsReply {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            return WsReply::Error {
                request_id: None,
                code: "BAD_MESSAGE".to_string(),
                message: format!("Unrecognised message: {}", e),
                details: None,
            }
        }
    };
    let command = frame.command.name();
    match execute(engine, principal, frame.command).await {
        Ok(result) => WsReply::Ack {
            request_id: frame.request_id,
            command,
            result,
        },
        Err(error) => WsReply::from_error(frame.request_id, &error),
    }
}

async fn execute(engine: &GameEngine, principal: &Principal, command: ClientCommand) -> GameResult<serde_json::Value> {
    let principal = principal.clone();
    let value = match command {
        ClientCommand::StartGame {
            opening_card,
            timer_seconds,
        } => {
            let card = parse_card(&opening_card)?;
            serde_json::to_value(engine.start_game(principal, card, timer_seconds).await?)
        }
        ClientCommand::DealCard { side, card } => {
            let side = parse_side(&side)?;
            let card = parse_card(&card)?;
            serde_json::to_value(engine.deal_card(principal, side, card).await?)
        }
        ClientCommand::PlaceBet { side, amount, round } => {
            let request = BetRequest {
                side: parse_side(&side)?,
                amount: parse_amount(&amount)?,
                round: parse_round(round)?,
            };
            serde_json::to_value(engine.place_bet(principal, request).await?)
        }
        ClientCommand::LockBetting => serde_json::to_value(engine.lock_betting(principal).await?),
        ClientCommand::ResetGame => serde_json::to_value(engine.reset_game(principal).await?),
        ClientCommand::RetrySettlement => serde_json::to_value(engine.retry_settlement(principal).await?),
        ClientCommand::GetState => serde_json::to_value(engine.snapshot()),
        ClientCommand::GetBalance => {
            let balance = engine.balance(&principal, &principal.user_id).await?;
            Ok(serde_json::json!({ "user_id": principal.user_id, "balance": balance }))
        }
    };
    Ok(value.unwrap_or_default())
}

/// GET /ws?user_id=..&role=..
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let user_id = params.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::unauthorized(request_id.0, "user_id is required"));
    }
    let role = match params.role.as_deref() {
        Some(raw) => raw
            .parse::<Role>()
            .map_err(|e| ApiError::bad_request(request_id.0.clone(), e))?,
        None => Role::Player,
    };
    let principal = Principal {
        user_id: user_id.to_string(),
        role,
    };
    Ok(state.websocket_manager.handle_upgrade(ws, principal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::games::events::Dispatcher;
    use crate::metrics::GameMetrics;
    use crate::storage::MemoryStore;

    fn engine() -> GameEngine {
        let mut config = GameConfig::default();
        config.settlement.auto_reset_delay_secs = None;
        let (engine, _) = GameEngine::spawn(
            config,
            Arc::new(MemoryStore::new()),
            Dispatcher::new(64),
            GameMetrics::new().unwrap(),
        );
        engine
    }

    #[tokio::test]
    async fn test_malformed_frame_is_reported() {
        let engine = engine();
        let reply = handle_text(&engine, &Principal::player("alice"), "{not json").await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "BAD_MESSAGE");
    }

    #[tokio::test]
    async fn test_command_ack_carries_request_id() {
        let engine = engine();
        let dealer = Principal::operator("dealer");
        let reply = handle_text(
            &engine,
            &dealer,
            r#"{"type":"start_game","request_id":"r-1","opening_card":"7S","timer_seconds":30}"#,
        )
        .await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["request_id"], "r-1");
        assert_eq!(json["command"], "start_game");
        assert_eq!(json["result"]["phase"], "betting");
    }

    #[tokio::test]
    async fn test_rejection_uses_engine_error_code() {
        let engine = engine();
        let reply = handle_text(
            &engine,
            &Principal::player("alice"),
            r#"{"type":"place_bet","request_id":"r-2","side":"andar","amount":-10}"#,
        )
        .await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["request_id"], "r-2");
        assert_eq!(json["code"], "INVALID_AMOUNT");
    }

    #[tokio::test]
    async fn test_unit_command_parses() {
        let engine = engine();
        let reply = handle_text(&engine, &Principal::player("alice"), r#"{"type":"get_state"}"#).await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["result"]["phase"], "idle");
    }
}
