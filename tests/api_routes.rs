//! HTTP surface: routing, principal headers and error mapping

use andar_bahar::api::ApiServer;
use andar_bahar::config::ServerConfig;
use andar_bahar::{Dispatcher, GameConfig, GameEngine, GameMetrics, MemoryStore};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> (Router, GameEngine) {
    let mut config = GameConfig::default();
    config.settlement.auto_reset_delay_secs = None;
    let store = Arc::new(MemoryStore::with_balances(HashMap::from([(
        "alice".to_string(),
        5000,
    )])));
    let (engine, _handle) =
        GameEngine::spawn(config, store, Dispatcher::new(256), GameMetrics::new().unwrap());
    let app = ApiServer::new(ServerConfig::default(), engine.clone()).create_app();
    (app, engine)
}

fn post(uri: &str, user: Option<(&str, &str)>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some((user_id, role)) = user {
        builder = builder.header("x-user-id", user_id).header("x-user-role", role);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some((user_id, role)) = user {
        builder = builder.header("x-user-id", user_id).header("x-user-role", role);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    assert!(response.headers().contains_key("x-request-id"));
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

const DEALER: Option<(&str, &str)> = Some(("dealer", "operator"));
const ALICE: Option<(&str, &str)> = Some(("alice", "player"));

#[tokio::test]
async fn health_reports_current_phase() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Running");
    assert_eq!(body["phase"], "idle");
}

#[tokio::test]
async fn commands_require_identity_and_role() {
    let (app, _) = app();
    let start = json!({ "opening_card": "7S", "timer_seconds": 30 });

    let (status, body) = send(&app, post("/api/game/start", None, start.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, body) = send(&app, post("/api/game/start", ALICE, start.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, body) = send(&app, post("/api/game/start", DEALER, start)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "betting");
    assert_eq!(body["opening_card"], "7♠");
}

#[tokio::test]
async fn full_round_over_http() {
    let (app, engine) = app();
    send(&app, post("/api/game/start", DEALER, json!({ "opening_card": "7S" }))).await;

    let (status, body) = send(
        &app,
        post("/api/game/bet", ALICE, json!({ "side": "andar", "amount": 1000 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["new_balance"], 4000);

    let (status, _) = send(&app, post("/api/game/lock", DEALER, json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        post("/api/game/deal", DEALER, json!({ "side": "andar", "card": "2C" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "UNEXPECTED_SIDE");
    assert_eq!(body["error"]["details"]["expected"], "bahar");

    send(&app, post("/api/game/deal", DEALER, json!({ "side": "bahar", "card": "3D" }))).await;
    let (status, body) = send(
        &app,
        post("/api/game/deal", DEALER, json!({ "side": "andar", "card": "7H" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_winning_card"], true);
    assert_eq!(body["settlement"]["status"], "settled");
    assert_eq!(body["settlement"]["summary"]["total_payouts"], 2000);

    let (status, body) = send(&app, get("/api/balance/alice", ALICE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 6000);
    assert_eq!(engine.snapshot().phase.to_string(), "complete");
}

#[tokio::test]
async fn validation_errors_map_to_bad_request() {
    let (app, _) = app();
    let (status, body) = send(
        &app,
        post("/api/game/start", DEALER, json!({ "opening_card": "ZZ" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_CARD");

    send(&app, post("/api/game/start", DEALER, json!({ "opening_card": "7S" }))).await;
    let (status, body) = send(
        &app,
        post("/api/game/bet", ALICE, json!({ "side": "andar", "amount": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BET_BELOW_MINIMUM");
}

#[tokio::test]
async fn balances_and_totals_are_guarded() {
    let (app, _) = app();
    let (status, _) = send(&app, get("/api/balance/alice", Some(("bob", "player")))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, get("/api/house/totals", ALICE)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, get("/api/house/totals?period=2026-01-01", DEALER)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["games"], 0);
}

#[tokio::test]
async fn concurrent_bets_are_all_accounted() {
    let mut config = GameConfig::default();
    config.settlement.auto_reset_delay_secs = None;
    let balances: HashMap<String, u64> = (0..20).map(|i| (format!("player-{}", i), 1000)).collect();
    let (engine, _handle) = GameEngine::spawn(
        config,
        Arc::new(MemoryStore::with_balances(balances)),
        Dispatcher::new(256),
        GameMetrics::new().unwrap(),
    );
    engine
        .start_game(
            andar_bahar::games::Principal::operator("dealer"),
            "KS".parse().unwrap(),
            None,
        )
        .await
        .unwrap();

    let bets = (0..20).map(|i| {
        let engine = engine.clone();
        async move {
            engine
                .place_bet(
                    andar_bahar::games::Principal::player(format!("player-{}", i)),
                    andar_bahar::games::BetRequest {
                        side: andar_bahar::games::Side::Bahar,
                        amount: 100,
                        round: None,
                    },
                )
                .await
        }
    });
    let results = futures::future::join_all(bets).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.player_count, 20);
    assert_eq!(snapshot.stakes.round1.bahar, 2000);
}
