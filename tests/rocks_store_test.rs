//! RocksDB ledger: persistence across reopen and a full settled game

use andar_bahar::games::{BetRequest, Card, Principal, SettlementReport, Side};
use andar_bahar::storage::{period_key, BetStatus};
use andar_bahar::{Dispatcher, GameConfig, GameEngine, GameMetrics, GameStore, RocksStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn card(s: &str) -> Card {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_balances_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = RocksStore::open(dir.path()).unwrap();
        store.seed_balance("alice", 900).unwrap();
        assert_eq!(store.debit_balance("alice", 250).await.unwrap(), 650);
        assert_eq!(store.credit_balance("alice", 50).await.unwrap(), 700);
    }

    let store = RocksStore::open(dir.path()).unwrap();
    assert_eq!(store.balance("alice").await.unwrap(), 700);
    assert_eq!(store.balance("nobody").await.unwrap(), 0);
    // Opening balances never overwrite an existing account
    assert!(!store.seed_balance_if_absent("alice", 10_000).unwrap());
    assert!(store.seed_balance_if_absent("bob", 300).unwrap());
    assert_eq!(store.balance("alice").await.unwrap(), 700);
    assert_eq!(store.balance("bob").await.unwrap(), 300);
}

#[tokio::test]
async fn test_settled_game_is_recorded_atomically() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    store.seed_balance("alice", 5000).unwrap();
    store.seed_balance("bob", 5000).unwrap();

    let mut config = GameConfig::default();
    config.settlement.auto_reset_delay_secs = None;
    let (engine, _handle) = GameEngine::spawn(
        config,
        store.clone(),
        Dispatcher::new(256),
        GameMetrics::new().unwrap(),
    );
    let dealer = Principal::operator("dealer");

    engine.start_game(dealer.clone(), card("7S"), None).await.unwrap();
    let winning_bet = engine
        .place_bet(
            Principal::player("alice"),
            BetRequest { side: Side::Andar, amount: 1000, round: None },
        )
        .await
        .unwrap();
    let losing_bet = engine
        .place_bet(
            Principal::player("bob"),
            BetRequest { side: Side::Bahar, amount: 400, round: None },
        )
        .await
        .unwrap();
    engine.lock_betting(dealer.clone()).await.unwrap();
    engine.deal_card(dealer.clone(), Side::Bahar, card("3D")).await.unwrap();
    let receipt = engine.deal_card(dealer.clone(), Side::Andar, card("7H")).await.unwrap();

    let summary = match receipt.settlement {
        Some(SettlementReport::Settled { summary }) => summary,
        other => panic!("expected settlement, got {:?}", other),
    };
    let session_id = summary.session_id;

    assert!(store.is_session_settled(session_id).await.unwrap());
    assert_eq!(store.load_settlement(session_id).await.unwrap(), Some(summary.clone()));
    assert_eq!(store.balance("alice").await.unwrap(), 6000);
    assert_eq!(store.balance("bob").await.unwrap(), 4600);

    let won = store.load_bet(&winning_bet.bet_id).await.unwrap().unwrap();
    let lost = store.load_bet(&losing_bet.bet_id).await.unwrap().unwrap();
    assert_eq!(won.status, BetStatus::Won);
    assert_eq!(lost.status, BetStatus::Lost);

    // Retrying replays the committed summary without crediting twice
    let replay = engine.retry_settlement(dealer).await.unwrap();
    assert_eq!(replay.total_payouts, summary.total_payouts);
    assert_eq!(store.balance("alice").await.unwrap(), 6000);

    let period = period_key(summary.settled_at);
    let (history, totals) = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let history = store.recent_history(10).await.unwrap();
            let totals = store.period_totals(&period).await.unwrap();
            if !history.is_empty() && totals.games > 0 {
                return (history, totals);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(history[0].session_id, session_id);
    assert_eq!(history[0].total_payouts, 2000);
    assert_eq!(totals.games, 1);
    assert_eq!(totals.house_profit, -600);
}
