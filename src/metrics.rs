//! Engine metrics exported in Prometheus text format

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Counters for bets, deals, settlements and connected clients
#[derive(Clone)]
pub struct GameMetrics {
    registry: Registry,
    bets: IntCounterVec,
    cards_dealt: IntCounter,
    settlements: IntCounterVec,
    history_write_failures: IntCounter,
    operator_alerts: IntCounterVec,
    ws_clients: IntGauge,
}

impl GameMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("andar_bahar".to_string()), None)?;

        let bets = IntCounterVec::new(
            Opts::new("bets_total", "Bet attempts by outcome (accepted or rejection code)"),
            &["outcome"],
        )?;
        let cards_dealt = IntCounter::new("cards_dealt_total", "Cards accepted by the dealer flow")?;
        let settlements = IntCounterVec::new(
            Opts::new("settlements_total", "Settlement attempts by result"),
            &["result"],
        )?;
        let history_write_failures = IntCounter::new(
            "history_write_failures_total",
            "History or period-total writes abandoned after retries",
        )?;
        let operator_alerts = IntCounterVec::new(
            Opts::new("operator_alerts_total", "Conditions that need manual reconciliation"),
            &["kind"],
        )?;
        let ws_clients = IntGauge::new("ws_clients", "Connected WebSocket clients")?;

        registry.register(Box::new(bets.clone()))?;
        registry.register(Box::new(cards_dealt.clone()))?;
        registry.register(Box::new(settlements.clone()))?;
        registry.register(Box::new(history_write_failures.clone()))?;
        registry.register(Box::new(operator_alerts.clone()))?;
        registry.register(Box::new(ws_clients.clone()))?;

        Ok(Self {
            registry,
            bets,
            cards_dealt,
            settlements,
            history_write_failures,
            operator_alerts,
            ws_clients,
        })
    }

    pub fn record_bet(&self, outcome: &str) {
        self.bets.with_label_values(&[outcome]).inc();
    }

    pub fn record_card_dealt(&self) {
        self.cards_dealt.inc();
    }

    /// `result` is one of `settled`, `replayed`, `aborted`
    pub fn record_settlement(&self, result: &str) {
        self.settlements.with_label_values(&[result]).inc();
    }

    pub fn record_history_failure(&self) {
        self.history_write_failures.inc();
    }

    pub fn record_operator_alert(&self, kind: &str) {
        self.operator_alerts.with_label_values(&[kind]).inc();
    }

    pub fn operator_alerts(&self, kind: &str) -> u64 {
        self.operator_alerts.with_label_values(&[kind]).get()
    }

    pub fn ws_client_connected(&self) {
        self.ws_clients.inc();
    }

    pub fn ws_client_disconnected(&self) {
        self.ws_clients.dec();
    }

    pub fn ws_clients(&self) -> i64 {
        self.ws_clients.get()
    }

    pub fn bets_with_outcome(&self, outcome: &str) -> u64 {
        self.bets.with_label_values(&[outcome]).get()
    }

    pub fn settlements_with_result(&self, result: &str) -> u64 {
        self.settlements.with_label_values(&[result]).get()
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = GameMetrics::new().unwrap();
        metrics.record_bet("accepted");
        metrics.record_bet("RATE_LIMITED");
        metrics.record_settlement("settled");
        metrics.record_card_dealt();
        metrics.ws_client_connected();
        metrics.record_operator_alert("stake_unrecorded");

        let text = metrics.render();
        assert!(text.contains("andar_bahar_bets_total"));
        assert!(text.contains("andar_bahar_cards_dealt_total 1"));
        assert!(text.contains("andar_bahar_ws_clients 1"));
        assert!(text.contains("andar_bahar_operator_alerts_total{kind=\"stake_unrecorded\"} 1"));
        assert_eq!(metrics.bets_with_outcome("accepted"), 1);
        assert_eq!(metrics.settlements_with_result("settled"), 1);
    }
}
