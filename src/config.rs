//! Configuration management with validation and defaults
//!
//! Values come from an optional TOML file, then `ANDAR_*` environment
//! overrides, then [`GameConfig::validate`].

use crate::errors::ConfigurationError;
use crate::games::types::{Amount, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Top-level engine and server configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub betting: BettingConfig,
    pub timer: TimerConfig,
    pub settlement: SettlementConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

/// Stake limits and per-user rate limiting
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BettingConfig {
    pub min_bet: Amount,
    pub max_bet: Amount,
    /// Bets a single user may place inside one rolling window
    pub rate_limit_max_bets: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            min_bet: 10,
            max_bet: 100_000,
            rate_limit_max_bets: 10,
            rate_limit_window_secs: 60,
        }
    }
}

/// Betting countdown settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub default_betting_secs: u64,
    pub max_betting_secs: u64,
    /// Betting locks once this many seconds (or fewer) remain
    pub lock_margin_secs: u64,
    pub tick_millis: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_betting_secs: 30,
            max_betting_secs: 300,
            lock_margin_secs: 2,
            tick_millis: 1_000,
        }
    }
}

/// Settlement commit and post-settlement behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub commit_timeout_secs: u64,
    /// Automatic reset delay after a successful settlement; `None` disables it
    pub auto_reset_delay_secs: Option<u64>,
    pub history_retry_attempts: u32,
    pub history_retry_backoff_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            commit_timeout_secs: 10,
            auto_reset_delay_secs: Some(15),
            history_retry_attempts: 3,
            history_retry_backoff_ms: 500,
        }
    }
}

/// HTTP / WebSocket server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Capacity of the event fan-out channel
    pub event_buffer: usize,
    /// Capacity of the engine command mailbox
    pub mailbox_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            event_buffer: 1024,
            mailbox_size: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

/// Storage collaborator selection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    /// Opening balances for the in-memory ledger
    pub initial_balances: HashMap<UserId, Amount>,
    /// Deadline for balance and bet-store calls made while a bet is taken
    pub call_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_directory: "./DB/andar_bahar".to_string(),
            initial_balances: HashMap::new(),
            call_timeout_ms: 2_000,
        }
    }
}

impl GameConfig {
    /// Load from an optional TOML file, apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => GameConfig::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigurationError> {
        if let Ok(host) = env::var("ANDAR_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("ANDAR_PORT", "Invalid port number")? {
            self.server.port = port;
        }
        if let Some(min_bet) = parse_env("ANDAR_MIN_BET", "Invalid amount")? {
            self.betting.min_bet = min_bet;
        }
        if let Some(max_bet) = parse_env("ANDAR_MAX_BET", "Invalid amount")? {
            self.betting.max_bet = max_bet;
        }
        if let Ok(backend) = env::var("ANDAR_STORAGE_BACKEND") {
            self.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::Rocksdb,
                _ => {
                    return Err(ConfigurationError::InvalidValue {
                        field: "ANDAR_STORAGE_BACKEND".to_string(),
                        value: backend,
                        reason: "Expected 'memory' or 'rocksdb'".to_string(),
                    })
                }
            };
        }
        if let Ok(dir) = env::var("ANDAR_DATA_DIR") {
            self.storage.data_directory = dir;
        }
        Ok(())
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.betting.min_bet == 0 {
            return Err(invalid("betting.min_bet", 0, "Minimum bet must be > 0"));
        }
        if self.betting.min_bet > self.betting.max_bet {
            return Err(invalid(
                "betting.max_bet",
                self.betting.max_bet,
                "Maximum bet must not be below the minimum bet",
            ));
        }
        if self.betting.rate_limit_max_bets == 0 {
            return Err(invalid("betting.rate_limit_max_bets", 0, "Must be > 0"));
        }
        if self.betting.rate_limit_window_secs == 0 {
            return Err(invalid("betting.rate_limit_window_secs", 0, "Must be > 0"));
        }
        if self.timer.default_betting_secs == 0
            || self.timer.default_betting_secs > self.timer.max_betting_secs
        {
            return Err(invalid(
                "timer.default_betting_secs",
                self.timer.default_betting_secs,
                "Must be between 1 and timer.max_betting_secs",
            ));
        }
        if self.timer.lock_margin_secs >= self.timer.default_betting_secs {
            return Err(invalid(
                "timer.lock_margin_secs",
                self.timer.lock_margin_secs,
                "Lock margin must be shorter than the betting window",
            ));
        }
        if self.timer.tick_millis == 0 {
            return Err(invalid("timer.tick_millis", 0, "Must be > 0"));
        }
        if self.settlement.commit_timeout_secs == 0 {
            return Err(invalid("settlement.commit_timeout_secs", 0, "Must be > 0"));
        }
        if self.storage.call_timeout_ms == 0 {
            return Err(invalid("storage.call_timeout_ms", 0, "Must be > 0"));
        }
        if self.server.port == 0 {
            return Err(invalid("server.port", 0, "Port cannot be zero"));
        }
        if self.server.event_buffer == 0 || self.server.mailbox_size == 0 {
            return Err(invalid("server.event_buffer", 0, "Channel capacities must be > 0"));
        }
        if self.storage.backend == StorageBackend::Rocksdb && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_directory".to_string()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.timer.tick_millis)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement.commit_timeout_secs)
    }

    pub fn store_call_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.call_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.betting.rate_limit_window_secs)
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, reason: &str) -> Result<Option<T>, ConfigurationError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, raw, reason)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GameConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut config = GameConfig::default();
        config.betting.min_bet = 500;
        config.betting.max_bet = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lock_margin_must_fit_window() {
        let mut config = GameConfig::default();
        config.timer.lock_margin_secs = config.timer.default_betting_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rocksdb_requires_directory() {
        let mut config = GameConfig::default();
        config.storage.backend = StorageBackend::Rocksdb;
        config.storage.data_directory.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GameConfig = toml::from_str(
            r#"
            [betting]
            min_bet = 50

            [storage]
            backend = "memory"
            initial_balances = { alice = 5000 }
            "#,
        )
        .unwrap();
        assert_eq!(config.betting.min_bet, 50);
        assert_eq!(config.betting.max_bet, 100_000);
        assert_eq!(config.storage.initial_balances.get("alice"), Some(&5000));
        assert_eq!(config.timer.default_betting_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_conversions() {
        let config = GameConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(1_000));
        assert_eq!(config.commit_timeout(), Duration::from_secs(10));
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(config.store_call_timeout(), Duration::from_millis(2_000));
    }
}
