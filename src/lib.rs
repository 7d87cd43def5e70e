//! Andar Bahar - Live Table Round Engine
//!
//! A single authoritative game session driven by an operator: the opening
//! card, timed betting windows for two rounds, alternating deals until a
//! card matches the opening rank, then atomic and idempotent settlement of
//! every stake. Events fan out to players and operators over WebSocket.

pub mod api;
pub mod config;
pub mod errors;
pub mod games;
pub mod metrics;
pub mod storage;

pub use config::GameConfig;
pub use errors::{GameError, GameResult};
pub use games::engine::GameEngine;
pub use games::events::Dispatcher;
pub use metrics::GameMetrics;
pub use storage::{GameStore, MemoryStore, RocksStore};
