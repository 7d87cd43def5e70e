pub mod betting;
pub mod engine;
pub mod events;
pub mod payout;
pub mod rate_limit;
pub mod round;
pub mod sequence;
pub mod session;
pub mod settlement;
pub mod types;

pub use betting::{BetReceipt, BetRequest};
pub use engine::{DealReceipt, GameEngine, SettlementReport};
pub use events::{Audience, Dispatcher, Envelope, GameEvent};
pub use session::{SessionSnapshot, SettlementState};
pub use settlement::SettlementSummary;
pub use types::*;
