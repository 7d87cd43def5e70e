//! HTTP and WebSocket API
//!
//! Operators drive the table and players bet through REST commands or the
//! `/ws` command channel; every connected client receives the engine's
//! events filtered to its role and identity.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::ApiServer;
