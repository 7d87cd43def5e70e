//! API Server
//!
//! HTTP and WebSocket front end for the round engine.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ServerConfig;
use crate::games::engine::GameEngine;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

pub struct ApiServer {
    config: ServerConfig,
    engine: GameEngine,
}

impl ApiServer {
    pub fn new(config: ServerConfig, engine: GameEngine) -> Self {
        Self { config, engine }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.socket_addr()?;
        let app = self.create_app();

        info!("Starting Andar Bahar server");
        info!("   Listen: http://{}", addr);
        self.log_server_info();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped gracefully");
        Ok(())
    }

    /// Router with the middleware stack applied
    pub fn create_app(&self) -> axum::Router {
        let state = Arc::new(AppState::new(self.engine.clone()));

        create_router(state)
            // Request ID first so every later layer can log it
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS before timeout to answer preflight
            .layer(create_cors_layer(self.config.allowed_origins.clone()))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    fn log_server_info(&self) {
        info!("Server Configuration:");
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!("   Event buffer: {}", self.config.event_buffer);
        info!("Available endpoints:");
        info!("   GET  /health               - Health check");
        info!("   GET  /metrics              - Prometheus metrics");
        info!("   GET  /api/game/state       - Current session snapshot");
        info!("   GET  /api/balance/:user    - Ledger balance");
        info!("   GET  /api/history          - Recent settled games");
        info!("   GET  /api/house/totals     - Daily house totals (operator)");
        info!("   POST /api/game/start|deal|lock|reset|settle (operator)");
        info!("   POST /api/game/bet         - Place a bet");
        info!("   GET  /ws?user_id=&role=    - Event stream and commands");
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
