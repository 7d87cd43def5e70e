//! Andar Bahar Server Binary
//!
//! Loads configuration, opens the ledger, spawns the engine actor and serves
//! the HTTP/WebSocket API.

use andar_bahar::{
    api::ApiServer,
    config::StorageBackend,
    Dispatcher, GameConfig, GameEngine, GameMetrics, GameStore, MemoryStore, RocksStore,
};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "andar-bahar")]
#[command(about = "Andar Bahar live table round engine", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "andar_bahar=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = GameConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let store = open_store(&config)?;
    let metrics = GameMetrics::new()?;
    let dispatcher = Dispatcher::new(config.server.event_buffer);
    let server_config = config.server.clone();
    let (engine, engine_task) = GameEngine::spawn(config, store, dispatcher, metrics);

    ApiServer::new(server_config, engine).run().await?;

    engine_task.abort();
    Ok(())
}

fn open_store(config: &GameConfig) -> Result<Arc<dyn GameStore>, Box<dyn std::error::Error>> {
    let balances = &config.storage.initial_balances;
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory ledger with {} seeded accounts", balances.len());
            Ok(Arc::new(MemoryStore::with_balances(balances.clone())))
        }
        StorageBackend::Rocksdb => {
            info!("Opening ledger database: {}", config.storage.data_directory);
            let store = RocksStore::open(&config.storage.data_directory)?;
            for (user_id, amount) in balances {
                if store.seed_balance_if_absent(user_id, *amount)? {
                    info!("Seeded opening balance of {} for {}", amount, user_id);
                }
            }
            Ok(Arc::new(store))
        }
    }
}
