//! Tile Duel Server
//!
//! Runs the WebSocket front end over an in-memory store.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tile_duel::{
    network::{ConnectionHub, GameServer},
    DuelService, InMemoryStore, ServerConfig, ServiceConfig, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let service_config = ServiceConfig::from_env();
    let server_config = ServerConfig::from_env();

    info!("Tile Duel Server v{}", VERSION);
    info!("Season: {}", service_config.season);
    info!("Max rating gap: {}", service_config.max_rating_gap);
    info!(
        "Board sizes: {}..={}",
        service_config.min_board_size, service_config.max_board_size
    );

    let hub = Arc::new(ConnectionHub::new());
    let service = Arc::new(DuelService::new(
        Arc::new(InMemoryStore::new()),
        hub.clone(),
        service_config,
    ));
    let server = GameServer::new(server_config, service, hub);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
