//! UTXO Ledger Indexer - Main entry point

use std::sync::Arc;
use tracing::info;

use ledger_indexer::{
    api::{ApiServer, AppState},
    classify::ErrorLog,
    config::IndexerConfig,
    coordinator::Coordinator,
    database::DatabaseManager,
    processor::BlockProcessor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting UTXO ledger indexer");

    let config = IndexerConfig::from_env();
    info!("Database path: {:?}", config.db.database_path);

    // Non-blocking: the API starts immediately and answers 503 until
    // the background connect succeeds; writes wait on the retrying
    // connection instead.
    let manager = DatabaseManager::new(config.db.clone());
    manager.initialize();

    let coordinator = Coordinator::new();
    let errors = Arc::new(ErrorLog::new());
    let processor = Arc::new(BlockProcessor::new(
        manager.clone(),
        coordinator.clone(),
        errors.clone(),
    ));

    let state = Arc::new(AppState {
        service: processor,
        manager: manager.clone(),
        coordinator: coordinator.clone(),
        errors,
    });

    let server = ApiServer::new(state, config.api_port);
    info!("Starting API server on port {}", config.api_port);

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            coordinator.shutdown();
            coordinator.clear_queue().await;
            manager.shutdown().await;
        }
    }

    Ok(())
}
