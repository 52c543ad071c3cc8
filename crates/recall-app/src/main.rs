//! Recall server entry point.
//!
//! Loads configuration, opens the SQLite database, starts the periodic
//! deletion sweep and serves the HTTP API.

mod cli;

use std::sync::Arc;

use clap::Parser;

use recall_api::{create_router, AppState};
use recall_core::config::{RecallConfig, StorageConfig};
use recall_storage::{Database, DeletionSweeper};
use recall_vector::MockEmbedding;

use crate::cli::CliArgs;

/// Periodically drain the deletion queue and expire stale pending entries.
async fn deletion_sweep_loop(db: Arc<Database>, config: StorageConfig) {
    tracing::info!(interval_secs = config.sweep_interval_secs, "Deletion sweep loop started");

    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(config.sweep_interval_secs.max(1)));

    loop {
        interval.tick().await;

        let db = Arc::clone(&db);
        let cfg = config.clone();
        match tokio::task::spawn_blocking(move || DeletionSweeper::run_sweep(&db, &cfg)).await {
            Ok(Ok(result)) => {
                if result.chunks_deleted > 0 || result.pending_expired > 0 {
                    tracing::info!(
                        chunks_deleted = result.chunks_deleted,
                        entries_completed = result.entries_completed,
                        pending_expired = result.pending_expired,
                        "Deletion sweep finished"
                    );
                }
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "Deletion sweep failed"),
            Err(e) => tracing::warn!(error = %e, "Deletion sweep task panicked"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = RecallConfig::load_or_default(&config_file);
    config.general.port = args.resolve_port(config.general.port);

    // Tracing: RUST_LOG wins, then --log-level, then the config file.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    tracing::info!("Starting Recall v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = args.resolve_data_dir(&config.general.data_dir);
    let db_path = data_dir.join("recall.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // Embedding provider.
    let embedder = Arc::new(MockEmbedding::new(config.ingest.embedding_dim));
    tracing::info!(
        model = %config.ingest.embedding_model,
        dimensions = config.ingest.embedding_dim,
        "Using deterministic mock embeddings"
    );

    // === Background tasks ===

    let sweep_db = Arc::clone(&db);
    let sweep_config = config.storage.clone();
    tokio::spawn(async move {
        deletion_sweep_loop(sweep_db, sweep_config).await;
    });

    // === API server ===

    let port = config.general.port;
    let addr = format!("127.0.0.1:{}", port);
    let state = AppState::new(config, db, embedder);
    let router = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind, is another instance running?");
            tracing::error!("Try: RECALL_PORT={} recall", port.saturating_add(1));
            return Err(e.into());
        }
    };

    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, router).await?;

    Ok(())
}
