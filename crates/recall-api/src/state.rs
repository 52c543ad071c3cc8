//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use recall_core::config::RecallConfig;
use recall_storage::{ChunkStore, Database, EntryManager, NamespaceManager};
use recall_vector::{DynEmbeddingProvider, IngestPipeline, SearchEngine};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<RecallConfig>,
    /// SQLite database for persistent storage.
    pub database: Arc<Database>,
    pub namespaces: Arc<NamespaceManager>,
    pub entries: Arc<EntryManager>,
    pub chunks: Arc<ChunkStore>,
    pub search: Arc<SearchEngine>,
    /// Ingestion pipeline (hash + chunk + embed + write).
    pub pipeline: Arc<IngestPipeline>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState over `database`, embedding with `embedder`.
    pub fn new(
        config: RecallConfig,
        database: Arc<Database>,
        embedder: Arc<dyn DynEmbeddingProvider>,
    ) -> Self {
        let pipeline = IngestPipeline::new(
            database.clone(),
            embedder.clone(),
            &config.ingest,
            &config.storage,
        );
        Self {
            namespaces: Arc::new(NamespaceManager::new(database.clone())),
            entries: Arc::new(EntryManager::new(database.clone())),
            chunks: Arc::new(ChunkStore::new(
                database.clone(),
                config.storage.replace_batch_size,
            )),
            search: Arc::new(SearchEngine::new(database.clone(), embedder)),
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
            database,
            start_time: Instant::now(),
        }
    }
}
