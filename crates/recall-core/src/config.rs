use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RecallError, Result};

/// Top-level configuration for the Recall service.
///
/// Loaded from `~/.recall/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl RecallConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecallConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let w = self.search.semantic_weight;
        if !w.is_finite() || !(0.0..=1.0).contains(&w) {
            return Err(RecallError::Config(format!(
                "search.semantic_weight {} must be within [0, 1]",
                w
            )));
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            return Err(RecallError::Config(
                "search.default_limit must be in 1..=search.max_limit".into(),
            ));
        }
        if self.ingest.chunk_max_chars == 0 {
            return Err(RecallError::Config("ingest.chunk_max_chars must be positive".into()));
        }
        if self.ingest.chunk_overlap_chars >= self.ingest.chunk_max_chars {
            return Err(RecallError::Config(
                "ingest.chunk_overlap_chars must be smaller than ingest.chunk_max_chars".into(),
            ));
        }
        if self.ingest.insert_batch_size == 0 {
            return Err(RecallError::Config("ingest.insert_batch_size must be positive".into()));
        }
        if self.ingest.embedding_dim == 0 {
            return Err(RecallError::Config("ingest.embedding_dim must be positive".into()));
        }
        if self.storage.sweep_batch_size == 0 || self.storage.replace_batch_size == 0 {
            return Err(RecallError::Config("storage batch sizes must be positive".into()));
        }
        if self.storage.default_page_size == 0
            || self.storage.default_page_size > self.storage.max_page_size
        {
            return Err(RecallError::Config(
                "storage.default_page_size must be in 1..=storage.max_page_size".into(),
            ));
        }
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.recall/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of results when a request gives no limit.
    pub default_limit: usize,
    /// Upper bound on any requested limit.
    pub max_limit: usize,
    /// Default semantic weight for hybrid search (0.0 to 1.0).
    pub semantic_weight: f64,
    /// Minimum cosine similarity for vector hits, when set.
    pub vector_score_threshold: Option<f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            semantic_weight: 0.5,
            vector_score_threshold: None,
        }
    }
}

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Target chunk size in characters.
    pub chunk_max_chars: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap_chars: usize,
    /// Chunks written per `insert` call on the two-phase path.
    pub insert_batch_size: usize,
    /// Embedding model name recorded on namespaces.
    pub embedding_model: String,
    /// Embedding dimension.
    pub embedding_dim: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1000,
            chunk_overlap_chars: 100,
            insert_batch_size: 64,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dim: 384,
        }
    }
}

/// Storage maintenance and listing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Seconds between deletion sweeps.
    pub sweep_interval_secs: u64,
    /// Chunks removed per sweep step.
    pub sweep_batch_size: usize,
    /// Chunks truncated per `replace_chunks_page` call.
    pub replace_batch_size: usize,
    /// Pending entries older than this are swept. 0 disables expiry.
    pub pending_ttl_hours: u32,
    /// Page size used when a listing request gives none.
    pub default_page_size: usize,
    /// Upper bound on any requested page size.
    pub max_page_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            sweep_batch_size: 256,
            replace_batch_size: 256,
            pending_ttl_hours: 0,
            default_page_size: 100,
            max_page_size: 1000,
        }
    }
}
