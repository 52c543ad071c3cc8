use thiserror::Error;
use uuid::Uuid;

use crate::types::Status;

/// Top-level error type for the Recall indexing engine.
///
/// Structural violations (`OutOfOrder`, `DimensionMismatch`, `DuplicateKey`)
/// are raised by the call that would introduce them, before anything is
/// written. Storage failures from the SQLite layer are flattened into
/// `Storage` with the failing operation as context.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecallError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Namespace {0} is replaced and accepts no new writes")]
    NamespaceNotWritable(Uuid),

    #[error("Entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Chunks out of order for entry {entry_id}: expected start order {expected}, got {actual}")]
    OutOfOrder {
        entry_id: Uuid,
        expected: u32,
        actual: u32,
    },

    #[error("Embedding dimension mismatch: namespace expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Duplicate key '{key}': namespace {namespace_id} already has a pending entry for it")]
    DuplicateKey { key: String, namespace_id: Uuid },

    #[error("Invalid semantic weight {0}: must be within [0, 1]")]
    InvalidWeight(f64),

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for RecallError {
    fn from(err: toml::de::Error) -> Self {
        RecallError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for RecallError {
    fn from(err: toml::ser::Error) -> Self {
        RecallError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RecallError {
    fn from(err: serde_json::Error) -> Self {
        RecallError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Recall operations.
pub type Result<T> = std::result::Result<T, RecallError>;
