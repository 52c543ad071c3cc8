//! Document ingestion pipeline.
//!
//! A [`Document`] is fingerprinted, chunked, embedded and written as an
//! entry. Re-ingesting unchanged content under the same key costs one hash
//! and one lookup; no embeddings are computed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use recall_core::config::{IngestConfig, StorageConfig};
use recall_core::error::{RecallError, Result};
use recall_core::hash::ContentHasher;
use recall_core::types::{ChunkInput, EntryInput, FilterValue, Status};
use recall_storage::{ChunkStore, Database, EntryManager, NamespaceManager};

use crate::chunker::FixedSizeChunker;
use crate::embedding::{check_model, DynEmbeddingProvider};

fn default_importance() -> f64 {
    1.0
}

/// Raw text to be indexed as one entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
    #[serde(default)]
    pub filter_values: Vec<FilterValue>,
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            key: None,
            title: None,
            text: text.into(),
            filter_values: Vec::new(),
            importance: default_importance(),
            metadata: None,
        }
    }

    pub fn keyed(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(text)
        }
    }

    fn entry_input(&self, content_hash: String) -> EntryInput {
        EntryInput {
            key: self.key.clone(),
            title: self.title.clone(),
            content_hash: Some(content_hash),
            filter_values: self.filter_values.clone(),
            importance: self.importance,
            metadata: self.metadata.clone(),
        }
    }
}

/// Result of an ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IngestResult {
    /// A new ready entry was written.
    Stored {
        entry_id: Uuid,
        chunks: u32,
        /// The previous ready version of the key, now replaced.
        replaced: Option<Uuid>,
    },
    /// The key already holds this exact content.
    Unchanged { entry_id: Uuid },
    /// Nothing to index (e.g., empty text).
    Skipped { reason: String },
}

/// A document that failed within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub index: usize,
    pub key: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<IngestResult>,
    pub failures: Vec<BatchFailure>,
}

/// The ingestion pipeline.
///
/// Processes documents through:
/// 1. Validation (including the namespace's embedding model) and content
///    hashing
/// 2. Unchanged-content detection by key and hash
/// 3. Chunking and embedding
/// 4. Entry write and promotion to ready
pub struct IngestPipeline {
    namespaces: NamespaceManager,
    entries: EntryManager,
    chunks: ChunkStore,
    embedder: Arc<dyn DynEmbeddingProvider>,
    chunker: FixedSizeChunker,
    insert_batch_size: usize,
}

impl IngestPipeline {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn DynEmbeddingProvider>,
        ingest: &IngestConfig,
        storage: &StorageConfig,
    ) -> Self {
        Self {
            namespaces: NamespaceManager::new(db.clone()),
            entries: EntryManager::new(db.clone()),
            chunks: ChunkStore::new(db, storage.replace_batch_size),
            embedder,
            chunker: FixedSizeChunker::new(ingest.chunk_max_chars, ingest.chunk_overlap_chars),
            insert_batch_size: ingest.insert_batch_size.max(1),
        }
    }

    pub fn chunker(&self) -> &FixedSizeChunker {
        &self.chunker
    }

    /// Ingest a document, writing all chunks and promoting in one step.
    pub async fn ingest(&self, namespace_id: Uuid, doc: Document) -> Result<IngestResult> {
        if doc.text.trim().is_empty() {
            debug!(key = ?doc.key, "Skipping document with empty text");
            return Ok(IngestResult::Skipped {
                reason: "Empty text".to_string(),
            });
        }
        self.check_namespace(namespace_id)?;

        let hash = ContentHasher::hash(&doc.text);
        if let Some(key) = &doc.key {
            if let Some(existing) = self.entries.find_by_key_and_hash(namespace_id, key, &hash)? {
                if existing.status == Status::Ready {
                    debug!(key = %key, entry_id = %existing.entry_id, "Content unchanged");
                    return Ok(IngestResult::Unchanged {
                        entry_id: existing.entry_id,
                    });
                }
            }
        }

        let pieces = self.chunker.chunk(&doc.text);
        let chunks = self.embed_pieces(&pieces).await?;
        let count = chunks.len() as u32;

        let added = self.entries.add(namespace_id, doc.entry_input(hash), Some(chunks))?;
        if !added.created {
            return Ok(IngestResult::Unchanged {
                entry_id: added.entry_id,
            });
        }

        info!(entry_id = %added.entry_id, chunks = count, "Document ingested");
        Ok(IngestResult::Stored {
            entry_id: added.entry_id,
            chunks: count,
            replaced: added.replaced_version.map(|e| e.entry_id),
        })
    }

    /// Ingest a document as a pending entry streamed in batches of
    /// `insert_batch_size` chunks, then promote it.
    ///
    /// Retrying after a failure resumes the pending entry from the chunks
    /// already written.
    pub async fn ingest_streamed(&self, namespace_id: Uuid, doc: Document) -> Result<IngestResult> {
        if doc.text.trim().is_empty() {
            debug!(key = ?doc.key, "Skipping document with empty text");
            return Ok(IngestResult::Skipped {
                reason: "Empty text".to_string(),
            });
        }
        self.check_namespace(namespace_id)?;

        let hash = ContentHasher::hash(&doc.text);
        let chunker_id = self.chunker.id();
        let added = self
            .entries
            .add_async(namespace_id, doc.entry_input(hash), &chunker_id)?;
        if added.status == Status::Ready {
            return Ok(IngestResult::Unchanged {
                entry_id: added.entry_id,
            });
        }

        let entry_id = added.entry_id;
        if !added.created {
            let entry = self
                .entries
                .get(entry_id)?
                .ok_or(RecallError::EntryNotFound(entry_id))?;
            if entry.chunker.as_deref() != Some(chunker_id.as_str()) {
                return Err(RecallError::Validation(format!(
                    "pending entry {} was chunked with {:?}, not {}",
                    entry_id, entry.chunker, chunker_id
                )));
            }
        }

        let pieces = self.chunker.chunk(&doc.text);
        let mut next = self.chunks.count(entry_id)?;
        if next > 0 {
            debug!(entry_id = %entry_id, resume_from = next, "Resuming pending entry");
        }

        while (next as usize) < pieces.len() {
            let end = (next as usize + self.insert_batch_size).min(pieces.len());
            let batch = self.embed_pieces(&pieces[next as usize..end]).await?;
            next = self.chunks.insert(entry_id, batch, next)?.next_order;
        }

        let promotion = self.entries.promote_to_ready(entry_id)?;
        info!(entry_id = %entry_id, chunks = next, "Document ingested in batches");
        Ok(IngestResult::Stored {
            entry_id,
            chunks: next,
            replaced: promotion.replaced_version.map(|e| e.entry_id),
        })
    }

    /// Ingest documents one after another. A failing document is logged
    /// and reported; the rest of the batch continues.
    pub async fn ingest_batch(&self, namespace_id: Uuid, docs: Vec<Document>) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, doc) in docs.into_iter().enumerate() {
            let key = doc.key.clone();
            match self.ingest(namespace_id, doc).await {
                Ok(result) => report.results.push(result),
                Err(e) => {
                    warn!(index, key = ?key, error = %e, "Document ingestion failed");
                    report.failures.push(BatchFailure {
                        index,
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// The namespace must exist and have been built with this pipeline's
    /// embedding model.
    fn check_namespace(&self, namespace_id: Uuid) -> Result<()> {
        let ns = self
            .namespaces
            .get_by_id(namespace_id)?
            .ok_or_else(|| RecallError::NamespaceNotFound(namespace_id.to_string()))?;
        check_model(&ns, self.embedder.as_ref())
    }

    async fn embed_pieces(&self, pieces: &[String]) -> Result<Vec<ChunkInput>> {
        let mut chunks = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let embedding = self.embedder.embed_boxed(piece).await?;
            chunks.push(ChunkInput::new(piece.clone(), embedding));
        }
        Ok(chunks)
    }
}
