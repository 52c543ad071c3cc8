//! Search engine over ready namespaces.
//!
//! `search` scores every eligible chunk by cosine similarity against the
//! query vector, keeps the top `limit`, and expands each hit with
//! neighbouring chunks. `hybrid_search` blends the vector list with an FTS5
//! keyword list through [`HybridRanker`] before expanding. Both text
//! entry points refuse a provider whose model differs from the namespace's.
//!
//! The vector scan is linear and runs on the single shared SQLite
//! connection, so a search waits for any in-flight write transaction and
//! holds off writers until its candidate read returns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use recall_core::config::StorageConfig;
use recall_core::error::{RecallError, Result};
use recall_core::types::{ChunkContent, Entry, FilterValue, Namespace, NamespaceConfig};
use recall_storage::{ChunkSearch, ChunkStore, Database, EntryManager, NamespaceManager};

use crate::embedding::{check_model, DynEmbeddingProvider};
use crate::hybrid::HybridRanker;

fn default_limit() -> usize {
    10
}

/// How many neighbouring chunks to attach to each hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkContext {
    #[serde(default)]
    pub before: u32,
    #[serde(default)]
    pub after: u32,
}

/// Vector search request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub namespace: NamespaceConfig,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub filters: Vec<FilterValue>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub chunk_context: Option<ChunkContext>,
    #[serde(default)]
    pub vector_score_threshold: Option<f64>,
}

/// Free-text search request, embedded by the engine's provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextSearchRequest {
    pub namespace: NamespaceConfig,
    pub query: String,
    #[serde(default)]
    pub filters: Vec<FilterValue>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub chunk_context: Option<ChunkContext>,
    #[serde(default)]
    pub vector_score_threshold: Option<f64>,
    /// Weight of the vector list in hybrid search. Defaults to 0.5.
    #[serde(default)]
    pub semantic_weight: Option<f64>,
}

/// One chunk hit with its expanded content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub entry_id: Uuid,
    /// Order of the matching chunk.
    pub order: u32,
    pub score: f64,
    /// Order of the first chunk in `content`.
    pub start_order: u32,
    /// The hit and its context, in chunk order.
    pub content: Vec<ChunkContent>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Each matched entry once, in order of its best result.
    pub entries: Vec<Entry>,
}

#[derive(Clone, Copy, Debug)]
struct RankedHit {
    entry_id: Uuid,
    order: u32,
    score: f64,
}

/// Search engine over the ready version of a namespace.
///
/// Holds the embedding provider behind `dyn` so tests can supply
/// `MockEmbedding` and production any other provider.
pub struct SearchEngine {
    namespaces: NamespaceManager,
    entries: EntryManager,
    chunks: ChunkStore,
    queries: ChunkSearch,
    embedder: Arc<dyn DynEmbeddingProvider>,
}

impl SearchEngine {
    pub fn new(db: Arc<Database>, embedder: Arc<dyn DynEmbeddingProvider>) -> Self {
        Self {
            namespaces: NamespaceManager::new(db.clone()),
            entries: EntryManager::new(db.clone()),
            chunks: ChunkStore::new(db.clone(), StorageConfig::default().replace_batch_size),
            queries: ChunkSearch::new(db),
            embedder,
        }
    }

    /// Nearest-neighbour search with a caller-supplied query vector.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let ns = self.resolve(&request.namespace, &request.filters)?;
        check_dimension(&ns, &request.embedding)?;
        if request.limit == 0 {
            return Ok(SearchResponse::default());
        }

        let hits = self.vector_hits(
            &ns,
            &request.embedding,
            &request.filters,
            request.vector_score_threshold,
            request.limit,
        )?;
        self.expand(hits, request.chunk_context)
    }

    /// Embed `request.query` and run [`SearchEngine::search`].
    pub async fn search_text(&self, request: &TextSearchRequest) -> Result<SearchResponse> {
        let ns = self.resolve(&request.namespace, &request.filters)?;
        check_model(&ns, self.embedder.as_ref())?;
        let embedding = self.embedder.embed_boxed(&request.query).await?;
        self.search(&SearchRequest {
            namespace: request.namespace.clone(),
            embedding,
            filters: request.filters.clone(),
            limit: request.limit,
            chunk_context: request.chunk_context,
            vector_score_threshold: request.vector_score_threshold,
        })
    }

    /// Keyword and vector search for the same query, blended by position.
    pub async fn hybrid_search(&self, request: &TextSearchRequest) -> Result<SearchResponse> {
        let ranker = match request.semantic_weight {
            Some(weight) => HybridRanker::new(weight)?,
            None => HybridRanker::default(),
        };
        let ns = self.resolve(&request.namespace, &request.filters)?;
        check_model(&ns, self.embedder.as_ref())?;
        if request.limit == 0 {
            return Ok(SearchResponse::default());
        }

        let embedding = self.embedder.embed_boxed(&request.query).await?;
        check_dimension(&ns, &embedding)?;

        let vector = self.vector_hits(
            &ns,
            &embedding,
            &request.filters,
            request.vector_score_threshold,
            request.limit,
        )?;
        let keyword = self
            .queries
            .keyword(ns.namespace_id, &request.query, &request.filters, request.limit)?;

        let text_keys: Vec<(Uuid, u32)> = keyword.iter().map(|h| (h.entry_id, h.order)).collect();
        let vector_keys: Vec<(Uuid, u32)> = vector.iter().map(|h| (h.entry_id, h.order)).collect();
        let blended = ranker.rank(&text_keys, &vector_keys, request.limit);

        debug!(
            keyword_hits = text_keys.len(),
            vector_hits = vector_keys.len(),
            blended = blended.len(),
            "Hybrid search ranked"
        );

        let hits = blended
            .into_iter()
            .map(|((entry_id, order), score)| RankedHit {
                entry_id,
                order,
                score,
            })
            .collect();
        self.expand(hits, request.chunk_context)
    }

    /// The ready namespace for `config`, with `filters` checked against it.
    fn resolve(&self, config: &NamespaceConfig, filters: &[FilterValue]) -> Result<Namespace> {
        let ns = self
            .namespaces
            .get(config)?
            .ok_or_else(|| RecallError::NamespaceNotFound(config.namespace.clone()))?;
        ns.check_filter_names(filters.iter().map(|f| f.name.as_str()))?;
        Ok(ns)
    }

    fn vector_hits(
        &self,
        ns: &Namespace,
        embedding: &[f32],
        filters: &[FilterValue],
        threshold: Option<f64>,
        limit: usize,
    ) -> Result<Vec<RankedHit>> {
        let candidates = self.queries.vector_candidates(ns.namespace_id, filters)?;
        let total = candidates.len();

        let mut scored: Vec<(RankedHit, f64)> = candidates
            .into_iter()
            .map(|c| {
                let hit = RankedHit {
                    entry_id: c.entry_id,
                    order: c.order,
                    score: cosine_similarity(embedding, &c.embedding),
                };
                (hit, c.importance)
            })
            .filter(|(hit, _)| threshold.map_or(true, |t| hit.score >= t))
            .collect();

        // Score desc, then importance desc, order asc, entry id asc.
        scored.sort_by(|(a, ai), (b, bi)| {
            b.score
                .total_cmp(&a.score)
                .then(bi.total_cmp(ai))
                .then(a.order.cmp(&b.order))
                .then(a.entry_id.cmp(&b.entry_id))
        });
        scored.truncate(limit);

        debug!(
            namespace_id = %ns.namespace_id,
            candidates = total,
            hits = scored.len(),
            "Vector search scored"
        );
        Ok(scored.into_iter().map(|(hit, _)| hit).collect())
    }

    /// Attach context to each hit and collect the matched entries.
    ///
    /// Context windows of hits in the same entry are clipped at each other,
    /// so no chunk is returned twice for one entry.
    fn expand(&self, hits: Vec<RankedHit>, context: Option<ChunkContext>) -> Result<SearchResponse> {
        let mut ranges: HashMap<(Uuid, u32), (u32, u32)> = HashMap::new();

        if let Some(ctx) = context {
            let mut by_entry: HashMap<Uuid, Vec<u32>> = HashMap::new();
            for hit in &hits {
                by_entry.entry(hit.entry_id).or_default().push(hit.order);
            }

            for (entry_id, mut orders) in by_entry {
                orders.sort_unstable();
                orders.dedup();
                let count = self.chunks.count(entry_id)?;
                if count == 0 {
                    continue;
                }
                let last = count - 1;

                let mut prev_end: Option<u32> = None;
                for (idx, &order) in orders.iter().enumerate() {
                    let mut start = order.saturating_sub(ctx.before);
                    if let Some(prev) = prev_end {
                        start = start.max(prev + 1);
                    }
                    let start = start.min(order);

                    let mut end = order.saturating_add(ctx.after).min(last);
                    if let Some(&next) = orders.get(idx + 1) {
                        end = end.min(next - 1);
                    }
                    let end = end.max(order);

                    ranges.insert((entry_id, order), (start, end));
                    prev_end = Some(end);
                }
            }
        }

        let mut results = Vec::with_capacity(hits.len());
        let mut entry_ids: Vec<Uuid> = Vec::new();
        for hit in hits {
            let (start, end) = ranges
                .get(&(hit.entry_id, hit.order))
                .copied()
                .unwrap_or((hit.order, hit.order));
            let content: Vec<ChunkContent> = self
                .chunks
                .range(hit.entry_id, start, end)?
                .into_iter()
                .map(|c| c.content)
                .collect();
            // Removed since the candidate query.
            if content.is_empty() {
                continue;
            }
            if !entry_ids.contains(&hit.entry_id) {
                entry_ids.push(hit.entry_id);
            }
            results.push(SearchResult {
                entry_id: hit.entry_id,
                order: hit.order,
                score: hit.score,
                start_order: start,
                content,
            });
        }

        let entries = self.entries.get_many(&entry_ids)?;
        let live: HashSet<Uuid> = entries.iter().map(|e| e.entry_id).collect();
        results.retain(|r| live.contains(&r.entry_id));

        Ok(SearchResponse { results, entries })
    }
}

fn check_dimension(ns: &Namespace, embedding: &[f32]) -> Result<()> {
    if embedding.len() != ns.dimension {
        return Err(RecallError::DimensionMismatch {
            expected: ns.dimension,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 on a length mismatch or if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
