//! Route handler functions for all API endpoints.
//!
//! Each handler extracts query/path parameters or a JSON body via axum
//! extractors, calls the matching storage or search operation, and returns
//! its result as JSON.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use recall_core::pagination::{PaginationOpts, PaginationResult};
use recall_core::types::{
    Chunk, ChunkInput, Entry, EntryInput, FilterValue, Namespace, NamespaceConfig, SortOrder,
    Status,
};
use recall_storage::{
    storage_stats, AddAsyncResult, AddResult, InsertResult, Promotion, ReplaceResult,
    ResolvedNamespace,
};
use recall_vector::{BatchReport, ChunkContext, Document, SearchRequest, SearchResponse, TextSearchRequest};

use crate::error::ApiError;
use crate::state::AppState;

fn pending() -> Status {
    Status::Pending
}

fn ready() -> Status {
    Status::Ready
}

// =============================================================================
// Query parameter types
// =============================================================================

/// Pagination query parameters shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub cursor: Option<String>,
    pub num_items: Option<usize>,
    pub maximum_bytes_read: Option<usize>,
    pub maximum_rows_read: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NamespaceListParams {
    #[serde(default = "ready")]
    pub status: Status,
    pub cursor: Option<String>,
    pub num_items: Option<usize>,
    pub maximum_bytes_read: Option<usize>,
    pub maximum_rows_read: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EntryListParams {
    pub namespace_id: Uuid,
    #[serde(default = "ready")]
    pub status: Status,
    #[serde(default)]
    pub order: SortOrder,
    pub cursor: Option<String>,
    pub num_items: Option<usize>,
    pub maximum_bytes_read: Option<usize>,
    pub maximum_rows_read: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub start_order: Option<u32>,
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct GetOrCreateRequest {
    pub config: NamespaceConfig,
    #[serde(default = "pending")]
    pub status: Status,
}

#[derive(Debug, Deserialize)]
pub struct AddEntryRequest {
    pub namespace_id: Uuid,
    pub entry: EntryInput,
    /// All chunks at once; the entry becomes ready immediately.
    #[serde(default)]
    pub chunks: Option<Vec<ChunkInput>>,
}

#[derive(Debug, Deserialize)]
pub struct AddAsyncRequest {
    pub namespace_id: Uuid,
    pub entry: EntryInput,
    pub chunker: String,
}

#[derive(Debug, Deserialize)]
pub struct FindByContentHashRequest {
    pub namespace: NamespaceConfig,
    pub key: String,
    pub content_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct InsertChunksRequest {
    pub start_order: u32,
    pub chunks: Vec<ChunkInput>,
}

#[derive(Debug, Deserialize)]
pub struct ReplacePageRequest {
    pub start_order: u32,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub documents: Vec<Document>,
}

/// Body of POST /search. Exactly one of `embedding` and `query` is set.
#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub namespace: NamespaceConfig,
    pub embedding: Option<Vec<f32>>,
    pub query: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterValue>,
    pub limit: Option<usize>,
    pub chunk_context: Option<ChunkContext>,
    pub vector_score_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct HybridSearchBody {
    pub namespace: NamespaceConfig,
    pub query: String,
    #[serde(default)]
    pub filters: Vec<FilterValue>,
    pub limit: Option<usize>,
    pub chunk_context: Option<ChunkContext>,
    pub vector_score_threshold: Option<f64>,
    pub semantic_weight: Option<f64>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct LookupResponse {
    pub namespace_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub entry_id: Uuid,
    pub queued: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub ready_namespaces: u64,
    pub pending_deletions: u64,
}

// =============================================================================
// Helpers
// =============================================================================

impl AppState {
    fn page_opts(&self, params: PageParams) -> PaginationOpts {
        let storage = &self.config.storage;
        PaginationOpts {
            cursor: params.cursor,
            num_items: params
                .num_items
                .unwrap_or(storage.default_page_size)
                .min(storage.max_page_size),
            maximum_bytes_read: params.maximum_bytes_read,
            maximum_rows_read: params.maximum_rows_read,
        }
    }

    fn search_limit(&self, limit: Option<usize>) -> usize {
        let search = &self.config.search;
        limit.unwrap_or(search.default_limit).min(search.max_limit)
    }
}

// =============================================================================
// Namespaces
// =============================================================================

/// POST /namespaces/get_or_create
pub async fn get_or_create_namespace(
    State(state): State<AppState>,
    Json(body): Json<GetOrCreateRequest>,
) -> Result<Json<ResolvedNamespace>, ApiError> {
    Ok(Json(state.namespaces.get_or_create(&body.config, body.status)?))
}

/// POST /namespaces/create_pending
pub async fn create_pending_namespace(
    State(state): State<AppState>,
    Json(config): Json<NamespaceConfig>,
) -> Result<Json<Namespace>, ApiError> {
    Ok(Json(state.namespaces.create_pending_version(&config)?))
}

/// POST /namespaces/get - the ready version of a config, or null.
pub async fn get_namespace(
    State(state): State<AppState>,
    Json(config): Json<NamespaceConfig>,
) -> Result<Json<Option<Namespace>>, ApiError> {
    Ok(Json(state.namespaces.get(&config)?))
}

/// POST /namespaces/lookup
pub async fn lookup_namespace(
    State(state): State<AppState>,
    Json(config): Json<NamespaceConfig>,
) -> Result<Json<LookupResponse>, ApiError> {
    Ok(Json(LookupResponse {
        namespace_id: state.namespaces.lookup(&config)?,
    }))
}

/// GET /namespaces
pub async fn list_namespaces(
    State(state): State<AppState>,
    Query(params): Query<NamespaceListParams>,
) -> Result<Json<PaginationResult<Namespace>>, ApiError> {
    let opts = state.page_opts(PageParams {
        cursor: params.cursor,
        num_items: params.num_items,
        maximum_bytes_read: params.maximum_bytes_read,
        maximum_rows_read: params.maximum_rows_read,
    });
    Ok(Json(state.namespaces.list(params.status, &opts)?))
}

/// POST /namespaces/{id}/promote
pub async fn promote_namespace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Promotion<Namespace>>, ApiError> {
    Ok(Json(state.namespaces.promote_to_ready(id)?))
}

/// POST /namespaces/{id}/documents - chunk, embed and store raw documents.
pub async fn ingest_documents(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<IngestRequest>,
) -> Result<Json<BatchReport>, ApiError> {
    if body.documents.is_empty() {
        return Err(ApiError::BadRequest("'documents' must not be empty".to_string()));
    }
    Ok(Json(state.pipeline.ingest_batch(id, body.documents).await))
}

// =============================================================================
// Entries
// =============================================================================

/// POST /entries
pub async fn add_entry(
    State(state): State<AppState>,
    Json(body): Json<AddEntryRequest>,
) -> Result<Json<AddResult>, ApiError> {
    Ok(Json(state.entries.add(body.namespace_id, body.entry, body.chunks)?))
}

/// POST /entries/async
pub async fn add_entry_async(
    State(state): State<AppState>,
    Json(body): Json<AddAsyncRequest>,
) -> Result<Json<AddAsyncResult>, ApiError> {
    Ok(Json(state.entries.add_async(body.namespace_id, body.entry, &body.chunker)?))
}

/// POST /entries/find_by_content_hash - the matching entry, or null.
pub async fn find_by_content_hash(
    State(state): State<AppState>,
    Json(body): Json<FindByContentHashRequest>,
) -> Result<Json<Option<Entry>>, ApiError> {
    Ok(Json(state.entries.find_by_content_hash(
        &body.namespace,
        &body.key,
        &body.content_hash,
    )?))
}

/// GET /entries
pub async fn list_entries(
    State(state): State<AppState>,
    Query(params): Query<EntryListParams>,
) -> Result<Json<PaginationResult<Entry>>, ApiError> {
    let opts = state.page_opts(PageParams {
        cursor: params.cursor,
        num_items: params.num_items,
        maximum_bytes_read: params.maximum_bytes_read,
        maximum_rows_read: params.maximum_rows_read,
    });
    Ok(Json(state.entries.list(
        params.namespace_id,
        params.status,
        params.order,
        &opts,
    )?))
}

/// GET /entries/{id}
pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Entry>, ApiError> {
    state
        .entries
        .get(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Entry {} not found", id)))
}

/// POST /entries/{id}/promote
pub async fn promote_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Promotion<Entry>>, ApiError> {
    Ok(Json(state.entries.promote_to_ready(id)?))
}

/// POST /entries/{id}/delete
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.entries.delete_async(id, params.start_order.unwrap_or(0))?;
    Ok(Json(DeleteResponse {
        entry_id: id,
        queued: true,
    }))
}

// =============================================================================
// Chunks
// =============================================================================

/// POST /chunks/{entry_id}/insert
pub async fn insert_chunks(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<InsertChunksRequest>,
) -> Result<Json<InsertResult>, ApiError> {
    Ok(Json(state.chunks.insert(entry_id, body.chunks, body.start_order)?))
}

/// GET /chunks/{entry_id}
pub async fn list_chunks(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<PaginationResult<Chunk>>, ApiError> {
    let opts = state.page_opts(params);
    Ok(Json(state.chunks.list(entry_id, &opts)?))
}

/// POST /chunks/{entry_id}/replace_page
pub async fn replace_chunks_page(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<ReplacePageRequest>,
) -> Result<Json<ReplaceResult>, ApiError> {
    Ok(Json(state.chunks.replace_chunks_page(entry_id, body.start_order)?))
}

// =============================================================================
// Search
// =============================================================================

/// POST /search - vector search by embedding, or by query text embedded
/// with the server's provider.
pub async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, ApiError> {
    let limit = state.search_limit(body.limit);
    let threshold = body
        .vector_score_threshold
        .or(state.config.search.vector_score_threshold);

    let response = match (body.embedding, body.query) {
        (Some(embedding), None) => state.search.search(&SearchRequest {
            namespace: body.namespace,
            embedding,
            filters: body.filters,
            limit,
            chunk_context: body.chunk_context,
            vector_score_threshold: threshold,
        })?,
        (None, Some(query)) => {
            if query.trim().is_empty() {
                return Err(ApiError::BadRequest("'query' must not be empty".to_string()));
            }
            state
                .search
                .search_text(&TextSearchRequest {
                    namespace: body.namespace,
                    query,
                    filters: body.filters,
                    limit,
                    chunk_context: body.chunk_context,
                    vector_score_threshold: threshold,
                    semantic_weight: None,
                })
                .await?
        }
        _ => {
            return Err(ApiError::BadRequest(
                "Exactly one of 'embedding' and 'query' is required".to_string(),
            ))
        }
    };

    Ok(Json(response))
}

/// POST /search/hybrid - keyword and vector search blended by rank.
pub async fn search_hybrid(
    State(state): State<AppState>,
    Json(body): Json<HybridSearchBody>,
) -> Result<Json<SearchResponse>, ApiError> {
    if body.query.trim().is_empty() {
        return Err(ApiError::BadRequest("'query' must not be empty".to_string()));
    }

    let request = TextSearchRequest {
        limit: state.search_limit(body.limit),
        vector_score_threshold: body
            .vector_score_threshold
            .or(state.config.search.vector_score_threshold),
        semantic_weight: Some(
            body.semantic_weight
                .unwrap_or(state.config.search.semantic_weight),
        ),
        namespace: body.namespace,
        query: body.query,
        filters: body.filters,
        chunk_context: body.chunk_context,
    };
    Ok(Json(state.search.hybrid_search(&request).await?))
}

// =============================================================================
// Health
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let stats = storage_stats(&state.database)?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        ready_namespaces: stats.ready_namespaces,
        pending_deletions: stats.queued_deletions,
    }))
}
