//! Recall vector crate - chunking, embedding providers, hybrid ranking,
//! search, and the ingestion pipeline.
//!
//! Storage lives in `recall-storage`; this crate turns text into chunks and
//! vectors and turns stored chunks back into ranked results.

pub mod chunker;
pub mod embedding;
pub mod hybrid;
pub mod pipeline;
pub mod search;

pub use chunker::FixedSizeChunker;
pub use embedding::{check_model, DynEmbeddingProvider, EmbeddingProvider, MockEmbedding};
pub use hybrid::HybridRanker;
pub use pipeline::{BatchFailure, BatchReport, Document, IngestPipeline, IngestResult};
pub use search::{
    cosine_similarity, ChunkContext, SearchEngine, SearchRequest, SearchResponse, SearchResult,
    TextSearchRequest,
};
