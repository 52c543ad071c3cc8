//! Embedding provider trait and a deterministic mock.
//!
//! The engine never computes embeddings itself; it calls out to an
//! [`EmbeddingProvider`] and treats its failures as `EmbeddingProvider`
//! errors. `MockEmbedding` provides deterministic hash-based vectors for
//! tests, benchmarks, and local runs.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;

use recall_core::error::{RecallError, Result};
use recall_core::types::Namespace;

/// Service for generating text embeddings.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;

    /// Model identifier recorded on namespaces built with this provider.
    fn model_id(&self) -> &str;
}

/// Object-safe version of [`EmbeddingProvider`] for dynamic dispatch.
///
/// `EmbeddingProvider::embed` returns `impl Future`, so it cannot be used
/// behind `dyn`. This trait boxes the future instead; every
/// `EmbeddingProvider` implements it through the blanket impl below.
pub trait DynEmbeddingProvider: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>>;

    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;
}

impl<T: EmbeddingProvider> DynEmbeddingProvider for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingProvider::dimensions(self)
    }

    fn model_id(&self) -> &str {
        EmbeddingProvider::model_id(self)
    }
}

/// Reject a provider whose model differs from the one `namespace` was built
/// with. Vectors from different models are not comparable even when their
/// dimensions agree.
pub fn check_model(namespace: &Namespace, embedder: &dyn DynEmbeddingProvider) -> Result<()> {
    if embedder.model_id() != namespace.model_id {
        return Err(RecallError::Validation(format!(
            "namespace {} uses model {}, embedding provider is {}",
            namespace.namespace,
            namespace.model_id,
            embedder.model_id()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        // L2-normalize so cosine similarity reduces to a dot product.
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(RecallError::EmbeddingProvider(
                "Cannot embed empty text".to_string(),
            ));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "mock-hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let service = MockEmbedding::default();
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), 384);

        let small = MockEmbedding::new(8);
        assert_eq!(small.embed("hello").await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::new(16);
        let v1 = service.embed("same text").await.unwrap();
        let v2 = service.embed("same text").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_different_inputs() {
        let service = MockEmbedding::new(16);
        let v1 = service.embed("text one").await.unwrap();
        let v2 = service.embed("text two").await.unwrap();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_is_normalized() {
        let v = MockEmbedding::new(32).embed("unit").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_embedding_rejects_empty() {
        let err = MockEmbedding::new(4).embed("").await.unwrap_err();
        assert!(matches!(err, RecallError::EmbeddingProvider(_)));
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let provider: Arc<dyn DynEmbeddingProvider> = Arc::new(MockEmbedding::new(8));
        assert_eq!(provider.dimensions(), 8);
        assert_eq!(provider.model_id(), "mock-hash");
        let v = provider.embed_boxed("boxed").await.unwrap();
        assert_eq!(v.len(), 8);
    }
}
