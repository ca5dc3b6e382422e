use providers::{EmbeddingProvider, ProviderError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("provider returned {actual} vectors for {expected} texts")]
    CountMismatch { expected: usize, actual: usize },
    #[error("expected {expected}-dimensional vectors, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Batching front for an [`EmbeddingProvider`]. Output is 1:1 and in input
/// order; every vector is checked against the configured dimension.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    dims: usize,
    batch_size: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dims: usize, batch_size: usize) -> Self {
        Self {
            provider,
            dims,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let resp = self.provider.embed(batch).await?;
            if resp.vectors.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    expected: batch.len(),
                    actual: resp.vectors.len(),
                });
            }
            for v in &resp.vectors {
                if v.len() != self.dims {
                    return Err(EmbedError::Dimension {
                        expected: self.dims,
                        actual: v.len(),
                    });
                }
            }
            out.extend(resp.vectors);
        }
        if !texts.is_empty() {
            debug!(count = out.len(), model = self.model_name(), "embedded texts");
        }
        Ok(out)
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbedError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::hashed::HashedEmbedding;
    use providers::EmbedResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        inner: HashedEmbedding,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for Counting {
        async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    struct ShortVectors;

    #[async_trait::async_trait]
    impl EmbeddingProvider for ShortVectors {
        async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
            Ok(EmbedResponse {
                vectors: texts.iter().map(|_| vec![0.5; 3]).collect(),
            })
        }

        fn model_name(&self) -> &str {
            "short"
        }
    }

    #[tokio::test]
    async fn empty_input_never_reaches_provider() {
        let provider = Arc::new(Counting {
            inner: HashedEmbedding::new(8),
            calls: AtomicUsize::new(0),
        });
        let embedder = Embedder::new(provider.clone(), 8, 4);
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batches_preserve_order_and_count() {
        let provider = Arc::new(Counting {
            inner: HashedEmbedding::new(16),
            calls: AtomicUsize::new(0),
        });
        let embedder = Embedder::new(provider.clone(), 16, 2);
        let texts: Vec<String> = (0..5).map(|i| format!("token_{i} body")).collect();
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(vectors[3], embedder.embed_one("token_3 body").await.unwrap());
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let embedder = Embedder::new(Arc::new(ShortVectors), 384, 8);
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbedError::Dimension { expected: 384, actual: 3 }));
    }

    #[test]
    fn cosine_of_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
