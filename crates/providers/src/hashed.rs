//! Offline, deterministic embeddings via signed feature hashing.
//!
//! Each identifier-like token (and each adjacent token pair) is hashed with
//! blake3 into one of `dims` buckets with a ±1 sign; the result is
//! L2-normalized. Identical input always yields bit-identical vectors, which
//! keeps retrieval reproducible without a model download.

use crate::{EmbedResponse, EmbeddingProvider, ProviderError};

pub const DEFAULT_DIMS: usize = 384;

#[derive(Debug, Clone)]
pub struct HashedEmbedding {
    dims: usize,
    model: String,
}

impl HashedEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            model: format!("hashed-blake3-{dims}"),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return vector;
        }
        let tokens: Vec<String> = text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();

        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes());
        }
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, joined.as_bytes());
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8]) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut idx = [0u8; 8];
        idx.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(idx) % self.dims as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

impl Default for HashedEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_DIMS)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashedEmbedding {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: texts.iter().map(|t| self.embed_text(t)).collect(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_have_configured_dims_and_unit_norm() {
        let e = HashedEmbedding::default();
        let v = e.embed_text("def hello_world(): pass");
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn identical_text_is_bit_identical() {
        let e = HashedEmbedding::new(64);
        assert_eq!(e.embed_text("select * from users"), e.embed_text("select * from users"));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashedEmbedding::new(16);
        assert!(e.embed_text("   ").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn embed_preserves_order() {
        let e = HashedEmbedding::new(32);
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let resp = e.embed(&texts).await.unwrap();
        assert_eq!(resp.vectors[0], e.embed_text("alpha beta"));
        assert_eq!(resp.vectors[1], e.embed_text("gamma delta"));
    }
}
