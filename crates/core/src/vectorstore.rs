use crate::embeddings::cosine_similarity;
use crate::models::Chunk;
use providers::qdrant::{match_filter, QdrantClient, QdrantPoint};
use providers::ProviderError;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const SCAN_ID_KEY: &str = "scan_id";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("dimension mismatch: {chunks} chunks but {vectors} vectors")]
    DimensionMismatch { chunks: usize, vectors: usize },
    #[error("vector has {actual} dimensions, collection expects {expected}")]
    VectorSize { expected: usize, actual: usize },
    #[error("vector backend: {0}")]
    Backend(String),
}

impl From<ProviderError> for IndexError {
    fn from(e: ProviderError) -> Self {
        IndexError::Backend(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub score: f32,
    pub chunk: Chunk,
}

/// Equality filter on a payload key. Dotted keys (`metadata.chunk_index`)
/// address nested fields.
pub type PayloadFilter = (String, Value);

#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    fn dims(&self) -> usize;

    /// Idempotent.
    async fn ensure_collection(&self) -> Result<(), IndexError>;

    /// Stores one point per `(chunk, vector)` pair tagged with `scan_id`.
    /// Returns the number of points written.
    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>], scan_id: &str) -> Result<usize, IndexError>;

    async fn query(&self, vector: &[f32], limit: usize, filters: &[PayloadFilter]) -> Result<Vec<ScoredChunk>, IndexError>;

    async fn delete_by_scan(&self, scan_id: &str) -> Result<(), IndexError>;

    async fn count_by_scan(&self, scan_id: &str) -> Result<u64, IndexError>;
}

fn check_lengths(dims: usize, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
    if chunks.len() != vectors.len() {
        return Err(IndexError::DimensionMismatch {
            chunks: chunks.len(),
            vectors: vectors.len(),
        });
    }
    check_vectors(dims, vectors)
}

fn check_vectors(dims: usize, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
    vectors.iter().try_for_each(|v| check_dims(dims, v))
}

fn check_dims(dims: usize, vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() != dims {
        return Err(IndexError::VectorSize {
            expected: dims,
            actual: vector.len(),
        });
    }
    Ok(())
}

fn payload_for(chunk: &Chunk, scan_id: &str) -> Result<HashMap<String, Value>, IndexError> {
    let value = serde_json::to_value(chunk).map_err(|e| IndexError::Backend(e.to_string()))?;
    let mut payload: HashMap<String, Value> = match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    };
    payload.insert(SCAN_ID_KEY.to_string(), Value::String(scan_id.to_string()));
    Ok(payload)
}

fn chunk_from_payload(payload: Value) -> Result<Chunk, IndexError> {
    serde_json::from_value(payload).map_err(|e| IndexError::Backend(format!("malformed payload: {e}")))
}

fn lookup<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(payload, |v, part| v.get(part))
}

struct StoredPoint {
    vector: Vec<f32>,
    payload: Value,
}

/// Brute-force cosine search over points held in memory.
pub struct InMemoryIndex {
    dims: usize,
    points: RwLock<Vec<StoredPoint>>,
}

impl InMemoryIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            points: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn ensure_collection(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>], scan_id: &str) -> Result<usize, IndexError> {
        check_lengths(self.dims, chunks, vectors)?;
        let mut new_points = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let payload = payload_for(chunk, scan_id)?;
            new_points.push(StoredPoint {
                vector: vector.clone(),
                payload: Value::Object(payload.into_iter().collect()),
            });
        }
        let written = new_points.len();
        self.points.write().await.extend(new_points);
        Ok(written)
    }

    async fn query(&self, vector: &[f32], limit: usize, filters: &[PayloadFilter]) -> Result<Vec<ScoredChunk>, IndexError> {
        check_dims(self.dims, vector)?;
        let points = self.points.read().await;
        let mut scored: Vec<(f32, &StoredPoint)> = points
            .iter()
            .filter(|p| filters.iter().all(|(k, v)| lookup(&p.payload, k) == Some(v)))
            .map(|p| (cosine_similarity(vector, &p.vector), p))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
            .into_iter()
            .map(|(score, p)| {
                Ok(ScoredChunk {
                    score,
                    chunk: chunk_from_payload(p.payload.clone())?,
                })
            })
            .collect()
    }

    async fn delete_by_scan(&self, scan_id: &str) -> Result<(), IndexError> {
        let mut points = self.points.write().await;
        points.retain(|p| p.payload.get(SCAN_ID_KEY).and_then(Value::as_str) != Some(scan_id));
        Ok(())
    }

    async fn count_by_scan(&self, scan_id: &str) -> Result<u64, IndexError> {
        let points = self.points.read().await;
        Ok(points
            .iter()
            .filter(|p| p.payload.get(SCAN_ID_KEY).and_then(Value::as_str) == Some(scan_id))
            .count() as u64)
    }
}

/// Points per upsert request.
const QDRANT_UPSERT_BATCH: usize = 256;

pub struct QdrantIndex {
    client: QdrantClient,
    dims: usize,
}

impl QdrantIndex {
    pub fn new(client: QdrantClient, dims: usize) -> Self {
        Self { client, dims }
    }
}

#[async_trait::async_trait]
impl VectorIndex for QdrantIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn ensure_collection(&self) -> Result<(), IndexError> {
        self.client.ensure_collection(self.dims).await?;
        Ok(())
    }

    async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>], scan_id: &str) -> Result<usize, IndexError> {
        check_lengths(self.dims, chunks, vectors)?;
        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            points.push(QdrantPoint {
                id: uuid::Uuid::new_v4().to_string(),
                vector: vector.clone(),
                payload: payload_for(chunk, scan_id)?,
            });
        }
        let written = points.len();
        let mut points = points.into_iter().peekable();
        while points.peek().is_some() {
            let batch: Vec<QdrantPoint> = points.by_ref().take(QDRANT_UPSERT_BATCH).collect();
            debug!(collection = self.client.collection(), points = batch.len(), "upserting batch");
            self.client.upsert(batch).await?;
        }
        info!(collection = self.client.collection(), scan_id, points = written, "indexed chunks");
        Ok(written)
    }

    async fn query(&self, vector: &[f32], limit: usize, filters: &[PayloadFilter]) -> Result<Vec<ScoredChunk>, IndexError> {
        check_dims(self.dims, vector)?;
        let filter = match_filter(filters.iter().map(|(k, v)| (k.as_str(), v)));
        let resp = self.client.search(vector.to_vec(), limit as u64, filter).await?;
        resp.result
            .into_iter()
            .filter_map(|hit| hit.payload.map(|p| (hit.score, p)))
            .map(|(score, payload)| {
                Ok(ScoredChunk {
                    score,
                    chunk: chunk_from_payload(payload)?,
                })
            })
            .collect()
    }

    async fn delete_by_scan(&self, scan_id: &str) -> Result<(), IndexError> {
        let value = Value::String(scan_id.to_string());
        if let Some(filter) = match_filter([(SCAN_ID_KEY, &value)]) {
            self.client.delete_by_filter(filter).await?;
        }
        Ok(())
    }

    async fn count_by_scan(&self, scan_id: &str) -> Result<u64, IndexError> {
        let value = Value::String(scan_id.to_string());
        Ok(self.client.count(match_filter([(SCAN_ID_KEY, &value)])).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(path: &str, language: &str, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            file_path: path.to_string(),
            language: language.to_string(),
            start_line: 1,
            end_line: 1,
            metadata: ChunkMetadata::default(),
        }
    }

    #[tokio::test]
    async fn upsert_rejects_length_mismatch() {
        let index = InMemoryIndex::new(2);
        let err = index
            .upsert(&[chunk("a.py", "python", "x")], &[], "s1")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { chunks: 1, vectors: 0 }));
        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_vector_size() {
        let index = InMemoryIndex::new(3);
        let err = index
            .upsert(&[chunk("a.py", "python", "x")], &[vec![1.0, 0.0]], "s1")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::VectorSize { expected: 3, actual: 2 }));
    }

    #[tokio::test]
    async fn query_ranks_by_score_and_filters_by_payload() {
        let index = InMemoryIndex::new(2);
        let chunks = vec![
            chunk("a.py", "python", "near"),
            chunk("b.py", "python", "far"),
            chunk("c.js", "javascript", "nearest but js"),
        ];
        let vectors = vec![vec![0.9, 0.1], vec![0.0, 1.0], vec![1.0, 0.0]];
        assert_eq!(index.upsert(&chunks, &vectors, "s1").await.unwrap(), 3);

        let hits = index
            .query(&[1.0, 0.0], 3, &[("language".into(), Value::from("python"))])
            .await
            .unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.chunk.file_path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.py"]);
        assert!(hits[0].score > hits[1].score);

        let top = index.query(&[1.0, 0.0], 1, &[]).await.unwrap();
        assert_eq!(top[0].chunk.file_path, "c.js");
    }

    #[tokio::test]
    async fn delete_by_scan_only_touches_that_scan() {
        let index = InMemoryIndex::new(2);
        let c = vec![chunk("a.py", "python", "x"), chunk("b.py", "python", "y")];
        let v = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        index.upsert(&c, &v, "keep").await.unwrap();
        index.upsert(&c, &v, "drop").await.unwrap();

        index.delete_by_scan("drop").await.unwrap();
        assert_eq!(index.count_by_scan("drop").await.unwrap(), 0);
        assert_eq!(index.count_by_scan("keep").await.unwrap(), 2);

        index.delete_by_scan("never-existed").await.unwrap();
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn nested_keys_filter_on_metadata() {
        let index = InMemoryIndex::new(2);
        let mut second = chunk("a.py", "python", "y");
        second.metadata.chunk_index = 1;
        index
            .upsert(&[chunk("a.py", "python", "x"), second], &[vec![1.0, 0.0], vec![1.0, 0.0]], "s")
            .await
            .unwrap();
        let hits = index
            .query(&[1.0, 0.0], 10, &[("metadata.chunk_index".into(), Value::from(1))])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.content, "y");
    }

    #[test]
    fn payload_is_flat_chunk_plus_scan_tag() {
        let payload = payload_for(&chunk("a.py", "python", "x"), "scan-9").unwrap();
        assert_eq!(payload["scan_id"], "scan-9");
        assert_eq!(payload["language"], "python");
        assert_eq!(payload["metadata"]["chunk_index"], 0);
    }
}
