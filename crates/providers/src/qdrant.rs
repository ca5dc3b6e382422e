use crate::{ensure_success, ProviderError};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct QdrantClient {
    client: Client,
    cfg: QdrantConfig,
}

impl QdrantClient {
    pub fn new(cfg: QdrantConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    pub fn collection(&self) -> &str {
        &self.cfg.collection
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.cfg.url.trim_end_matches('/'),
            self.cfg.collection,
            suffix
        )
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.cfg.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    pub async fn collection_exists(&self) -> Result<bool, ProviderError> {
        let resp = self
            .authed(self.client.get(self.collection_url("")))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(resp).await?;
        Ok(true)
    }

    pub async fn create_collection(&self, dims: usize) -> Result<(), ProviderError> {
        #[derive(Serialize)]
        struct VectorParams {
            size: usize,
            distance: &'static str,
        }
        #[derive(Serialize)]
        struct CreateCollection {
            vectors: VectorParams,
        }
        let body = CreateCollection {
            vectors: VectorParams {
                size: dims,
                distance: "Cosine",
            },
        };
        let resp = self
            .authed(self.client.put(self.collection_url("")).json(&body))
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    /// Creates the collection unless it already exists. Returns `true` when created.
    pub async fn ensure_collection(&self, dims: usize) -> Result<bool, ProviderError> {
        if self.collection_exists().await? {
            debug!(collection = %self.cfg.collection, "collection exists");
            return Ok(false);
        }
        info!(collection = %self.cfg.collection, dims, "creating collection");
        self.create_collection(dims).await?;
        Ok(true)
    }

    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<serde_json::Value>,
    ) -> Result<QdrantSearchResponse, ProviderError> {
        #[derive(Serialize)]
        struct SearchRequest {
            vector: Vec<f32>,
            limit: u64,
            with_payload: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            filter: Option<serde_json::Value>,
        }
        let body = SearchRequest {
            vector,
            limit,
            with_payload: true,
            filter,
        };
        let resp = self
            .authed(
                self.client
                    .post(self.collection_url("/points/search"))
                    .json(&body),
            )
            .send()
            .await?;
        let parsed: QdrantSearchResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed)
    }

    pub async fn upsert(&self, points: Vec<QdrantPoint>) -> Result<(), ProviderError> {
        let req = QdrantUpsert { points };
        let resp = self
            .authed(
                self.client
                    .put(self.collection_url("/points?wait=true"))
                    .json(&req),
            )
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    pub async fn count(&self, filter: Option<serde_json::Value>) -> Result<u64, ProviderError> {
        #[derive(Serialize)]
        struct CountRequest {
            exact: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            filter: Option<serde_json::Value>,
        }
        #[derive(Deserialize)]
        struct CountResult {
            count: u64,
        }
        #[derive(Deserialize)]
        struct CountResponse {
            result: CountResult,
        }
        let resp = self
            .authed(
                self.client
                    .post(self.collection_url("/points/count"))
                    .json(&CountRequest {
                        exact: true,
                        filter,
                    }),
            )
            .send()
            .await?;
        let parsed: CountResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed.result.count)
    }

    pub async fn delete_by_filter(&self, filter: serde_json::Value) -> Result<(), ProviderError> {
        #[derive(Serialize)]
        struct DeletePoints {
            filter: serde_json::Value,
        }
        let body = DeletePoints { filter };
        let resp = self
            .authed(
                self.client
                    .post(self.collection_url("/points/delete?wait=true"))
                    .json(&body),
            )
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }
}

/// Builds a `must` filter of exact-match conditions. Returns `None` for no pairs.
pub fn match_filter<'a, I>(pairs: I) -> Option<serde_json::Value>
where
    I: IntoIterator<Item = (&'a str, &'a serde_json::Value)>,
{
    let must: Vec<serde_json::Value> = pairs
        .into_iter()
        .map(|(key, value)| serde_json::json!({ "key": key, "match": { "value": value } }))
        .collect();
    if must.is_empty() {
        None
    } else {
        Some(serde_json::json!({ "must": must }))
    }
}

#[derive(Debug, Serialize)]
pub struct QdrantUpsert {
    pub points: Vec<QdrantPoint>,
}

#[derive(Debug, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct QdrantSearchResponse {
    pub result: Vec<SearchResult>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchResult {
    pub id: serde_json::Value,
    pub score: f32,
    pub payload: Option<serde_json::Value>,
}
