//! Local Ollama server: `/api/generate` for completions, `/api/embed` for vectors.

use crate::{
    ensure_success, EmbedResponse, EmbeddingProvider, GenerateRequest, GenerateResponse,
    LlmProvider, ProviderError,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
}

#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    cfg: Arc<OllamaConfig>,
}

impl OllamaProvider {
    pub fn new(cfg: OllamaConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateApiResponse {
    #[serde(default)]
    response: String,
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, req: &GenerateRequest<'_>) -> Result<GenerateResponse, ProviderError> {
        let body = GenerateBody {
            model: req.model,
            prompt: req.prompt,
            system: req.system,
            stream: false,
            options: GenerateOptions {
                temperature: req.temperature,
                num_predict: req.max_tokens,
            },
        };
        debug!(model = req.model, prompt_len = req.prompt.len(), "ollama generate");
        let resp = self
            .client
            .post(self.endpoint("generate"))
            .json(&body)
            .send()
            .await?;
        let parsed: GenerateApiResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(GenerateResponse {
            text: parsed.response,
            model: req.model.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        #[derive(Serialize)]
        struct EmbedBody<'a> {
            model: &'a str,
            input: &'a [String],
        }
        #[derive(Deserialize)]
        struct EmbedApiResponse {
            embeddings: Vec<Vec<f32>>,
        }

        let resp = self
            .client
            .post(self.endpoint("embed"))
            .json(&EmbedBody {
                model: &self.cfg.embedding_model,
                input: texts,
            })
            .send()
            .await?;
        let parsed: EmbedApiResponse = ensure_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(EmbedResponse {
            vectors: parsed.embeddings,
        })
    }

    fn model_name(&self) -> &str {
        &self.cfg.embedding_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_body_disables_streaming() {
        let body = GenerateBody {
            model: "codellama:34b-instruct",
            prompt: "hi",
            system: None,
            stream: false,
            options: GenerateOptions {
                temperature: 0.1,
                num_predict: 4000,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 4000);
        assert!(json.get("system").is_none());
    }

    #[test]
    fn missing_response_field_decodes_empty() {
        let parsed: GenerateApiResponse = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(parsed.response.is_empty());
    }
}
