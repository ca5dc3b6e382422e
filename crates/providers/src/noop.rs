use crate::{
    EmbedResponse, EmbeddingProvider, GenerateRequest, GenerateResponse, LlmProvider,
    ProviderError,
};

/// Placeholder registered under `"noop"`; embeds to empty vectors and refuses
/// to generate.
#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for NoopProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: vec![vec![]; texts.len()],
        })
    }

    fn model_name(&self) -> &str {
        "noop"
    }
}

#[async_trait::async_trait]
impl LlmProvider for NoopProvider {
    async fn generate(
        &self,
        _req: &GenerateRequest<'_>,
    ) -> Result<GenerateResponse, ProviderError> {
        Err(ProviderError::NotImplemented)
    }
}
