//! Language-model analysis with an ordered provider/model fallback chain.
//!
//! Each call builds one prompt and walks the candidates in order until one
//! returns a reply that parses into the report schema. When every candidate
//! fails the call still returns normally, as [`AnalysisOutcome::Exhausted`].

pub mod prompt;
pub mod response;

use crate::cancel::CancelToken;
use crate::models::Chunk;
use providers::{GenerateRequest, LlmProvider, ProviderError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use response::{AnalysisItem, StructuredFindings};

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("unparseable reply: {0}")]
    Parse(String),
    #[error("cancelled")]
    Cancelled,
}

/// One `(provider, model)` entry of the chain.
#[derive(Clone)]
pub struct Candidate {
    pub provider_name: String,
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub system: Option<String>,
}

impl Candidate {
    pub fn new(provider_name: &str, provider: Arc<dyn LlmProvider>, model: &str) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            provider,
            model: model.to_string(),
            system: None,
        }
    }

    pub fn with_system(mut self, system: &str) -> Self {
        self.system = Some(system.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
    pub context_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            temperature: 0.1,
            max_tokens: 4000,
            context_limit: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Succeeded {
        findings: StructuredFindings,
        provider: String,
        model: String,
    },
    Exhausted,
}

impl AnalysisOutcome {
    pub fn into_findings(self) -> StructuredFindings {
        match self {
            AnalysisOutcome::Succeeded { findings, .. } => findings,
            AnalysisOutcome::Exhausted => StructuredFindings::default(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, AnalysisOutcome::Exhausted)
    }
}

pub struct AnalysisEngine {
    candidates: Vec<Candidate>,
    settings: EngineSettings,
}

impl AnalysisEngine {
    pub fn new(candidates: Vec<Candidate>, settings: EngineSettings) -> Self {
        Self {
            candidates,
            settings,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn analyze(
        &self,
        code: &str,
        language: &str,
        file_path: &str,
        context: &[Chunk],
        cancel: &CancelToken,
    ) -> AnalysisOutcome {
        let prompt = prompt::build_prompt(code, language, file_path, context, self.settings.context_limit);

        for candidate in &self.candidates {
            match self.attempt(candidate, &prompt, cancel).await {
                Ok(findings) => {
                    info!(
                        file_path,
                        provider = %candidate.provider_name,
                        model = %candidate.model,
                        items = findings.len(),
                        "analysis succeeded"
                    );
                    return AnalysisOutcome::Succeeded {
                        findings,
                        provider: candidate.provider_name.clone(),
                        model: candidate.model.clone(),
                    };
                }
                Err(AttemptError::Cancelled) => {
                    debug!(file_path, "analysis cancelled");
                    return AnalysisOutcome::Exhausted;
                }
                Err(e) => {
                    warn!(
                        file_path,
                        provider = %candidate.provider_name,
                        model = %candidate.model,
                        error = %e,
                        "analysis attempt failed"
                    );
                }
            }
        }

        error!(file_path, candidates = self.candidates.len(), "all analysis providers failed");
        AnalysisOutcome::Exhausted
    }

    async fn attempt(
        &self,
        candidate: &Candidate,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<StructuredFindings, AttemptError> {
        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }
        let req = GenerateRequest {
            model: &candidate.model,
            prompt,
            system: candidate.system.as_deref(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            res = tokio::time::timeout(self.settings.timeout, candidate.provider.generate(&req)) => {
                res.map_err(|_| AttemptError::Timeout(self.settings.timeout))??
            }
        };
        response::parse_report(&reply.text).map_err(AttemptError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::GenerateResponse;
    use std::sync::Mutex;

    /// Replies per model from a fixed script and records the models it was asked for.
    struct Scripted {
        replies: Vec<(&'static str, Result<&'static str, ()>)>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<(&'static str, Result<&'static str, ()>)>) -> Arc<Self> {
            Arc::new(Self {
                replies,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for Scripted {
        async fn generate(&self, req: &GenerateRequest<'_>) -> Result<GenerateResponse, ProviderError> {
            self.seen.lock().unwrap().push(req.model.to_string());
            match self.replies.iter().find(|(m, _)| *m == req.model) {
                Some((_, Ok(text))) => Ok(GenerateResponse {
                    text: text.to_string(),
                    model: req.model.to_string(),
                }),
                _ => Err(ProviderError::RequestFailed("connection refused".into())),
            }
        }
    }

    struct Slow;

    #[async_trait::async_trait]
    impl LlmProvider for Slow {
        async fn generate(&self, _req: &GenerateRequest<'_>) -> Result<GenerateResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(ProviderError::NotImplemented)
        }
    }

    const ONE_VULN: &str = r#"{"vulnerabilities":[{"severity":"high","title":"Injection","start_line":1,"end_line":1}]}"#;

    fn settings() -> EngineSettings {
        EngineSettings {
            timeout: Duration::from_millis(200),
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn falls_through_to_secondary_provider() {
        let primary = Scripted::new(vec![("main", Err(())), ("backup", Ok("not json at all"))]);
        let secondary = Scripted::new(vec![("gpt", Ok(ONE_VULN))]);
        let engine = AnalysisEngine::new(
            vec![
                Candidate::new("ollama", primary.clone(), "main"),
                Candidate::new("ollama", primary.clone(), "backup"),
                Candidate::new("openai", secondary.clone(), "gpt"),
            ],
            settings(),
        );

        let outcome = engine
            .analyze("def f(p): return p", "python", "a.py", &[], &CancelToken::new())
            .await;
        match outcome {
            AnalysisOutcome::Succeeded { findings, provider, model } => {
                assert_eq!(findings.len(), 1);
                assert_eq!(provider, "openai");
                assert_eq!(model, "gpt");
            }
            AnalysisOutcome::Exhausted => panic!("expected success"),
        }
        assert_eq!(*primary.seen.lock().unwrap(), vec!["main", "backup"]);
    }

    #[tokio::test]
    async fn all_failing_is_exhausted_not_an_error() {
        let broken = Scripted::new(vec![]);
        let engine = AnalysisEngine::new(
            vec![
                Candidate::new("ollama", broken.clone(), "a"),
                Candidate::new("openai", broken.clone(), "b"),
            ],
            settings(),
        );
        let outcome = engine.analyze("x", "python", "a.py", &[], &CancelToken::new()).await;
        assert!(outcome.is_exhausted());
        assert!(outcome.into_findings().is_empty());
        assert_eq!(broken.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn timeout_advances_the_chain() {
        let fast = Scripted::new(vec![("m", Ok(ONE_VULN))]);
        let engine = AnalysisEngine::new(
            vec![
                Candidate::new("slow", Arc::new(Slow), "m"),
                Candidate::new("fast", fast, "m"),
            ],
            settings(),
        );
        let outcome = engine.analyze("x", "python", "a.py", &[], &CancelToken::new()).await;
        assert!(matches!(outcome, AnalysisOutcome::Succeeded { ref provider, .. } if provider == "fast"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_chain() {
        let fast = Scripted::new(vec![("m", Ok(ONE_VULN))]);
        let engine = AnalysisEngine::new(vec![Candidate::new("fast", fast.clone(), "m")], settings());
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = engine.analyze("x", "python", "a.py", &[], &cancel).await;
        assert!(outcome.is_exhausted());
        assert!(fast.seen.lock().unwrap().is_empty());
    }
}
