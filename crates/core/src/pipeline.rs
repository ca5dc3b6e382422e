use crate::analysis::prompt::{MAX_CONTEXT_CHUNKS, SYSTEM_PROMPT};
use crate::analysis::{AnalysisEngine, Candidate, EngineSettings};
use crate::cancel::CancelToken;
use crate::chunker::Chunker;
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::models::{Chunk, FileRecord, Finding, ScanResult};
use crate::scanner::{self, IngestOptions};
use crate::source::{GitSourceProvider, ScanSource, SourceProvider, WorkingCopy};
use crate::vectorstore::{InMemoryIndex, QdrantIndex, VectorIndex, SCAN_ID_KEY};
use anyhow::{anyhow, Context};
use futures::stream::{self, StreamExt};
use providers::hashed::HashedEmbedding;
use providers::noop::NoopProvider;
use providers::ollama::{OllamaConfig, OllamaProvider};
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::qdrant::{QdrantClient, QdrantConfig};
use providers::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub source: ScanSource,
    /// Overrides the configured include globs when non-empty.
    pub include: Vec<String>,
    /// Overrides the configured exclude globs when non-empty.
    pub exclude: Vec<String>,
    /// Relative paths to keep; empty keeps every ingested file.
    pub files: Vec<String>,
    pub scan_id: Option<String>,
}

impl ScanRequest {
    pub fn new(source: ScanSource) -> Self {
        Self {
            source,
            include: Vec::new(),
            exclude: Vec::new(),
            files: Vec::new(),
            scan_id: None,
        }
    }
}

/// Sequences one scan: ingest, chunk, embed, index, then analyze file by file.
pub struct ScanOrchestrator {
    chunker: Arc<Chunker>,
    embedder: Arc<Embedder>,
    index: Arc<dyn VectorIndex>,
    engine: Arc<AnalysisEngine>,
    source: Arc<dyn SourceProvider>,
    ingest: IngestOptions,
    concurrency: usize,
    context_limit: usize,
}

impl ScanOrchestrator {
    pub fn new(
        chunker: Arc<Chunker>,
        embedder: Arc<Embedder>,
        index: Arc<dyn VectorIndex>,
        engine: Arc<AnalysisEngine>,
        source: Arc<dyn SourceProvider>,
    ) -> Self {
        let context_limit = engine.settings().context_limit.min(MAX_CONTEXT_CHUNKS);
        Self {
            chunker,
            embedder,
            index,
            engine,
            source,
            ingest: IngestOptions::default(),
            concurrency: 1,
            context_limit,
        }
    }

    pub fn with_ingest_options(mut self, ingest: IngestOptions) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn index(&self) -> Arc<dyn VectorIndex> {
        self.index.clone()
    }

    pub fn embedder(&self) -> Arc<Embedder> {
        self.embedder.clone()
    }

    pub async fn scan(&self, req: ScanRequest) -> ScanResult {
        self.scan_with_cancel(req, &CancelToken::new()).await
    }

    /// Never fails: errors before analysis finalize the result as `Failed`,
    /// per-file errors skip that file.
    pub async fn scan_with_cancel(&self, req: ScanRequest, cancel: &CancelToken) -> ScanResult {
        let scan_id = req
            .scan_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut result = ScanResult::new(&scan_id, req.source.to_string());
        result.mark_in_progress();
        info!(scan_id = %scan_id, source = %req.source, "starting scan");

        let working = match cancel.run(self.source.acquire(&req.source)).await {
            Some(Ok(w)) => w,
            Some(Err(e)) => {
                error!(scan_id = %scan_id, error = %e, "source acquisition failed");
                return result.fail(e.to_string());
            }
            None => return result.fail("scan cancelled"),
        };

        let files = match self.prepare(&req, &working, &scan_id, cancel).await {
            Ok(files) => files,
            Err(e) => {
                error!(scan_id = %scan_id, error = %format!("{e:#}"), "scan failed");
                release(working, &scan_id);
                return result.fail(format!("{e:#}"));
            }
        };
        result.total_files = files.len();

        let (findings, scanned) = self.analyze_files(&files, &scan_id, cancel).await;
        release(working, &scan_id);

        if cancel.is_cancelled() {
            warn!(scan_id = %scan_id, scanned, "scan cancelled during analysis");
            return result.fail("scan cancelled");
        }

        let result = result.complete(findings, scanned);
        let duration = result
            .completed_at
            .map(|done| (done - result.started_at).num_milliseconds())
            .unwrap_or_default();
        info!(
            scan_id = %scan_id,
            files = result.total_files,
            scanned = result.scanned_files,
            findings = result.findings.len(),
            duration_ms = duration,
            "scan completed"
        );
        result
    }

    /// Ingestion, chunking, embedding and indexing. Any error here is fatal.
    async fn prepare(
        &self,
        req: &ScanRequest,
        working: &WorkingCopy,
        scan_id: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<Vec<FileRecord>> {
        let mut opts = self.ingest.clone();
        if !req.include.is_empty() {
            opts.include = req.include.clone();
        }
        if !req.exclude.is_empty() {
            opts.exclude = req.exclude.clone();
        }
        let root = working.path().to_path_buf();
        let mut files = tokio::task::spawn_blocking(move || scanner::ingest(&root, &opts))
            .await
            .context("ingestion task panicked")??;
        if !req.files.is_empty() {
            files.retain(|f| req.files.iter().any(|p| p == &f.relative_path));
        }
        info!(scan_id, files = files.len(), "files to scan");

        let chunks: Vec<Chunk> = files.iter().flat_map(|f| self.chunker.chunk_file(f)).collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        self.index
            .ensure_collection()
            .await
            .context("vector collection bootstrap")?;
        let vectors = cancel
            .run(self.embedder.embed(&texts))
            .await
            .ok_or_else(|| anyhow!("scan cancelled"))?
            .context("embedding chunks")?;
        let written = cancel
            .run(self.index.upsert(&chunks, &vectors, scan_id))
            .await
            .ok_or_else(|| anyhow!("scan cancelled"))?
            .context("indexing chunks")?;
        debug!(scan_id, chunks = written, "chunks indexed");
        Ok(files)
    }

    /// Results come back in file order regardless of `concurrency`.
    async fn analyze_files(
        &self,
        files: &[FileRecord],
        scan_id: &str,
        cancel: &CancelToken,
    ) -> (Vec<Finding>, usize) {
        let outcomes: Vec<Option<Vec<Finding>>> = stream::iter(files)
            .map(|file| async move {
                match self.analyze_file(file, scan_id, cancel).await {
                    Ok(found) => {
                        debug!(scan_id, file_path = %file.relative_path, findings = found.len(), "file analyzed");
                        Some(found)
                    }
                    Err(e) => {
                        error!(scan_id, file_path = %file.relative_path, error = %format!("{e:#}"), "failed to analyze file");
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut findings = Vec::new();
        let mut scanned = 0usize;
        for found in outcomes.into_iter().flatten() {
            scanned += 1;
            findings.extend(found);
        }
        (findings, scanned)
    }

    async fn analyze_file(
        &self,
        file: &FileRecord,
        scan_id: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<Vec<Finding>> {
        if cancel.is_cancelled() {
            anyhow::bail!("scan cancelled");
        }
        let vector = self
            .embedder
            .embed_one(&file.content)
            .await
            .context("embedding file")?;
        let filters = [
            (SCAN_ID_KEY.to_string(), serde_json::json!(scan_id)),
            ("language".to_string(), serde_json::json!(file.language)),
        ];
        let context: Vec<Chunk> = self
            .index
            .query(&vector, self.context_limit, &filters)
            .await
            .context("retrieving context")?
            .into_iter()
            .map(|hit| hit.chunk)
            .collect();

        let outcome = self
            .engine
            .analyze(&file.content, &file.language, &file.relative_path, &context, cancel)
            .await;
        if cancel.is_cancelled() {
            anyhow::bail!("scan cancelled");
        }
        Ok(outcome
            .into_findings()
            .items
            .into_iter()
            .map(|item| item.into_finding(file))
            .collect())
    }
}

fn release(working: WorkingCopy, scan_id: &str) {
    let temporary = working.is_temporary();
    let path = working.path().display().to_string();
    match working.release() {
        Ok(()) if temporary => debug!(scan_id, path = %path, "working copy removed"),
        Ok(()) => {}
        Err(e) => warn!(scan_id, path = %path, error = %e, "failed to remove working copy"),
    }
}

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new()
        .with_embedding("noop", Arc::new(NoopProvider))
        .with_llm("noop", Arc::new(NoopProvider))
        .with_embedding("hashed", Arc::new(HashedEmbedding::new(config.embeddings.dims)));

    let primary = &config.analysis.primary;
    let ollama_url = config
        .embeddings
        .base_url
        .clone()
        .filter(|_| config.embeddings.provider == "ollama")
        .or_else(|| primary.base_url.clone().filter(|_| primary.provider == "ollama"))
        .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
    let ollama = OllamaProvider::new(OllamaConfig {
        base_url: ollama_url,
        embedding_model: config.embeddings.model.clone(),
    });
    reg = reg
        .with_embedding("ollama", Arc::new(ollama.clone()))
        .with_llm("ollama", Arc::new(ollama));

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let secondary = &config.analysis.secondary;
        let base_url = secondary
            .base_url
            .clone()
            .filter(|_| secondary.provider == "openai")
            .or_else(|| config.embeddings.base_url.clone().filter(|_| config.embeddings.provider == "openai"))
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key,
            base_url,
            embedding_model: config.embeddings.model.clone(),
        });
        reg = reg
            .with_embedding("openai", Arc::new(provider.clone()))
            .with_llm("openai", Arc::new(provider));
    }

    reg
}

pub fn build_embedder(config: &AppConfig, registry: &ProviderRegistry) -> anyhow::Result<Embedder> {
    let provider = registry
        .embedding(&config.embeddings.provider)
        .with_context(|| format!("embedding provider {}", config.embeddings.provider))?;
    Ok(Embedder::new(provider, config.embeddings.dims, config.embeddings.batch_size))
}

pub fn build_index(config: &AppConfig) -> anyhow::Result<Arc<dyn VectorIndex>> {
    if config.vectors.dims != config.embeddings.dims {
        anyhow::bail!(
            "vectors.dims ({}) must equal embeddings.dims ({})",
            config.vectors.dims,
            config.embeddings.dims
        );
    }
    match config.vectors.provider.as_str() {
        "qdrant" => {
            let url = config
                .vectors
                .url
                .clone()
                .ok_or_else(|| anyhow!("vectors.url is required for qdrant"))?;
            let client = QdrantClient::new(QdrantConfig {
                url,
                collection: config.vectors.collection.clone(),
                api_key: std::env::var("QDRANT_API_KEY").ok(),
            });
            Ok(Arc::new(QdrantIndex::new(client, config.vectors.dims)))
        }
        "memory" => Ok(Arc::new(InMemoryIndex::new(config.vectors.dims))),
        other => anyhow::bail!("unknown vector provider: {other}"),
    }
}

/// Primary model, then the primary's fallback model when it differs, then the
/// secondary provider when enabled and registered.
pub fn build_engine(config: &AppConfig, registry: &ProviderRegistry) -> AnalysisEngine {
    let analysis = &config.analysis;
    let candidate = |name: &str, model: &str| {
        registry.llm(name).ok().map(|provider| {
            let c = Candidate::new(name, provider, model);
            if name == "openai" {
                c.with_system(SYSTEM_PROMPT)
            } else {
                c
            }
        })
    };

    let mut candidates = Vec::new();
    let primary = &analysis.primary;
    match candidate(&primary.provider, &primary.model) {
        Some(c) => {
            candidates.push(c);
            if let Some(fallback) = primary.fallback_model.as_deref() {
                if fallback != primary.model {
                    candidates.extend(candidate(&primary.provider, fallback));
                }
            }
        }
        None => warn!(provider = %primary.provider, "primary analysis provider not available"),
    }

    let secondary = &analysis.secondary;
    if secondary.enabled {
        match candidate(&secondary.provider, &secondary.model) {
            Some(c) => candidates.push(c),
            None => warn!(provider = %secondary.provider, "secondary analysis provider enabled but not configured"),
        }
    }

    AnalysisEngine::new(
        candidates,
        EngineSettings {
            timeout: Duration::from_secs(analysis.timeout_secs),
            temperature: analysis.temperature,
            max_tokens: analysis.max_tokens,
            context_limit: analysis.context_limit,
        },
    )
}

/// Wires every component from configuration. Clients are built once here and
/// shared by reference count.
pub fn build_orchestrator(config: &AppConfig) -> anyhow::Result<ScanOrchestrator> {
    let registry = build_registry(config);
    let chunker = Chunker::from_config(&config.chunking)?;
    let embedder = build_embedder(config, &registry)?;
    let index = build_index(config)?;
    let engine = build_engine(config, &registry);
    Ok(ScanOrchestrator::new(
        Arc::new(chunker),
        Arc::new(embedder),
        index,
        Arc::new(engine),
        Arc::new(GitSourceProvider::new()),
    )
    .with_ingest_options(IngestOptions::from_config(&config.scan))
    .with_concurrency(config.analysis.concurrency))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_skips_identical_fallback_model() {
        let mut cfg = AppConfig::default();
        cfg.analysis.primary.fallback_model = Some(cfg.analysis.primary.model.clone());
        let engine = build_engine(&cfg, &build_registry(&cfg));
        assert_eq!(engine.candidates().len(), 1);
    }

    #[test]
    fn engine_orders_primary_fallback_secondary() {
        let mut cfg = AppConfig::default();
        cfg.analysis.secondary.enabled = true;
        cfg.analysis.secondary.provider = "noop".into();
        cfg.analysis.secondary.model = "none".into();
        let engine = build_engine(&cfg, &build_registry(&cfg));
        let chain: Vec<(&str, &str)> = engine
            .candidates()
            .iter()
            .map(|c| (c.provider_name.as_str(), c.model.as_str()))
            .collect();
        assert_eq!(
            chain,
            vec![
                ("ollama", "codellama:34b-instruct"),
                ("ollama", "deepseek-coder:33b"),
                ("noop", "none"),
            ]
        );
    }

    #[test]
    fn embedder_and_engine_resolve_providers_by_name() {
        let mut cfg = AppConfig::default();
        let registry = build_registry(&cfg);
        assert_eq!(build_embedder(&cfg, &registry).unwrap().dims(), 384);

        cfg.embeddings.provider = "nonexistent".into();
        assert!(build_embedder(&cfg, &registry).is_err());

        cfg.analysis.primary.provider = "nonexistent".into();
        assert!(build_engine(&cfg, &registry).candidates().is_empty());
    }

    #[test]
    fn index_requires_matching_dims() {
        let mut cfg = AppConfig::default();
        cfg.vectors.dims = 768;
        assert!(build_index(&cfg).is_err());
        cfg.vectors.dims = 384;
        cfg.vectors.provider = "memory".into();
        assert_eq!(build_index(&cfg).unwrap().dims(), 384);
    }

    #[test]
    fn default_config_builds_an_offline_orchestrator() {
        let cfg = AppConfig::default();
        let orch = build_orchestrator(&cfg).unwrap();
        assert_eq!(orch.embedder().dims(), 384);
        assert_eq!(orch.index().dims(), 384);
    }
}
