use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scan: ScanPaths,
    pub chunking: ChunkingConfig,
    pub embeddings: EmbeddingConfig,
    pub vectors: VectorConfig,
    pub analysis: AnalysisConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPaths {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size_mb: u64,
}

impl Default for ScanPaths {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            max_file_size_mb: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Token budget per chunk.
    pub chunk_size: usize,
    /// Token budget for lines carried into the next chunk.
    pub overlap_size: usize,
    /// HF `tokenizer.json`; only honoured with the `hf-tokenizer` feature.
    pub tokenizer_path: Option<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap_size: 100,
            tokenizer_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dims: usize,
    pub batch_size: usize,
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashed".to_string(),
            model: "all-minilm".to_string(),
            dims: 384,
            batch_size: 64,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub provider: String,
    pub url: Option<String>,
    pub collection: String,
    pub dims: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            url: Some("http://localhost:6333".to_string()),
            collection: "codeguard_embeddings".to_string(),
            dims: 384,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub primary: PrimaryProviderConfig,
    pub secondary: SecondaryProviderConfig,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub context_limit: usize,
    /// Files analyzed at once; 1 keeps the loop strictly sequential.
    pub concurrency: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            primary: PrimaryProviderConfig::default(),
            secondary: SecondaryProviderConfig::default(),
            timeout_secs: 120,
            temperature: 0.1,
            max_tokens: 4000,
            context_limit: 3,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryProviderConfig {
    pub provider: String,
    pub model: String,
    pub fallback_model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for PrimaryProviderConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "codellama:34b-instruct".to_string(),
            fallback_model: Some("deepseek-coder:33b".to_string()),
            base_url: Some("http://localhost:11434".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryProviderConfig {
    pub provider: String,
    pub model: String,
    pub enabled: bool,
    pub base_url: Option<String>,
}

impl Default for SecondaryProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            enabled: false,
            base_url: Some("https://api.openai.com".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "codeguard.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Defaults, then the TOML file (explicit path, or `config/default` when
/// present), then `CODEGUARD_*` environment variables with `__` between
/// nested keys.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("CODEGUARD")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_pipeline() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.chunking.chunk_size, 500);
        assert_eq!(cfg.chunking.overlap_size, 100);
        assert_eq!(cfg.vectors.dims, 384);
        assert_eq!(cfg.embeddings.dims, 384);
        assert_eq!(cfg.analysis.context_limit, 3);
        assert!(!cfg.analysis.secondary.enabled);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codeguard.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[analysis.primary]\nmodel = \"llama3\"\n\n[chunking]\nchunk_size = 200"
        )
        .unwrap();

        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.analysis.primary.model, "llama3");
        assert_eq!(cfg.analysis.primary.provider, "ollama");
        assert_eq!(cfg.chunking.chunk_size, 200);
        assert_eq!(cfg.chunking.overlap_size, 100);
    }
}
