//! Splits a file into line-aligned, token-bounded chunks.
//!
//! Lines accumulate until the next one would push the running token count past
//! `chunk_size`; the chunk is then closed and the next one is seeded with the
//! trailing lines of the closed chunk that fit in `overlap_size`. For the
//! languages in [`STRUCTURED_LANGUAGES`] a chunk that is already near its
//! budget is also closed just before a definition line, so functions tend to
//! start a chunk instead of straddling two.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, FileRecord};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub const STRUCTURED_LANGUAGES: [&str; 6] = ["python", "javascript", "typescript", "java", "go", "rust"];

/// Percentage of `chunk_size` after which a definition line closes the chunk early.
const EARLY_SPLIT_PERCENT: usize = 80;

pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Roughly four characters per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn count(&self, text: &str) -> usize {
        text.chars().count() / 4
    }
}

#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenizer {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("load tokenizer {path}: {e}"))?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl Tokenizer for HfTokenizer {
    fn count(&self, text: &str) -> usize {
        match self.inner.encode(text, false) {
            Ok(enc) => enc.get_ids().len(),
            Err(_) => ApproxTokenizer.count(text),
        }
    }
}

pub fn tokenizer_from_config(cfg: &ChunkingConfig) -> anyhow::Result<Arc<dyn Tokenizer>> {
    match cfg.tokenizer_path.as_deref() {
        #[cfg(feature = "hf-tokenizer")]
        Some(path) => Ok(Arc::new(HfTokenizer::from_file(path)?)),
        #[cfg(not(feature = "hf-tokenizer"))]
        Some(path) => {
            warn!(path, "hf-tokenizer feature disabled, using approximate token counts");
            Ok(Arc::new(ApproxTokenizer))
        }
        None => Ok(Arc::new(ApproxTokenizer)),
    }
}

#[derive(Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    overlap_size: usize,
}

impl Chunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, chunk_size: usize, overlap_size: usize) -> Self {
        Self {
            tokenizer,
            chunk_size,
            overlap_size,
        }
    }

    pub fn from_config(cfg: &ChunkingConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            tokenizer_from_config(cfg)?,
            cfg.chunk_size,
            cfg.overlap_size,
        ))
    }

    /// Chunks a file, carrying its `file_size` and `lines` into every chunk.
    pub fn chunk_file(&self, file: &FileRecord) -> Vec<Chunk> {
        let mut metadata = BTreeMap::new();
        metadata.insert("file_size".to_string(), serde_json::json!(file.byte_size));
        metadata.insert("lines".to_string(), serde_json::json!(file.line_count));
        self.chunk(&file.content, &file.relative_path, &file.language, &metadata)
    }

    pub fn chunk(
        &self,
        content: &str,
        file_path: &str,
        language: &str,
        metadata: &BTreeMap<String, serde_json::Value>,
    ) -> Vec<Chunk> {
        let lines: Vec<&str> = content.lines().collect();
        let mut chunks = Vec::new();
        if lines.is_empty() {
            return chunks;
        }

        let structured = is_structured(language);
        let early_threshold = self.chunk_size * EARLY_SPLIT_PERCENT / 100;
        let mut current: Vec<&str> = Vec::new();
        let mut tokens = 0usize;
        let mut start_line = 1usize;

        for (idx, line) in lines.iter().copied().enumerate() {
            let line_no = idx + 1;
            let line_tokens = self.tokenizer.count(line);
            if line_tokens > self.chunk_size {
                debug!(file_path, line = line_no, tokens = line_tokens, "line exceeds chunk budget");
            }

            let over_budget = tokens + line_tokens > self.chunk_size;
            let split_early = structured && tokens >= early_threshold && is_definition(line, language);

            if !current.is_empty() && (over_budget || split_early) {
                chunks.push(self.build(&current, file_path, language, start_line, line_no - 1, chunks.len(), metadata));
                let overlap = self.overlap_lines(&current);
                start_line = line_no - overlap.len();
                current = overlap;
                current.push(line);
                tokens = current.iter().map(|l| self.tokenizer.count(l)).sum();
            } else {
                current.push(line);
                tokens += line_tokens;
            }
        }

        if !current.is_empty() {
            chunks.push(self.build(&current, file_path, language, start_line, lines.len(), chunks.len(), metadata));
        }

        debug!(file_path, language, chunks = chunks.len(), "chunked file");
        chunks
    }

    /// Trailing lines of `closed` whose token total stays within `overlap_size`.
    /// Never takes the whole chunk, so start lines strictly increase.
    fn overlap_lines<'a>(&self, closed: &[&'a str]) -> Vec<&'a str> {
        let mut taken = 0usize;
        let mut tokens = 0usize;
        for line in closed.iter().rev().take(closed.len().saturating_sub(1)) {
            let t = self.tokenizer.count(line);
            if tokens + t > self.overlap_size {
                break;
            }
            tokens += t;
            taken += 1;
        }
        closed[closed.len() - taken..].to_vec()
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        lines: &[&str],
        file_path: &str,
        language: &str,
        start_line: usize,
        end_line: usize,
        chunk_index: usize,
        extra: &BTreeMap<String, serde_json::Value>,
    ) -> Chunk {
        let content = lines.join("\n");
        let function_name = extract_function_name(&content, language);
        Chunk {
            content,
            file_path: file_path.to_string(),
            language: language.to_string(),
            start_line,
            end_line,
            metadata: ChunkMetadata {
                chunk_index,
                function_name,
                extra: extra.clone(),
            },
        }
    }
}

pub fn is_structured(language: &str) -> bool {
    STRUCTURED_LANGUAGES.contains(&language)
}

fn function_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("python", r"def\s+(\w+)\s*\("),
            ("javascript", r"function\s+(\w+)\s*\("),
            ("typescript", r"(?:function\s+)?(\w+)\s*[=:]\s*(?:\([^)]*\)\s*)?=>"),
            ("java", r"(?:public|private|protected)?\s*\w+\s+(\w+)\s*\("),
            ("go", r"func\s+(\w+)\s*\("),
            ("rust", r"fn\s+(\w+)\s*\("),
        ]
        .into_iter()
        .filter_map(|(lang, pat)| Regex::new(pat).ok().map(|re| (lang, re)))
        .collect()
    })
}

/// First function name declared in `text`, for languages with a known pattern.
pub fn extract_function_name(text: &str, language: &str) -> Option<String> {
    let (_, re) = function_patterns().iter().find(|(lang, _)| *lang == language)?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_definition(line: &str, language: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("class ") || extract_function_name(trimmed, language).is_some()
}

/// Name of the nearest function declared at or above `line` (1-based).
pub fn enclosing_function_name(content: &str, language: &str, line: usize) -> Option<String> {
    content
        .lines()
        .take(line)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .find_map(|l| extract_function_name(l, language))
}
