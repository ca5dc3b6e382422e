//! Walks a working copy and reads supported source files into [`FileRecord`]s.

use crate::config::ScanPaths;
use crate::models::FileRecord;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

pub const IGNORE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "dist",
    "build",
    ".venv",
    "venv",
    "env",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    "target",
    "vendor",
    ".idea",
    ".vscode",
];

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "go", "rs", "cpp", "c", "h", "hpp", "php", "rb", "sh", "yml", "yaml", "json",
    "dockerfile", "tf", "tfvars",
];

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Files larger than this many bytes are skipped. `None` disables the check.
    pub max_file_size: Option<u64>,
}

impl IngestOptions {
    pub fn from_config(cfg: &ScanPaths) -> Self {
        Self {
            include: cfg.include.clone(),
            exclude: cfg.exclude.clone(),
            max_file_size: Some(cfg.max_file_size_mb.saturating_mul(1024 * 1024)),
        }
    }
}

pub fn language_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "java" => "java",
        "go" => "go",
        "rs" => "rust",
        "cpp" | "hpp" => "cpp",
        "c" | "h" => "c",
        "php" => "php",
        "rb" => "ruby",
        "sh" => "shell",
        "yml" | "yaml" => "yaml",
        "json" => "json",
        "dockerfile" => "dockerfile",
        "tf" | "tfvars" => "terraform",
        _ => "unknown",
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(Some(builder.build()?))
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| IGNORE_DIRS.contains(&n))
            .unwrap_or(false)
}

/// Blocking walk of `root`, ordered by path. Unreadable entries are logged
/// and skipped; invalid UTF-8 is replaced.
pub fn ingest(root: &Path, opts: &IngestOptions) -> anyhow::Result<Vec<FileRecord>> {
    if !root.is_dir() {
        anyhow::bail!("directory does not exist: {}", root.display());
    }
    let include = build_globset(&opts.include)?;
    let exclude = build_globset(&opts.exclude)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_supported(path) {
            continue;
        }

        let relative = match path.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if exclude.as_ref().map(|g| g.is_match(&relative)).unwrap_or(false) {
            continue;
        }
        if let Some(g) = &include {
            if !g.is_match(&relative) {
                continue;
            }
        }

        if let Some(limit) = opts.max_file_size {
            match entry.metadata() {
                Ok(m) if m.len() > limit => {
                    debug!(path = %relative, size = m.len(), limit, "skipping oversized file");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %relative, error = %e, "failed to stat file");
                    continue;
                }
            }
        }

        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %relative, error = %e, "failed to read file");
                continue;
            }
        };
        let content = String::from_utf8_lossy(&bytes).into_owned();
        files.push(FileRecord::new(relative, content, language_for(path)));
    }

    info!(root = %root.display(), files = files.len(), "directory scan complete");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    fn paths(files: &[FileRecord]) -> Vec<&str> {
        files.iter().map(|f| f.relative_path.as_str()).collect()
    }

    #[test]
    fn skips_ignored_dirs_and_unsupported_extensions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/app.py", b"print('hi')\n");
        write(dir.path(), "src/readme.md", b"# docs\n");
        write(dir.path(), "node_modules/lib/index.js", b"module.exports = 1;\n");
        write(dir.path(), ".git/hooks/pre-commit.sh", b"exit 0\n");
        write(dir.path(), "infra/main.tf", b"resource \"x\" \"y\" {}\n");

        let files = ingest(dir.path(), &IngestOptions::default()).unwrap();
        assert_eq!(paths(&files), vec!["infra/main.tf", "src/app.py"]);
        assert_eq!(files[0].language, "terraform");
        assert_eq!(files[1].language, "python");
        assert_eq!(files[1].line_count, 1);
    }

    #[test]
    fn include_and_exclude_globs_match_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.py", b"a = 1\n");
        write(dir.path(), "src/b.py", b"b = 1\n");
        write(dir.path(), "tests/test_a.py", b"assert True\n");
        write(dir.path(), "web/app.js", b"let x;\n");

        let opts = IngestOptions {
            include: vec!["*.py".into()],
            exclude: vec!["tests/*".into()],
            max_file_size: None,
        };
        let files = ingest(dir.path(), &opts).unwrap();
        assert_eq!(paths(&files), vec!["src/a.py", "src/b.py"]);
    }

    #[test]
    fn invalid_utf8_is_read_lossily_and_large_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.py", b"x = '\xff'\n");
        write(dir.path(), "big.py", &vec![b'a'; 2048]);

        let opts = IngestOptions {
            max_file_size: Some(1024),
            ..Default::default()
        };
        let files = ingest(dir.path(), &opts).unwrap();
        assert_eq!(paths(&files), vec!["bad.py"]);
        assert!(files[0].content.contains('\u{FFFD}'));
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(ingest(&PathBuf::from("/definitely/not/here"), &IngestOptions::default()).is_err());
    }

    #[test]
    fn language_map_defaults_to_unknown() {
        assert_eq!(language_for(Path::new("x.HPP")), "cpp");
        assert_eq!(language_for(Path::new("x.sh")), "shell");
        assert_eq!(language_for(Path::new("Makefile")), "unknown");
    }
}
