//! Resolving a scan target to a working copy on disk.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("git clone of {url} failed: {message}")]
    Clone { url: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanSource {
    Local(PathBuf),
    Remote { url: String, branch: Option<String> },
}

impl ScanSource {
    /// URLs (`http(s)://`, `ssh://`, `git://`, `git@host:`) become remote
    /// sources, anything else a local path.
    pub fn from_target(target: &str, branch: Option<String>) -> Self {
        let remote = ["http://", "https://", "ssh://", "git://"]
            .iter()
            .any(|p| target.starts_with(p))
            || (target.starts_with("git@") && target.contains(':'));
        if remote {
            ScanSource::Remote {
                url: target.to_string(),
                branch,
            }
        } else {
            ScanSource::Local(PathBuf::from(target))
        }
    }
}

impl fmt::Display for ScanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanSource::Local(path) => write!(f, "{}", path.display()),
            ScanSource::Remote { url, branch: Some(b) } => write!(f, "{url}#{b}"),
            ScanSource::Remote { url, branch: None } => f.write_str(url),
        }
    }
}

/// Directory a scan reads from. Temporary clones are removed when the value
/// is dropped or [`WorkingCopy::release`]d.
#[derive(Debug)]
pub struct WorkingCopy {
    root: PathBuf,
    temp: Option<TempDir>,
}

impl WorkingCopy {
    pub fn borrowed(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp: None,
        }
    }

    pub fn temporary(temp: TempDir) -> Self {
        Self {
            root: temp.path().to_path_buf(),
            temp: Some(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    pub fn release(self) -> Result<(), SourceError> {
        if let Some(temp) = self.temp {
            temp.close()?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn acquire(&self, source: &ScanSource) -> Result<WorkingCopy, SourceError>;
}

/// Local directories as-is; remote repositories via `git clone --depth 1`.
#[derive(Debug, Clone)]
pub struct GitSourceProvider {
    git: String,
    /// Parent for clone directories; the system temp dir when unset.
    temp_root: Option<PathBuf>,
}

impl GitSourceProvider {
    pub fn new() -> Self {
        Self {
            git: "git".into(),
            temp_root: None,
        }
    }

    pub fn with_git_binary(mut self, git: impl Into<String>) -> Self {
        self.git = git.into();
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    fn clone_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("codeguard_");
        match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

impl Default for GitSourceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SourceProvider for GitSourceProvider {
    async fn acquire(&self, source: &ScanSource) -> Result<WorkingCopy, SourceError> {
        match source {
            ScanSource::Local(path) => {
                if !path.exists() {
                    return Err(SourceError::NotFound(path.clone()));
                }
                if !path.is_dir() {
                    return Err(SourceError::NotADirectory(path.clone()));
                }
                Ok(WorkingCopy::borrowed(path))
            }
            ScanSource::Remote { url, branch } => {
                let temp = self.clone_dir()?;
                info!(url = %url, branch = ?branch, dest = %temp.path().display(), "cloning repository");

                let mut cmd = Command::new(&self.git);
                cmd.arg("clone").arg("--depth").arg("1");
                if let Some(b) = branch {
                    cmd.arg("--branch").arg(b);
                }
                cmd.arg(url).arg(temp.path()).kill_on_drop(true);

                let output = cmd.output().await.map_err(|e| SourceError::Clone {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
                if !output.status.success() {
                    return Err(SourceError::Clone {
                        url: url.clone(),
                        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    });
                }
                Ok(WorkingCopy::temporary(temp))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_classified() {
        assert!(matches!(
            ScanSource::from_target("https://github.com/acme/app.git", None),
            ScanSource::Remote { .. }
        ));
        assert!(matches!(
            ScanSource::from_target("git@github.com:acme/app.git", Some("dev".into())),
            ScanSource::Remote { branch: Some(_), .. }
        ));
        assert_eq!(
            ScanSource::from_target("./src", None),
            ScanSource::Local(PathBuf::from("./src"))
        );
    }

    #[tokio::test]
    async fn missing_local_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = GitSourceProvider::new()
            .acquire(&ScanSource::Local(missing.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(p) if p == missing));
    }

    #[tokio::test]
    async fn local_working_copy_is_not_deleted_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let wc = GitSourceProvider::new()
            .acquire(&ScanSource::Local(dir.path().to_path_buf()))
            .await
            .unwrap();
        assert!(!wc.is_temporary());
        wc.release().unwrap();
        assert!(dir.path().exists());
    }

    #[test]
    fn temporary_working_copy_is_removed_on_drop() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().to_path_buf();
        let wc = WorkingCopy::temporary(temp);
        assert!(wc.path().exists());
        drop(wc);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_clone_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let provider = GitSourceProvider::new()
            .with_git_binary("definitely-not-a-git-binary")
            .with_temp_root(root.path());
        let err = provider
            .acquire(&ScanSource::Remote {
                url: "https://example.invalid/repo.git".into(),
                branch: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Clone { .. }));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn clone_dirs_are_created_under_the_temp_root() {
        let root = tempfile::tempdir().unwrap();
        let provider = GitSourceProvider::new().with_temp_root(root.path());
        let dir = provider.clone_dir().unwrap();
        assert!(dir.path().starts_with(root.path()));
        assert!(dir
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("codeguard_")));
    }
}
