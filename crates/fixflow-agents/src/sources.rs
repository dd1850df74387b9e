//! Source file access for the pipeline's read step.
//!
//! Between locating and resolving, the orchestrator needs the current content
//! of each suspect file. Where that content comes from is the caller's
//! business: a checked-out repository, or a map handed in directly.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::stages::{validate_repo_path, PipelineError};

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Full content of the file at repository-relative `path`.
    async fn read(&self, path: &str) -> Result<String, PipelineError>;
}

// ── WorkspaceSource ──────────────────────────────────────────────────────────

/// Caching reader rooted at a repository checkout.
///
/// Reads from disk on first access and serves later reads from memory. Paths
/// that are absolute or climb out of the root are refused.
pub struct WorkspaceSource {
    root: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl WorkspaceSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of cached files.
    pub fn cache_size(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn cached(&self, path: &str) -> Option<String> {
        self.cache.lock().ok()?.get(path).cloned()
    }
}

#[async_trait]
impl SourceProvider for WorkspaceSource {
    async fn read(&self, path: &str) -> Result<String, PipelineError> {
        validate_repo_path(path).map_err(PipelineError::invalid)?;
        if let Some(hit) = self.cached(path) {
            return Ok(hit);
        }

        let full_path = self.root.join(path);
        let content = match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(PipelineError::ResourceMissing(format!(
                    "source file not found: {path}"
                )));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("reading {}", full_path.display()))
                    .into())
            }
        };
        debug!(path, bytes = content.len(), "read source file");

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_string(), content.clone());
        }
        Ok(content)
    }
}

// ── InMemorySource ───────────────────────────────────────────────────────────

/// Serves file content from a map, for callers that already hold it.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    files: BTreeMap<String, String>,
}

impl InMemorySource {
    pub fn new(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }

    pub fn with_file(mut self, path: impl Into<String>, code: impl Into<String>) -> Self {
        self.files.insert(path.into(), code.into());
        self
    }
}

#[async_trait]
impl SourceProvider for InMemorySource {
    async fn read(&self, path: &str) -> Result<String, PipelineError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| PipelineError::ResourceMissing(format!("source file not found: {path}")))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::stages::ErrorKind;

    #[tokio::test]
    async fn workspace_reads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/Foo.java"), "class Foo {}\n").unwrap();

        let source = WorkspaceSource::new(dir.path());
        assert_eq!(source.read("src/Foo.java").await.unwrap(), "class Foo {}\n");
        assert_eq!(source.cache_size(), 1);

        fs::write(dir.path().join("src/Foo.java"), "changed").unwrap();
        assert_eq!(source.read("src/Foo.java").await.unwrap(), "class Foo {}\n");
    }

    #[tokio::test]
    async fn workspace_refuses_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let source = WorkspaceSource::new(dir.path());
        for path in ["/etc/passwd", "../outside.txt", "a/../../b"] {
            let err = source.read(path).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InputValidation, "{path}");
        }
    }

    #[tokio::test]
    async fn workspace_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkspaceSource::new(dir.path())
            .read("src/Nope.java")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceMissing);
    }

    #[tokio::test]
    async fn in_memory_serves_map() {
        let source = InMemorySource::default().with_file("A.java", "class A {}");
        assert_eq!(source.read("A.java").await.unwrap(), "class A {}");
        assert!(source.read("B.java").await.is_err());
    }
}
