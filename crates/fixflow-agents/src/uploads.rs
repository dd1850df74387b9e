//! Upload directory lookups for the image refinement path.
//!
//! Filenames are plain names inside one directory. Anything that could
//! address a path outside it is rejected before the filesystem is touched.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use fixflow_gateway::ImagePayload;
use tracing::{debug, warn};

use crate::stages::PipelineError;

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path for `filename`; existence is not checked.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, PipelineError> {
        if filename.trim().is_empty() {
            return Err(PipelineError::invalid("upload filename is empty"));
        }
        if filename.contains(['/', '\\']) || filename == "." || filename == ".." {
            return Err(PipelineError::invalid(format!(
                "upload filename '{filename}' must be a plain file name"
            )));
        }
        Ok(self.root.join(filename))
    }

    /// Resolve every name and confirm it exists, before reading any bytes.
    pub async fn locate_all(&self, filenames: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
        let mut paths = Vec::with_capacity(filenames.len());
        for name in filenames {
            let path = self.resolve(name)?;
            let exists = tokio::fs::try_exists(&path)
                .await
                .with_context(|| format!("checking upload {}", path.display()))?;
            if !exists {
                warn!(filename = %name, root = %self.root.display(), "upload not found");
                return Err(PipelineError::ResourceMissing(format!(
                    "uploaded file does not exist: {name}"
                )));
            }
            paths.push(path);
        }
        Ok(paths)
    }

    /// Load every named upload as an image payload.
    pub async fn load_all(&self, filenames: &[String]) -> Result<Vec<ImagePayload>, PipelineError> {
        let paths = self.locate_all(filenames).await?;
        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let image = match ImagePayload::load(&path).await {
                Ok(image) => image,
                Err(e) if e.kind() == IoErrorKind::NotFound => {
                    return Err(PipelineError::ResourceMissing(format!(
                        "uploaded file disappeared: {}",
                        path.display()
                    )));
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("reading upload {}", path.display()))
                        .into())
                }
            };
            debug!(
                path = %path.display(),
                media_type = %image.media_type,
                bytes = image.bytes.len(),
                "loaded upload"
            );
            images.push(image);
        }
        Ok(images)
    }
}
