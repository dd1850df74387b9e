//! Service configuration: gateway, pipeline policy and upload storage.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Values in an optional TOML file (`--config fixflow.toml`)
//! 2. Environment variables (`OPENAI_API_KEY`, `FIXFLOW_*`)
//! 3. Built-in defaults
//!
//! Every TOML field is optional; absent fields keep the env/default value.
//!
//! ```toml
//! upload_dir = "/srv/fixflow/uploads"
//!
//! [gateway]
//! text_model = "o4-mini"
//! max_concurrent_requests = 8
//!
//! [pipeline]
//! max_parallel_patches = 4
//! patch_strategy = "coordinated"
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use fixflow_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};

use crate::stages::PipelineError;

const DEFAULT_MAX_PARALLEL_PATCHES: usize = 4;
const DEFAULT_UPLOAD_DIR: &str = "./uploads";
const ENV_UPLOAD_DIR: &str = "FIXFLOW_UPLOAD_DIR";

/// How instructions are obtained for the patch step when several files change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStrategy {
    /// Patch each file with the Resolver's own instruction.
    #[default]
    Independent,
    /// Re-derive instructions for all known files in one coordinated request.
    Coordinated,
}

impl fmt::Display for PatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Independent => write!(f, "independent"),
            Self::Coordinated => write!(f, "coordinated"),
        }
    }
}

impl FromStr for PatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "independent" => Ok(Self::Independent),
            "coordinated" => Ok(Self::Coordinated),
            other => Err(format!(
                "unknown patch strategy '{other}' (expected independent or coordinated)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Patch calls in flight at once within one run.
    pub max_parallel_patches: usize,
    pub patch_strategy: PatchStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallel_patches: DEFAULT_MAX_PARALLEL_PATCHES,
            patch_strategy: PatchStrategy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_parallel_patches == 0 {
            return Err("max_parallel_patches must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub gateway: GatewayConfig,
    pub pipeline: PipelineConfig,
    /// Directory that uploaded images are resolved against.
    pub upload_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            pipeline: PipelineConfig::default(),
            upload_dir: env::var(ENV_UPLOAD_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_UPLOAD_DIR)),
        }
    }
}

impl ServiceConfig {
    /// Env defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.gateway
            .validate()
            .map_err(|e| PipelineError::Configuration(format!("gateway: {e}")))?;
        self.pipeline
            .validate()
            .map_err(|e| PipelineError::Configuration(format!("pipeline: {e}")))?;
        if self.upload_dir.as_os_str().is_empty() {
            return Err(PipelineError::Configuration(
                "upload_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
