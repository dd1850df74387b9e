//! Pipeline error taxonomy.
//!
//! Every failure a stage or the orchestrator can raise is represented here.
//! Callers query `kind()` / `is_retriable()` instead of string matching.
//!
//! ## Kinds
//!
//! | Kind            | Raised when                                         | Retriable |
//! |-----------------|-----------------------------------------------------|-----------|
//! | InputValidation | caller input fails shape checks (before generation) | no        |
//! | MalformedOutput | model output unparseable or breaks a closed set     | no        |
//! | Transport       | network / timeout / rate limit reaching the model   | caller's choice |
//! | ResourceMissing | referenced upload absent from storage               | no        |
//! | Cancelled       | consumer disconnected or token fired                | no        |
//! | Configuration   | missing key, invalid limits                         | no        |
//! | Internal        | anything else                                       | no        |
//!
//! Partial-result conditions are not errors; see `types::PathSetMismatch`.

use std::fmt;
use std::time::Duration;

use fixflow_gateway::GatewayError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::Stage;

/// Coarse classification surfaced to the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputValidation,
    MalformedOutput,
    Transport,
    ResourceMissing,
    Cancelled,
    Configuration,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputValidation => write!(f, "input_validation"),
            Self::MalformedOutput => write!(f, "malformed_output"),
            Self::Transport => write!(f, "transport"),
            Self::ResourceMissing => write!(f, "resource_missing"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller-supplied structured input failed validation.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Generation output did not match the stage's declared shape.
    #[error("{stage} returned malformed output: {reason}")]
    MalformedOutput { stage: Stage, reason: String },

    /// A closed-set mapping came back with the wrong key set.
    #[error("{stage} output key set mismatch (missing: {missing:?}, unexpected: {unexpected:?})")]
    KeySetMismatch {
        stage: Stage,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// The generation capability could not be reached or refused the call.
    #[error("{stage} generation call failed: {source}")]
    Transport { stage: Stage, source: GatewayError },

    /// A referenced stored resource (uploaded image) does not exist.
    #[error("resource not found: {0}")]
    ResourceMissing(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Map a gateway failure raised while running `stage`.
    ///
    /// An empty completion means the model answered with nothing, which is a
    /// contract violation rather than a transport failure.
    pub fn from_gateway(stage: Stage, err: GatewayError) -> Self {
        match err {
            GatewayError::EmptyCompletion => Self::MalformedOutput {
                stage,
                reason: "empty completion".to_string(),
            },
            GatewayError::MissingApiKey => Self::Configuration(err.to_string()),
            GatewayError::Configuration(msg) => Self::Configuration(msg),
            other => Self::Transport {
                stage,
                source: other,
            },
        }
    }

    pub fn malformed(stage: Stage, reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            stage,
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InputValidation(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputValidation(_) => ErrorKind::InputValidation,
            Self::MalformedOutput { .. } | Self::KeySetMismatch { .. } => {
                ErrorKind::MalformedOutput
            }
            Self::Transport { .. } => ErrorKind::Transport,
            Self::ResourceMissing(_) => ErrorKind::ResourceMissing,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The stage that raised this error, when there is one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::MalformedOutput { stage, .. }
            | Self::KeySetMismatch { stage, .. }
            | Self::Transport { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Only transport failures the gateway marks retriable qualify. The
    /// pipeline never acts on this itself; retry belongs to the caller.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_retriable(),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport { source, .. } => source.retry_after(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_completion_is_malformed_output() {
        let err = PipelineError::from_gateway(Stage::Locator, GatewayError::EmptyCompletion);
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
        assert_eq!(err.stage(), Some(Stage::Locator));
        assert!(!err.is_retriable());
    }

    #[test]
    fn rate_limit_is_retriable_transport() {
        let err = PipelineError::from_gateway(
            Stage::Patcher,
            GatewayError::RateLimited {
                retry_after: Some(Duration::from_secs(3)),
            },
        );
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_retriable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn missing_key_is_configuration() {
        let err = PipelineError::from_gateway(Stage::Reporter, GatewayError::MissingApiKey);
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn key_set_mismatch_counts_as_malformed() {
        let err = PipelineError::KeySetMismatch {
            stage: Stage::Coordinator,
            missing: vec!["B.java".into()],
            unexpected: vec![],
        };
        assert_eq!(err.kind(), ErrorKind::MalformedOutput);
        assert!(err.to_string().contains("B.java"));
    }

    #[test]
    fn input_validation_never_retries() {
        let err = PipelineError::invalid("commit.title is empty");
        assert_eq!(err.kind(), ErrorKind::InputValidation);
        assert!(!err.is_retriable());
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::ResourceMissing.to_string(), "resource_missing");
        assert_eq!(ErrorKind::MalformedOutput.to_string(), "malformed_output");
    }
}
