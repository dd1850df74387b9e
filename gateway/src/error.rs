//! Transport-level error taxonomy for the generation capability.
//!
//! These errors describe failures *reaching* the model, never failures of
//! the model's answer to satisfy a stage contract. The pipeline crate maps
//! them onto its own `Transport` kind so callers can tell "the network
//! failed" apart from "the model misbehaved".
//!
//! | Variant          | Retriable | Notes                                  |
//! |------------------|-----------|----------------------------------------|
//! | Request          | yes       | connect/reset/DNS                      |
//! | Timeout          | yes       | reqwest deadline hit                   |
//! | RateLimited      | yes       | honours `Retry-After` when present     |
//! | Status (5xx)     | yes       |                                        |
//! | Status (4xx)     | no        |                                        |
//! | Stream           | yes       | body broke mid-stream                  |
//! | InvalidResponse  | no        | provider envelope not decodable        |
//! | EmptyCompletion  | no        | no content in the first choice         |
//! | MissingApiKey    | no        |                                        |
//! | Configuration    | no        |                                        |

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The HTTP request could not be sent or the connection failed.
    #[error("generation request failed: {0}")]
    Request(String),

    /// The request exceeded the configured timeout.
    #[error("generation request timed out: {0}")]
    Timeout(String),

    /// The provider rejected the call with HTTP 429.
    #[error("generation rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success HTTP status.
    #[error("generation API error ({status}): {body}")]
    Status { status: u16, body: String },

    /// The streaming body was interrupted before the terminal marker.
    #[error("generation stream interrupted: {0}")]
    Stream(String),

    /// The provider answered, but not with a chat-completions envelope.
    #[error("invalid generation response: {0}")]
    InvalidResponse(String),

    /// The provider answered with an envelope carrying no text.
    #[error("generation returned an empty completion")]
    EmptyCompletion,

    #[error("API key not configured (set OPENAI_API_KEY)")]
    MissingApiKey,

    #[error("gateway configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Whether a caller may reasonably re-issue the same call.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) | Self::RateLimited { .. } | Self::Stream(_) => {
                true
            }
            Self::Status { status, .. } => *status >= 500,
            Self::InvalidResponse(_)
            | Self::EmptyCompletion
            | Self::MissingApiKey
            | Self::Configuration(_) => false,
        }
    }

    /// Provider-suggested delay before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// `true` when the provider responded but produced no usable text.
    pub fn is_empty_completion(&self) -> bool {
        matches!(self, Self::EmptyCompletion)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}
