//! Provider configuration for the OpenAI-compatible generation endpoint.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Values set explicitly on the struct (TOML overlay in the service crate)
//! 2. Environment variables (`OPENAI_API_KEY`, `FIXFLOW_*`)
//! 3. Built-in defaults

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TEXT_MODEL: &str = "o4-mini";
const DEFAULT_VISION_MODEL: &str = "gpt-4o";
const DEFAULT_VISION_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

const ENV_API_KEY: &str = "OPENAI_API_KEY";
const ENV_BASE_URL: &str = "FIXFLOW_BASE_URL";
const ENV_TEXT_MODEL: &str = "FIXFLOW_TEXT_MODEL";
const ENV_VISION_MODEL: &str = "FIXFLOW_VISION_MODEL";
const ENV_MAX_CONCURRENCY: &str = "FIXFLOW_MAX_CONCURRENCY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the OpenAI-compatible API, without the trailing path.
    pub base_url: String,
    /// Bearer token. Never serialized back out.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Model used for text-only completions.
    pub text_model: String,
    /// Model used for text + image completions.
    pub vision_model: String,
    /// `max_tokens` sent with vision requests.
    pub vision_max_tokens: u32,
    pub request_timeout_secs: u64,
    /// Ceiling on in-flight generation calls across the whole process.
    pub max_concurrent_requests: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: env::var(ENV_API_KEY).unwrap_or_default(),
            text_model: env::var(ENV_TEXT_MODEL)
                .unwrap_or_else(|_| DEFAULT_TEXT_MODEL.to_string()),
            vision_model: env::var(ENV_VISION_MODEL)
                .unwrap_or_else(|_| DEFAULT_VISION_MODEL.to_string()),
            vision_max_tokens: DEFAULT_VISION_MAX_TOKENS,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_concurrent_requests: env::var(ENV_MAX_CONCURRENCY)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Full URL of the chat-completions endpoint.
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Validate the config; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("base_url must not be empty".to_string());
        }
        if self.text_model.trim().is_empty() || self.vision_model.trim().is_empty() {
            return Err("text_model and vision_model must not be empty".to_string());
        }
        if self.max_concurrent_requests == 0 {
            return Err("max_concurrent_requests must be > 0".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GatewayConfig {
        GatewayConfig {
            base_url: "http://localhost:8080/v1/".into(),
            api_key: "k".into(),
            text_model: "o4-mini".into(),
            vision_model: "gpt-4o".into(),
            vision_max_tokens: 1024,
            request_timeout_secs: 30,
            max_concurrent_requests: 2,
        }
    }

    #[test]
    fn chat_url_strips_trailing_slash() {
        assert_eq!(
            sample().chat_completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn sample_config_validates() {
        sample().validate().expect("sample config should be valid");
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut cfg = sample();
        cfg.max_concurrent_requests = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn api_key_is_not_serialized() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("api_key"));
    }
}
