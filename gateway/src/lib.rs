//! Generation gateway for the fixflow pipeline.
//!
//! The external text/vision model is an opaque capability: "given a prompt
//! (and optionally images), produce text". Every stage talks to it through
//! [`GenerationGateway`] and nothing else.
//!
//! ## Modules
//!
//! | Module   | Purpose                                                    |
//! |----------|------------------------------------------------------------|
//! | `client` | `OpenAiGateway`: chat-completions over `reqwest`           |
//! | `config` | `GatewayConfig`: endpoint, models, timeouts, ceiling       |
//! | `error`  | `GatewayError`: transport failures with retry hints        |
//! | `image`  | `ImagePayload`: bytes + media type, base64 data URLs       |
//! | `limit`  | `ConcurrencyLimited`: semaphore ceiling around a gateway   |
//! | `sse`    | Server-Sent Events decoding for streamed completions       |
//!
//! ## Streams
//!
//! Streaming calls return a [`TextStream`]. Chunks arrive in generation
//! order; an `Err` item is the error marker and ends the stream; `None` is
//! the terminal marker. A stream is not restartable, and dropping it
//! cancels the outbound call.

pub mod client;
pub mod config;
pub mod error;
pub mod image;
pub mod limit;
pub mod sse;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use client::OpenAiGateway;
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use image::ImagePayload;
pub use limit::ConcurrencyLimited;

/// Lazily produced text chunks from one streamed generation.
pub type TextStream = BoxStream<'static, Result<String, GatewayError>>;

/// Access point to the external generation capability.
///
/// Implementations never retry internally; output is non-deterministic for
/// identical input.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Single-shot text completion.
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError>;

    /// Incremental text completion.
    async fn complete_stream(&self, prompt: &str) -> Result<TextStream, GatewayError>;

    /// Single-shot completion over text plus images.
    async fn complete_with_images(
        &self,
        prompt: &str,
        images: &[ImagePayload],
    ) -> Result<String, GatewayError>;

    /// Incremental completion over text plus images.
    async fn complete_with_images_stream(
        &self,
        prompt: &str,
        images: &[ImagePayload],
    ) -> Result<TextStream, GatewayError>;
}

#[async_trait]
impl<G: GenerationGateway + ?Sized> GenerationGateway for Arc<G> {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        (**self).complete(prompt).await
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream, GatewayError> {
        (**self).complete_stream(prompt).await
    }

    async fn complete_with_images(
        &self,
        prompt: &str,
        images: &[ImagePayload],
    ) -> Result<String, GatewayError> {
        (**self).complete_with_images(prompt, images).await
    }

    async fn complete_with_images_stream(
        &self,
        prompt: &str,
        images: &[ImagePayload],
    ) -> Result<TextStream, GatewayError> {
        (**self).complete_with_images_stream(prompt, images).await
    }
}

/// Build the production gateway: HTTP client behind the configured ceiling.
pub fn connect(config: GatewayConfig) -> Result<Arc<dyn GenerationGateway>, GatewayError> {
    let ceiling = config.max_concurrent_requests;
    let client = OpenAiGateway::new(config)?;
    Ok(Arc::new(ConcurrencyLimited::new(client, ceiling)))
}
