//! Process-wide concurrency ceiling in front of any gateway.
//!
//! The generation service is the only shared, rate-limited resource in the
//! system. Wrapping the concrete gateway here keeps every stage behind the
//! same semaphore without the stages knowing about it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::{GatewayError, GenerationGateway, ImagePayload, TextStream};

pub struct ConcurrencyLimited<G> {
    inner: G,
    permits: Arc<Semaphore>,
    ceiling: usize,
}

impl<G: GenerationGateway> ConcurrencyLimited<G> {
    /// `ceiling` is clamped to at least one permit.
    pub fn new(inner: G, ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, GatewayError> {
        if self.permits.available_permits() == 0 {
            debug!(ceiling = self.ceiling, "waiting for generation slot");
        }
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Configuration("concurrency limiter closed".to_string()))
    }
}

/// Keep `permit` alive for as long as the stream is.
fn hold_permit(stream: TextStream, permit: OwnedSemaphorePermit) -> TextStream {
    stream
        .map(move |item| {
            let _held = &permit;
            item
        })
        .boxed()
}

#[async_trait]
impl<G: GenerationGateway> GenerationGateway for ConcurrencyLimited<G> {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        let _permit = self.acquire().await?;
        self.inner.complete(prompt).await
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream, GatewayError> {
        let permit = self.acquire().await?;
        let stream = self.inner.complete_stream(prompt).await?;
        Ok(hold_permit(stream, permit))
    }

    async fn complete_with_images(
        &self,
        prompt: &str,
        images: &[ImagePayload],
    ) -> Result<String, GatewayError> {
        let _permit = self.acquire().await?;
        self.inner.complete_with_images(prompt, images).await
    }

    async fn complete_with_images_stream(
        &self,
        prompt: &str,
        images: &[ImagePayload],
    ) -> Result<TextStream, GatewayError> {
        let permit = self.acquire().await?;
        let stream = self.inner.complete_with_images_stream(prompt, images).await?;
        Ok(hold_permit(stream, permit))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Records the highest number of overlapping `complete` calls.
    #[derive(Default)]
    struct PeakGateway {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl GenerationGateway for PeakGateway {
        async fn complete(&self, _prompt: &str) -> Result<String, GatewayError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".into())
        }

        async fn complete_stream(&self, _prompt: &str) -> Result<TextStream, GatewayError> {
            Ok(futures::stream::iter(vec![Ok("a".to_string()), Ok("b".to_string())]).boxed())
        }

        async fn complete_with_images(
            &self,
            prompt: &str,
            _images: &[ImagePayload],
        ) -> Result<String, GatewayError> {
            self.complete(prompt).await
        }

        async fn complete_with_images_stream(
            &self,
            prompt: &str,
            _images: &[ImagePayload],
        ) -> Result<TextStream, GatewayError> {
            self.complete_stream(prompt).await
        }
    }

    #[tokio::test]
    async fn never_exceeds_ceiling() {
        let gateway = Arc::new(ConcurrencyLimited::new(PeakGateway::default(), 2));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gw = gateway.clone();
            handles.push(tokio::spawn(async move { gw.complete("p").await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(gateway.inner.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gateway.available(), 2);
    }

    #[tokio::test]
    async fn stream_holds_permit_until_dropped() {
        let gateway = ConcurrencyLimited::new(PeakGateway::default(), 1);
        let stream = gateway.complete_stream("p").await.unwrap();
        assert_eq!(gateway.available(), 0);
        drop(stream);
        assert_eq!(gateway.available(), 1);
    }

    #[test]
    fn zero_ceiling_is_clamped() {
        let gateway = ConcurrencyLimited::new(PeakGateway::default(), 0);
        assert_eq!(gateway.ceiling(), 1);
    }
}
