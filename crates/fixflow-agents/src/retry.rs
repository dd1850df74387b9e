//! Caller-directed retry for whole pipeline operations.
//!
//! The pipeline itself never retries: a slow call that eventually succeeds
//! would otherwise be paid for twice. Callers that want retries wrap an
//! operation here, and only retriable transport failures qualify.
//!
//! ```text
//! attempt 0 ── fail (retriable) ── sleep 500ms
//! attempt 1 ── fail (retriable) ── sleep 1s     (or retry_after, if given)
//! attempt 2 ── fail (retriable) ── sleep 2s ... capped at 8s
//! attempt n ── fail (other kind) ── return immediately
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::stages::PipelineError;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Delay before retry number `attempt` (0-based). A server-provided hint
    /// wins but is still capped.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let backoff = hint.unwrap_or_else(|| {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        });
        backoff.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or the
/// policy's retries are used up.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt, err.retry_after());
                warn!(
                    operation = label,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retriable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use fixflow_gateway::GatewayError;

    use super::*;
    use crate::stages::Stage;

    fn transient() -> PipelineError {
        PipelineError::from_gateway(Stage::Locator, GatewayError::Timeout("slow".into()))
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10);
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(4));
        assert_eq!(policy.delay_for(9, None), Duration::from_secs(8));
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(60))),
            Duration::from_secs(8)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = with_retries(&RetryPolicy::new(3), "locate", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(&RetryPolicy::new(2), "locate", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn malformed_output_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(&RetryPolicy::new(5), "report", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::malformed(Stage::Reporter, "bad json"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retries_is_single_attempt() {
        let attempts = AtomicU32::new(0);
        let _ = with_retries(&RetryPolicy::default(), "patch", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(transient())
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
