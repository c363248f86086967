use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};

/// Bounded attempts with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt + 1` (zero-based).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts are used up. Cancellation is observed between attempts.
    pub async fn run<F, Fut, T>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || attempt + 1 >= attempts => return Err(err),
                Err(err) => {
                    let wait = self.compute_delay(attempt);
                    warn!(attempt = attempt + 1, ?wait, stage = label, error = %err, "retrying operation");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::job::Phase;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let p = policy();
        assert_eq!(p.compute_delay(0), Duration::from_millis(100));
        assert_eq!(p.compute_delay(1), Duration::from_millis(200));
        assert_eq!(p.compute_delay(2), Duration::from_millis(250));
        assert_eq!(p.compute_delay(40), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let out = policy()
            .run("image", &token, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(Error::collaborator(Phase::Images, "busy"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(out, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let out: Result<()> = policy()
            .run("image", &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::collaborator(Phase::Images, "down")) }
            })
            .await;
        assert_eq!(out, Err(Error::collaborator(Phase::Images, "down")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let out: Result<()> = policy()
            .run("image", &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Validation("bad".into())) }
            })
            .await;
        assert!(matches!(out, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let out: Result<()> = policy().run("image", &token, |_| async { Ok(()) }).await;
        assert_eq!(out, Err(Error::Cancelled));
    }
}
