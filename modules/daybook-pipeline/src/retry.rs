use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use daybook_common::Config;

use crate::error::ProviderError;

const RETRY_BASE: Duration = Duration::from_secs(1);
const MAX_JITTER_MS: u64 = 500;
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Per-call timeout plus exponential backoff for transient provider errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter_ms: u64,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: RETRY_BASE,
            max_jitter_ms: MAX_JITTER_MS,
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.provider_max_attempts.max(1),
            timeout: config.provider_timeout,
            ..Self::default()
        }
    }

    /// No waiting between attempts. For tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_jitter_ms: 0,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=self.max_jitter_ms))
        } else {
            Duration::ZERO
        };
        let exponential = self.base_delay.saturating_mul(3u32.saturating_pow(attempt));
        exponential.min(MAX_BACKOFF) + jitter
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// A timeout counts as a transient failure.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        op = label,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient provider error, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use ai_client::AiError;

    use super::*;

    fn rate_limited() -> ProviderError {
        ProviderError::Ai(AiError::Api {
            status: 429,
            message: "slow down".into(),
        })
    }

    #[test]
    fn backoff_grows_then_caps_without_overflow() {
        let policy = RetryPolicy {
            max_jitter_ms: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(9));
        assert_eq!(policy.backoff(25), MAX_BACKOFF);
        assert_eq!(policy.backoff(u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = RetryPolicy::immediate(3)
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(rate_limited())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Invalid("bad".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stalled_call_times_out() {
        let policy = RetryPolicy::immediate(1).with_timeout(Duration::from_millis(20));
        let result: Result<(), _> = policy
            .run("test", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

}
