use crate::core::config::RetryConfig;
use crate::core::error::{classify, ErrorClass};
use anyhow::Result;
use log::warn;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff for transient service failures.
///
/// Only errors classified as [`ErrorClass::Transient`] are retried. Anything
/// else propagates on the attempt that produced it, without sleeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.retry_count, Duration::from_millis(config.retry_delay_ms))
    }

    /// The sleep before each retry, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let initial = self.initial_delay;
        (0..self.max_retries).map(move |i| initial.saturating_mul(1u32 << i.min(31)))
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delays = self.delays();
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if classify(&err) != ErrorClass::Transient {
                return Err(err);
            }
            let Some(delay) = delays.next() else {
                warn!("{}: giving up after {} attempts: {:#}", label, attempt, err);
                return Err(err);
            };

            warn!(
                "{}: transient failure (attempt {}/{}), retrying in {}ms: {:#}",
                label,
                attempt,
                self.max_retries + 1,
                delay.as_millis(),
                err
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GenerationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn overloaded() -> anyhow::Error {
        GenerationError::Http {
            status: 503,
            message: "The model is overloaded".to_string(),
        }
        .into()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn test_delays_double() {
        let delays: Vec<u128> = RetryPolicy::default().delays().map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000]);
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).delays().count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() -> Result<()> {
        for failures in 0..=3 {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();
            let value = fast_policy()
                .run("test", || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < failures {
                            Err(overloaded())
                        } else {
                            Ok(n)
                        }
                    }
                })
                .await?;
            assert_eq!(value, failures);
            assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_exhausted_budget_propagates_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<()> = fast_policy()
            .run("test", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(GenerationError::Http {
                        status: 429,
                        message: format!("attempt {}", n),
                    }
                    .into())
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(err.to_string().contains("attempt 3"));
    }

    #[tokio::test]
    async fn test_non_transient_fails_fast() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        for err in [
            GenerationError::MissingCredential,
            GenerationError::Http { status: 400, message: "bad".to_string() },
            GenerationError::Parse("not json".to_string()),
        ] {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();
            let started = Instant::now();
            let result: Result<()> = policy
                .run("test", || {
                    let counter = counter.clone();
                    let err = err.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(err.into())
                    }
                })
                .await;

            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(started.elapsed() < Duration::from_secs(1));
        }
    }
}
