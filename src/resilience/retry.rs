//! Bounded retry with exponential backoff
//!
//! Re-invokes a failed call up to `max_attempts` total tries (the original
//! call is attempt 1), sleeping an exponentially growing backoff between
//! tries. Only failures the classifier marks retryable are re-attempted;
//! everything else propagates immediately. The result type carries the
//! attempt count explicitly, so callers never need external listeners or
//! shared counters. State is per call, never shared.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Errors surfaced by a retry execution.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `last` is the final one.
    #[error("All {attempts} attempts exhausted")]
    Exhausted { attempts: u32, last: E },

    /// A non-retryable failure propagated immediately.
    #[error("Non-retryable failure on attempt {attempts}")]
    NonRetryable { attempts: u32, source: E },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up, including the original call.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NonRetryable { attempts, .. } => *attempts,
        }
    }

    /// The underlying error.
    pub fn into_source(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NonRetryable { source, .. } => source,
        }
    }
}

/// A successful result together with how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    /// 1 means the original call succeeded without any retry.
    pub attempts: u32,
}

/// Decides whether a failure is worth another attempt.
///
/// Implemented for any `Fn(&E) -> bool`, so callers can pass a closure.
pub trait RetryClassifier<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

impl<E, F> RetryClassifier<E> for F
where
    F: Fn(&E) -> bool,
{
    fn is_retryable(&self, error: &E) -> bool {
        self(error)
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries, including the original call.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles each retry after that.
    pub initial_backoff: Duration,
    /// Upper bound on any single backoff sleep.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(300),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::invalid(
                "max_backoff must not be below initial_backoff",
            ));
        }
        Ok(())
    }

    /// Backoff before retry number `retry_index` (0-based): initial, then
    /// doubled each time, capped at `max_backoff`.
    pub fn backoff_for(&self, retry_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_index);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.max_backoff = backoff;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-call retry driver.
///
/// Holds only configuration; each `execute` owns its attempt counter, so one
/// `Retry` value can safely drive many concurrent calls.
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Invoke `op`, retrying classified-retryable failures with backoff.
    ///
    /// The backoff sleep is an ordinary await: dropping the returned future
    /// during the wait aborts retrying immediately.
    pub async fn execute<F, Fut, T, E, P>(
        &self,
        classifier: P,
        mut op: F,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: RetryClassifier<E>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(Retried { value, attempts: attempt }),
                Err(error) => {
                    if !classifier.is_retryable(&error) {
                        return Err(RetryError::NonRetryable { attempts: attempt, source: error });
                    }
                    if attempt >= self.config.max_attempts {
                        return Err(RetryError::Exhausted { attempts: attempt, last: error });
                    }
                    let backoff = self.config.backoff_for(attempt - 1);
                    debug!(attempt, ?backoff, "Retry: attempt failed, backing off");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Debug, Error)]
    #[error("{message} (retryable={retryable})")]
    struct TestError {
        message: &'static str,
        retryable: bool,
    }

    fn retry(max_attempts: u32) -> Retry {
        Retry::new(
            RetryConfig::builder()
                .max_attempts(max_attempts)
                .initial_backoff(Duration::from_millis(5))
                .max_backoff(Duration::from_millis(50))
                .build()
                .unwrap(),
        )
        .unwrap()
    }

    fn retryable(error: &TestError) -> bool {
        error.retryable
    }

    #[tokio::test]
    async fn test_first_try_success_is_attempt_one() {
        let result = retry(3)
            .execute(retryable, || async { Ok::<_, TestError>("ok") })
            .await
            .unwrap();
        assert_eq!(result.value, "ok");
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_fail_once_then_succeed_is_two_invocations() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retry(3)
            .execute(retryable, move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError { message: "transient", retryable: true })
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_always_failing_makes_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retry(3)
            .execute(retryable, move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError { message: "down", retryable: true })
                }
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts: 3, .. }) => {}
            other => panic!("expected exhaustion after 3 attempts, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_propagates_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retry(5)
            .execute(retryable, move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError { message: "fatal", retryable: false })
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::builder()
            .max_attempts(5)
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(300))
            .build()
            .unwrap();

        assert_eq!(config.backoff_for(0), Duration::from_millis(100));
        assert_eq!(config.backoff_for(1), Duration::from_millis(200));
        assert_eq!(config.backoff_for(2), Duration::from_millis(300), "capped");
        assert_eq!(config.backoff_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::builder().max_attempts(0).build().is_err());
        assert!(RetryConfig::builder()
            .initial_backoff(Duration::from_secs(10))
            .max_backoff(Duration::from_secs(1))
            .build()
            .is_err());
        assert!(RetryConfig::builder().max_attempts(1).build().is_ok());
    }
}
