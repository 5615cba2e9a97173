//! Retry utilities with exponential backoff and jitter.
//!
//! Retries an async operation until it succeeds, fails with a non-retryable
//! error, or the cancellation token fires. Cancellation is checked before
//! every attempt and interrupts a backoff wait in progress.
//!
//! # Example
//!
//! ```ignore
//! use bootstrapper_common::retry::{retry_with_backoff, RetryConfig};
//!
//! let summary = retry_with_backoff(
//!     &RetryConfig::default(),
//!     "apply-schemas",
//!     &cancel,
//!     || async { apply_resource_set(&client, &set, &cancel).await },
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::Error;

/// Lower bound on any backoff delay, so a zero config cannot hot-loop
pub const MIN_BACKOFF: Duration = Duration::from_millis(10);

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Create a config that retries forever (infinite attempts)
    pub fn infinite() -> Self {
        Self::default()
    }

    /// Create an infinite config with the given delay bounds
    pub fn with_delays(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Default::default()
        }
    }

    fn ceiling(&self) -> Duration {
        self.max_delay.max(MIN_BACKOFF)
    }

    /// Next base delay after `delay`, capped at max_delay
    fn next_delay(&self, delay: Duration) -> Duration {
        let next = delay.as_secs_f64() * self.backoff_multiplier.max(1.0);
        Duration::from_secs_f64(next.min(self.ceiling().as_secs_f64())).max(MIN_BACKOFF)
    }
}

/// Apply 0.5x to 1.5x jitter and clamp into `[MIN_BACKOFF, ceiling]`
fn jittered(delay: Duration, ceiling: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
        .min(ceiling)
        .max(MIN_BACKOFF)
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries until success while the operation fails with a retryable error
/// (see [`Error::is_retryable`]). A non-retryable error is returned
/// immediately. If `cancel` fires before an attempt or during a backoff
/// wait, returns [`Error::Cancelled`] without waiting out the delay.
///
/// With `max_attempts > 0` the last retryable error is returned once the
/// budget is spent.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay.max(MIN_BACKOFF);

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(operation_name));
        }

        attempt += 1;

        let e = match operation().await {
            Ok(result) => {
                debug!(operation = %operation_name, attempt, "Operation succeeded");
                return Ok(result);
            }
            Err(e) => e,
        };

        if e.is_cancelled() || !e.is_retryable() {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %e,
                "Operation failed with non-retryable error"
            );
            return Err(e);
        }

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(e);
        }

        let jittered_delay = jittered(delay, config.ceiling());

        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %e,
            delay_ms = jittered_delay.as_millis(),
            "Operation failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::cancelled(operation_name));
            }
            _ = tokio::time::sleep(jittered_delay) => {}
        }

        delay = config.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    fn not_ready() -> Error {
        Error::apply_retryable("Widget//a", "root", "schema not installed")
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let cancel = CancellationToken::new();
        let result = retry_with_backoff(&fast(), "op", &cancel, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_succeeds_after_retryable_failures() {
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_with_backoff(&fast(), "op", &cancel, || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 4 {
                    Err(not_ready())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), Error> = retry_with_backoff(&fast(), "op", &cancel, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::apply_fatal("Widget//a", "root", "invalid"))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert!(!err.is_retryable());
        assert!(!err.is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let config = RetryConfig {
            max_attempts: 3,
            ..fast()
        };

        let result: Result<(), Error> = retry_with_backoff(&config, "op", &cancel, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(not_ready())
            }
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), Error> = retry_with_backoff(&fast(), "op", &cancel, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let config = RetryConfig::with_delays(Duration::from_secs(60), Duration::from_secs(60));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: Result<(), Error> =
            retry_with_backoff(&config, "op", &cancel, || async { Err(not_ready()) }).await;

        assert!(result.unwrap_err().is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_delays_are_bounded_and_non_zero() {
        let config = RetryConfig {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 0.0,
        };
        let next = config.next_delay(Duration::ZERO);
        assert!(next >= MIN_BACKOFF);
        assert!(jittered(Duration::ZERO, config.ceiling()) >= MIN_BACKOFF);

        let config = fast();
        let mut delay = config.initial_delay;
        for _ in 0..20 {
            delay = config.next_delay(delay);
            assert!(delay <= Duration::from_millis(10));
        }
    }
}
