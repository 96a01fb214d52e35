//! Bounded retry with exponential backoff.
//!
//! Drivers wrap single fallible reads in [`retry_async`] so that transient link faults
//! are absorbed locally. When the attempt budget is exhausted the last error is
//! returned unchanged, so callers see the same error kind the device produced.

use crate::error::GlazeResult;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Defines a policy for retrying an operation.
///
/// # Example
///
/// ```rust
/// use glaze::error_recovery::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(5, Duration::from_millis(10));
/// assert_eq!(policy.delay_for(0), Duration::from_millis(10));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(40));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    ///
    /// A value of 1 disables retries.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub backoff_delay: Duration,

    /// Factor applied to the delay after every failed attempt.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    /// Three attempts, starting at 10 ms and doubling.
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(10))
    }
}

impl RetryPolicy {
    /// Doubling backoff starting at `backoff_delay`.
    pub fn exponential(max_attempts: u32, backoff_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_delay,
            multiplier: 2,
        }
    }

    /// Policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_delay: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Delay to wait after the failed attempt with the given zero-based index.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.backoff_delay.saturating_mul(factor)
    }
}

/// Runs `op` against `ctx` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt budget is spent.
///
/// Only errors for which [`is_retryable`](crate::error::GlazeError::is_retryable) holds trigger another attempt.
/// The final error is returned as produced by `op`. The context is handed to every
/// attempt, which lets an operation re-read from a transport it borrows mutably.
///
/// # Example
///
/// ```rust,ignore
/// let line = retry_async(&policy, "read ack", &mut transport, |port| {
///     Box::pin(async move { port.read_until(b'\n').await })
/// })
/// .await?;
/// ```
pub async fn retry_async<C, T, F>(
    policy: &RetryPolicy,
    operation: &str,
    ctx: &mut C,
    mut op: F,
) -> GlazeResult<T>
where
    C: ?Sized + Send,
    F: for<'c> FnMut(&'c mut C) -> BoxFuture<'c, GlazeResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(ctx).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GlazeError;
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::exponential(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_no_retries_on_success() {
        let mut counter = 0u32;
        let result = retry_async(&fast_policy(3), "test", &mut counter, |calls| {
            Box::pin(async move {
                *calls += 1;
                Ok("Success!")
            })
        })
        .await;
        assert_eq!(result.unwrap(), "Success!");
        assert_eq!(counter, 1);
    }

    #[tokio::test]
    async fn test_one_retry() {
        let mut counter = 0u32;
        let result = retry_async(&fast_policy(3), "test", &mut counter, |calls| {
            Box::pin(async move {
                *calls += 1;
                if *calls < 2 {
                    Err(GlazeError::Transport("Error!".into()))
                } else {
                    Ok("Success!")
                }
            })
        })
        .await;
        assert_eq!(result.unwrap(), "Success!");
        assert_eq!(counter, 2);
    }

    #[tokio::test]
    async fn test_always_fails_returns_last_error() {
        let mut counter = 0u32;
        let result: GlazeResult<()> = retry_async(&fast_policy(2), "test", &mut counter, |calls| {
            Box::pin(async move {
                *calls += 1;
                Err(GlazeError::Transport(format!("Error {calls}!")))
            })
        })
        .await;
        match result {
            Err(GlazeError::Transport(msg)) => assert_eq!(msg, "Error 2!"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(counter, 2);
    }

    #[tokio::test]
    async fn test_format_errors_are_not_retried() {
        let mut counter = 0u32;
        let result: GlazeResult<()> = retry_async(&fast_policy(5), "test", &mut counter, |calls| {
            Box::pin(async move {
                *calls += 1;
                Err(GlazeError::ProtocolFormat("bad header".into()))
            })
        })
        .await;
        assert!(matches!(result, Err(GlazeError::ProtocolFormat(_))));
        assert_eq!(counter, 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_retries_are_logged() {
        let mut counter = 0u32;
        let _ = retry_async(&fast_policy(2), "read scan", &mut counter, |calls| {
            Box::pin(async move {
                *calls += 1;
                if *calls < 2 {
                    Err(GlazeError::Communication("NAK".into()))
                } else {
                    Ok(())
                }
            })
        })
        .await;
        assert!(logs_contain("Retrying after failure"));
        assert!(logs_contain("read scan"));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_delay, Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
    }
}
