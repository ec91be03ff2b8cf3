//! Exponential backoff
//!
//! The façade itself only retries unprocessed batch items. Callers that want
//! to retry whole idempotent operations (the CLI does for read-only
//! commands) wrap them in [`retry_with_backoff`].

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Service error codes that signal a transient server-side fault
const TRANSIENT_SERVICE_CODES: &[&str] = &[
    "InternalError",
    "InternalFailure",
    "InternalServerError",
    "ServiceUnavailable",
    "ServiceUnavailableException",
];

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or `config.max_attempts` attempts have been made
///
/// ```ignore
/// let buckets = retry_with_backoff(
///     &config.retry,
///     || async { storage.list(&options).await },
///     is_retryable_error,
/// ).await?;
/// ```
pub async fn retry_with_backoff<T, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let mut attempt = 1;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempt >= config.max_attempts || !should_retry(&error) {
            return Err(error);
        }

        let delay = calculate_backoff(config, attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, %error, "Retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Delay before retry number `attempt` (1-based): the doubled initial delay,
/// capped at the maximum, plus up to the same amount of jitter
pub(crate) fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    let delay_ms = config
        .initial_backoff_ms
        .saturating_mul(1 << doublings)
        .min(config.max_backoff_ms);
    Duration::from_millis(delay_ms + jitter(delay_ms))
}

fn jitter(bound: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or_default();
    nanos % bound.max(1)
}

/// Whether `error` is transient: connection failures, throttling, server
/// faults and interrupted I/O
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Service { code, .. } => TRANSIENT_SERVICE_CODES.contains(&code.as_str()),
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        ),
        other => other.is_retryable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        };
        for (attempt, base) in [(1, 100), (2, 200), (3, 400), (4, 800), (5, 1000), (30, 1000)] {
            let delay = calculate_backoff(&config, attempt).as_millis() as u64;
            assert!(
                (base..base * 2).contains(&delay),
                "attempt {attempt}: {delay}ms not in [{base}, {})",
                base * 2
            );
        }
    }

    #[test]
    fn test_zero_backoff() {
        let config = RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        };
        assert_eq!(calculate_backoff(&config, 1), Duration::ZERO);
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::Connection("timed out".to_string())));
        assert!(is_retryable_error(&Error::Throttled(
            "ProvisionedThroughputExceededException".to_string()
        )));
        assert!(is_retryable_error(&Error::Service {
            code: "ServiceUnavailable".to_string(),
            message: "try later".to_string(),
        }));

        assert!(!is_retryable_error(&Error::Service {
            code: "ValidationException".to_string(),
            message: "bad request".to_string(),
        }));
        assert!(!is_retryable_error(&Error::Auth("access denied".to_string())));
        assert!(!is_retryable_error(&Error::NotFound("bucket".to_string())));
        assert!(!is_retryable_error(&Error::InvalidQuery(
            "missing partition key".to_string()
        )));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_throttling() {
        let calls = Cell::new(0);
        let result = retry_with_backoff(
            &fast(),
            || {
                calls.set(calls.get() + 1);
                let call = calls.get();
                async move {
                    if call < 3 {
                        Err(Error::Throttled("slow down".to_string()))
                    } else {
                        Ok(call)
                    }
                }
            },
            is_retryable_error,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<()> = retry_with_backoff(
            &fast(),
            || {
                calls.set(calls.get() + 1);
                async { Err(Error::Connection("refused".to_string())) }
            },
            is_retryable_error,
        )
        .await;

        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_definitive_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = retry_with_backoff(
            &fast(),
            || {
                calls.set(calls.get() + 1);
                async { Err(Error::NotFound("orders".to_string())) }
            },
            is_retryable_error,
        )
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.get(), 1);
    }
}
