//! Bounded exponential backoff around single page fetches.

use derive_builder::Builder;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::source::SourceError;

/// Retry behaviour for one network-facing call.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    #[builder(default = "4")]
    pub(crate) max_attempts: u32,

    /// Delay before the second attempt.
    #[builder(default = "Duration::from_millis(200)")]
    pub(crate) initial_delay: Duration,

    /// Upper bound on any single delay.
    #[builder(default = "Duration::from_secs(10)")]
    pub(crate) max_delay: Duration,

    #[builder(default = "2.0")]
    pub(crate) multiplier: f64,

    /// Fraction of the delay added or removed at random (0.0 to 1.0).
    #[builder(default = "0.1")]
    pub(crate) jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Why a retried call gave up.
#[derive(Debug)]
pub(crate) enum RetryFailure {
    /// Non-retryable error, or retryable attempts ran out.
    Failed { error: SourceError, attempts: u32 },
    Cancelled,
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the `failed`-th failed attempt (1-based).
    pub fn delay_after(&self, failed: u32) -> Duration {
        if failed == 0 {
            return Duration::ZERO;
        }
        let exponent = failed.min(30) as i32 - 1;
        let base = self.initial_delay.as_nanos() as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = base.min(self.max_delay.as_nanos() as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 && capped > 0.0 {
            let spread = capped * jitter;
            capped + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            capped
        };
        Duration::from_nanos(delay.max(0.0) as u64)
    }

    /// Runs `call` until it succeeds, fails permanently or attempts run out.
    ///
    /// Cancellation interrupts both the in-flight call and the backoff sleep.
    pub(crate) async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
                result = call() => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() || attempts >= max_attempts {
                return Err(RetryFailure::Failed { error, attempts });
            }

            let delay = self.delay_after(attempts);
            warn!(
                operation,
                attempt = attempts,
                max_attempts,
                ?delay,
                "{error}, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicyBuilder::default()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .jitter(0.0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = RetryPolicyBuilder::default()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350))
            .jitter(0.0)
            .build()
            .unwrap();

        assert_eq!(policy.delay_after(0), Duration::ZERO);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
        assert_eq!(policy.delay_after(40), Duration::from_millis(350));
    }

    #[test]
    fn test_sub_millisecond_delays_keep_their_precision() {
        let policy = RetryPolicyBuilder::default()
            .initial_delay(Duration::from_micros(250))
            .jitter(0.0)
            .build()
            .unwrap();

        assert_eq!(policy.delay_after(1), Duration::from_micros(250));
        assert_eq!(policy.delay_after(2), Duration::from_micros(500));
        assert_eq!(policy.delay_after(3), Duration::from_millis(1));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = RetryPolicyBuilder::default()
            .initial_delay(Duration::from_millis(100))
            .jitter(0.5)
            .build()
            .unwrap();

        for _ in 0..50 {
            let delay = policy.delay_after(1);
            assert!(delay >= Duration::from_millis(49));
            assert!(delay <= Duration::from_millis(151));
        }
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = fast_policy(0);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let cancel = CancellationToken::new();

        let result = fast_policy(4)
            .run("search", &cancel, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(SourceError::Transient("503".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let cancel = CancellationToken::new();

        let result: Result<(), _> = fast_policy(3)
            .run("continue", &cancel, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Timeout("read timeout".to_string()))
            })
            .await;

        match result {
            Err(RetryFailure::Failed { error, attempts }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(error, SourceError::Timeout(_)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let cancel = CancellationToken::new();

        let result: Result<(), _> = fast_policy(5)
            .run("search", &cancel, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Authorization("403".to_string()))
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryFailure::Failed { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let policy = RetryPolicyBuilder::default()
            .initial_delay(Duration::from_secs(60))
            .jitter(0.0)
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let result: Result<(), _> = policy
            .run("search", &cancel, move || async move {
                Err(SourceError::Connection("reset".to_string()))
            })
            .await;

        assert!(matches!(result, Err(RetryFailure::Cancelled)));
    }
}
