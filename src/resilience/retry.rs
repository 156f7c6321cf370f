//! Bounded retry with classification and cancellation.
//!
//! One invocation moves through `Idle -> Attempting -> {Success, Retrying ->
//! Attempting, Cancelled, Exhausted}`: each try is an `Attempting` step, the
//! backoff wait is `Retrying`, and the terminal states are success, a
//! cooperative cancellation, a terminal (non-retryable) failure, or running
//! out of attempts.

use super::cancel::CancelToken;
use crate::{Error, Result};
use std::time::Duration;
use tracing::debug;

/// Whether a failed attempt may be tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    Terminal,
}

/// Default classification: the exhaustive category table from
/// [`Error::is_retryable`].
pub fn default_classify(err: &Error) -> Disposition {
    if err.is_retryable() {
        Disposition::Retry
    } else {
        Disposition::Terminal
    }
}

/// Retry behavior for one executor invocation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Minimum backoff applied to rate-limit failures, even when the
    /// exponential schedule would retry sooner.
    pub rate_limit_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            rate_limit_floor: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_rate_limit_floor(mut self, floor: Duration) -> Self {
        self.rate_limit_floor = floor;
        self
    }

    /// Backoff before the attempt after `attempt` (1-based) failed:
    /// `base * 2^(attempt-1)`, capped at `max_delay`. Category-dependent:
    /// rate limits honor the hint and the floor. The executor clamps the
    /// result against the previous delay so the schedule never shrinks.
    fn backoff_delay(&self, attempt: u32, err: &Error) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let exp = self
            .base_delay
            .saturating_mul(factor)
            .min(self.max_delay);
        if matches!(err.category(), crate::ErrorCategory::RateLimit) {
            let hinted = err
                .retry_after_ms()
                .map(Duration::from_millis)
                .unwrap_or(self.rate_limit_floor);
            exp.max(hinted).max(self.rate_limit_floor).min(self.max_delay.max(self.rate_limit_floor))
        } else {
            exp
        }
    }
}

/// Run `operation` with bounded retries under `policy`.
///
/// - `operation(attempt)` receives the 1-based attempt number; the
///   cancellation token should also be threaded into the operation itself so
///   the transport can abort early. The executor does not preempt a running
///   attempt.
/// - `classify` decides retryable vs terminal after each failure; terminal
///   failures surface immediately without consuming remaining attempts.
/// - Cancellation is checked at each attempt boundary and raced against the
///   backoff wait; it surfaces as [`Error::Cancelled`], which callers drop
///   silently rather than report.
/// - Exhausting `max_attempts` surfaces
///   [`Error::RetriesExhausted`] wrapping the last observed failure.
///
/// The executor never touches the cache; write-back belongs to the caller.
pub async fn fetch_with_retry<T, F, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    classify: C,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    C: Fn(&Error) -> Disposition,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut last_delay = Duration::ZERO;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        attempt += 1;

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        // An operation that observed the token itself is already settled.
        if err.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if classify(&err) == Disposition::Terminal {
            debug!(attempt, error = %err, "terminal failure, not retrying");
            return Err(err);
        }

        if attempt >= max_attempts {
            debug!(attempt, error = %err, "retry budget exhausted");
            return Err(Error::RetriesExhausted {
                attempts: attempt,
                source: Box::new(err),
            });
        }

        // Delays never shrink within one invocation, even when a long
        // rate-limit hint is followed by a cheaper error category.
        let delay = policy.backoff_delay(attempt, &err).max(last_delay);
        last_delay = delay;
        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after backoff");
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::cancel::cancel_pair;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_base_delay(Duration::from_millis(1))
            .with_rate_limit_floor(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = fetch_with_retry(
            &fast_policy(3),
            &CancelToken::never(),
            default_classify,
            |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42u32)
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_uses_all_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<()> = fetch_with_retry(
            &fast_policy(3),
            &CancelToken::never(),
            default_classify,
            |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::network("unreachable"))
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, Error::Network { .. }));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminal_failure_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<()> = fetch_with_retry(
            &fast_policy(5),
            &CancelToken::never(),
            default_classify,
            |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad request"))
            },
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_eventual_success_after_retryable_failures() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = fetch_with_retry(
            &fast_policy(5),
            &CancelToken::never(),
            default_classify,
            |attempt| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(Error::server(503, "warming up"))
                } else {
                    Ok("ready")
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancel_before_first_attempt() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<()> =
            fetch_with_retry(&fast_policy(3), &token, default_classify, |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::network("unreachable"))
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_discards_delay() {
        let (handle, token) = cancel_pair();
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_secs(3600));

        let start = std::time::Instant::now();
        let fetch = fetch_with_retry(&policy, &token, default_classify, |_| async move {
            Err::<(), _>(Error::network("unreachable"))
        });
        let outcome = tokio::join!(fetch, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        })
        .0;

        assert!(matches!(outcome, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_backoff_is_monotonic_and_bounded() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(400));
        let err = Error::network("x");
        let delays: Vec<_> = (1..=5).map(|a| policy.backoff_delay(a, &err)).collect();
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_backoff_never_shrinks_across_mixed_categories() {
        // A long rate-limit hint on the first failure must not be followed
        // by a shorter wait when the next failure is a plain network error.
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(1))
            .with_rate_limit_floor(Duration::from_millis(1));

        let start = std::time::Instant::now();
        let result: Result<()> = fetch_with_retry(
            &policy,
            &CancelToken::never(),
            default_classify,
            |attempt| async move {
                if attempt == 1 {
                    Err(Error::rate_limit(Some(50)))
                } else {
                    Err(Error::network("unreachable"))
                }
            },
        )
        .await;

        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 3, .. })));
        // Both waits are at least the 50ms hint.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_rate_limit_respects_floor_and_hint() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(1))
            .with_rate_limit_floor(Duration::from_millis(500));
        let floor = policy.backoff_delay(1, &Error::rate_limit(None));
        assert!(floor >= Duration::from_millis(500));
        let hinted = policy.backoff_delay(1, &Error::rate_limit(Some(900)));
        assert!(hinted >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_operation_reported_cancellation_passes_through() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<()> = fetch_with_retry(
            &fast_policy(3),
            &CancelToken::never(),
            default_classify,
            |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Cancelled)
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
