//! Bounded exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Retry policy: bounded attempts with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized away to avoid thundering herds.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryPolicy {
    /// Exponential backoff starting at 100ms, capped at 5s, 25% jitter.
    #[must_use]
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.25,
        }
    }

    /// No retries: fail on the first error.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::exponential(0)
        }
    }

    /// Delay before the given retry attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        if self.jitter <= 0.0 {
            return capped;
        }
        let jitter_span = capped.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(0.0..=jitter_span);
        Duration::from_secs_f64((capped.as_secs_f64() - offset).max(0.0))
    }
}

/// Run `op` under the policy, retrying while `is_retryable` says the
/// error is transient. The final error is returned once attempts are
/// exhausted or a non-retryable error appears.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_retryable(&err) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient error");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Transient(bool);

    impl std::fmt::Display for Transient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "transient={}", self.0)
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Transient> = with_retry(&fast_policy(5), |e: &Transient| e.0, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Transient(true))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Transient> = with_retry(&fast_policy(5), |e: &Transient| e.0, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Transient(false))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Transient> = with_retry(&fast_policy(2), |e: &Transient| e.0, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Transient(true))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(8), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_below_nominal_delay() {
        let policy = RetryPolicy::exponential(3);
        for attempt in 1..=3 {
            let nominal = policy
                .base_delay
                .saturating_mul(2u32.pow(attempt - 1))
                .min(policy.max_delay);
            for _ in 0..32 {
                assert!(policy.delay_for(attempt) <= nominal);
            }
        }
    }
}
