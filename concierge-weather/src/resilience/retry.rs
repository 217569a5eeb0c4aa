//! Retry with exponential backoff and jitter.
//!
//! Retries:
//! - `UpstreamUnavailable` (5xx, timeouts, transport errors, unusable payloads)
//! - `RateLimited` (429), waiting at least `Retry-After` when the upstream sent one
//!
//! Never retries `BadRequest`, configuration errors, circuit rejections, or
//! cancellation.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::WeatherError;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;
pub const DEFAULT_MAX_DELAY_MS: u64 = 2_000;
pub const DEFAULT_JITTER_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            factor: 2.0,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `min(base * factor^attempt + jitter, max_delay)`; `attempt` is 0 for the first retry.
    pub fn delay_for_attempt(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let backoff_ms = self.base_delay.as_millis() as f64 * self.factor.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        let total_ms = (backoff_ms + jitter.as_millis() as f64).min(max_ms);

        if total_ms.is_finite() && total_ms > 0.0 {
            Duration::from_millis(total_ms as u64)
        } else if total_ms > 0.0 {
            self.max_delay
        } else {
            Duration::ZERO
        }
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    fn backoff(&self, attempt: u32, error: &WeatherError) -> Duration {
        let delay = self.delay_for_attempt(attempt, self.sample_jitter());
        match error {
            WeatherError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => delay.max(Duration::from_secs(*secs)).min(self.max_delay),
            _ => delay,
        }
    }
}

pub fn should_retry(error: &WeatherError) -> bool {
    error.is_retryable()
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy is exhausted. The closure receives the zero-based attempt number.
///
/// Cancellation is checked before each attempt and interrupts the backoff
/// sleep; an attempt already in flight is allowed to finish.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, WeatherError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, WeatherError>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(WeatherError::Cancelled);
        }

        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(retries = attempt, "request succeeded after retries");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !should_retry(&error) {
            tracing::debug!(%error, "non-retryable error");
            return Err(error);
        }

        if attempt >= policy.max_retries {
            tracing::warn!(attempts = attempt + 1, %error, "retry attempts exhausted");
            return Err(error);
        }

        let delay = policy.backoff(attempt, &error);
        tracing::warn!(
            attempt = attempt + 1,
            max_attempts = policy.max_retries + 1,
            ?delay,
            %error,
            "retryable error, backing off"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(WeatherError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            factor: 2.0,
            max_delay: Duration::from_millis(5),
            jitter: Duration::ZERO,
        }
    }

    fn unavailable() -> WeatherError {
        WeatherError::unavailable(ProviderId::OpenMeteo, "503")
    }

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            factor: 2.0,
            max_delay: Duration::from_millis(2_000),
            jitter: Duration::ZERO,
        };

        assert_eq!(policy.delay_for_attempt(0, Duration::ZERO), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1, Duration::ZERO), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2, Duration::ZERO), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(3, Duration::ZERO), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(30, Duration::ZERO), Duration::from_millis(2_000));
    }

    #[test]
    fn jitter_is_added_before_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(0, Duration::from_millis(40)),
            Duration::from_millis(290)
        );
        assert_eq!(
            policy.delay_for_attempt(3, Duration::from_millis(99)),
            Duration::from_millis(2_000)
        );
    }

    #[test]
    fn sampled_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            assert!(policy.sample_jitter() <= Duration::from_millis(DEFAULT_JITTER_MS));
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = with_retry(&fast_policy(2), &CancellationToken::new(), |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("sunny")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "sunny");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&fast_policy(2), &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;

        assert!(matches!(result, Err(WeatherError::UpstreamUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&fast_policy(2), &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WeatherError::bad_request("invalid key")) }
        })
        .await;

        assert!(matches!(result, Err(WeatherError::BadRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&fast_policy(2), &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(WeatherError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(30),
            factor: 1.0,
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        };

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = with_retry(&policy, &token, |_| async { Err(unavailable()) }).await;

        assert!(matches!(result, Err(WeatherError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
