//! Per-provider circuit breaker.
//!
//! CLOSED counts consecutive failures inside a sliding window and opens once
//! the threshold is reached. OPEN rejects without touching the network until
//! `reopen_at`, after which exactly one trial call is let through (HALF_OPEN).

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{error::WeatherError, provider::ProviderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub window: Duration,
    pub open_duration: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::minutes(2),
            open_duration: Duration::seconds(60),
        }
    }
}

/// Point-in-time view of one breaker, as reported by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub window_start: Option<DateTime<Utc>>,
    pub reopen_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    window_start: Option<DateTime<Utc>>,
    reopen_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl Default for BreakerInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            window_start: None,
            reopen_at: None,
            trial_in_flight: false,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    provider: ProviderId,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

/// Admission to call the upstream once.
///
/// Must be settled with [`BreakerPermit::succeeded`], [`BreakerPermit::failed`]
/// or [`BreakerPermit::release`]. Dropping an unsettled trial permit gives the
/// trial slot back so a cancelled call cannot wedge the breaker in HALF_OPEN.
#[must_use]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    pub fn failed(mut self, now: DateTime<Utc>) {
        self.settled = true;
        self.breaker.on_failure(now);
    }

    /// Settles without counting either way (e.g. the upstream rejected the request itself).
    pub fn release(mut self) {
        self.settled = true;
        if self.trial {
            self.breaker.release_trial();
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

impl CircuitBreaker {
    pub fn new(provider: ProviderId, settings: BreakerSettings) -> Self {
        Self {
            provider,
            settings,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Asks to make one upstream call at `now`.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<BreakerPermit<'_>, WeatherError> {
        let mut inner = self.inner.lock();

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let due = inner.reopen_at.is_none_or(|at| now >= at);
                if !due {
                    return Err(WeatherError::CircuitOpen {
                        provider: self.provider,
                    });
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(provider = %self.provider, "circuit half-open, allowing trial call");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(WeatherError::CircuitOpen {
                        provider: self.provider,
                    });
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Ok(BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Whether a call at `now` would be admitted. Does not change state.
    pub fn would_admit(&self, now: DateTime<Utc>) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.reopen_at.is_none_or(|at| now >= at),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(provider = %self.provider, "trial call succeeded, circuit closed");
                *inner = BreakerInner::default();
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.window_start = None;
            }
            // A call admitted before the breaker opened. The cooldown stands.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                self.open(&mut inner, now);
            }
            CircuitState::Closed => {
                let window_expired = inner
                    .window_start
                    .is_none_or(|start| now - start > self.settings.window);
                if window_expired {
                    inner.window_start = Some(now);
                    inner.consecutive_failures = 1;
                } else {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                }

                if inner.consecutive_failures >= self.settings.failure_threshold {
                    self.open(&mut inner, now);
                } else {
                    tracing::debug!(
                        provider = %self.provider,
                        failures = inner.consecutive_failures,
                        threshold = self.settings.failure_threshold,
                        "upstream failure recorded"
                    );
                }
            }
            CircuitState::Open => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            }
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: DateTime<Utc>) {
        let reopen_at = now
            .checked_add_signed(self.settings.open_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        inner.state = CircuitState::Open;
        inner.reopen_at = Some(reopen_at);
        inner.trial_in_flight = false;
        tracing::warn!(
            provider = %self.provider,
            failures = inner.consecutive_failures,
            %reopen_at,
            "circuit opened"
        );
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    /// Maintenance path: back to CLOSED with no history.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::default();
        tracing::info!(provider = %self.provider, "circuit breaker reset");
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            window_start: inner.window_start,
            reopen_at: inner.reopen_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(ProviderId::WeatherKit, BreakerSettings::default())
    }

    fn fail(b: &CircuitBreaker, at: DateTime<Utc>) {
        b.try_acquire(at).unwrap().failed(at);
    }

    #[test]
    fn huge_open_duration_saturates_reopen_at() {
        let b = CircuitBreaker::new(
            ProviderId::OpenWeather,
            BreakerSettings {
                failure_threshold: 1,
                open_duration: Duration::MAX,
                ..BreakerSettings::default()
            },
        );
        fail(&b, t0());

        let status = b.status();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.reopen_at, Some(DateTime::<Utc>::MAX_UTC));
        assert!(b.try_acquire(t0() + Duration::days(365)).is_err());
    }

    #[test]
    fn opens_after_threshold_within_window() {
        let b = breaker();
        for i in 0..4 {
            fail(&b, t0() + Duration::seconds(i * 10));
            assert_eq!(b.state(), CircuitState::Closed);
        }
        fail(&b, t0() + Duration::seconds(40));

        let status = b.status();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.consecutive_failures, 5);
        assert_eq!(status.reopen_at, Some(t0() + Duration::seconds(100)));
    }

    #[test]
    fn failures_spread_beyond_window_do_not_open() {
        let b = breaker();
        for i in 0..4 {
            fail(&b, t0() + Duration::seconds(i * 10));
        }
        // Fifth failure lands after the two minute window started at t0.
        fail(&b, t0() + Duration::seconds(121));

        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.status().consecutive_failures, 1);
    }

    #[test]
    fn success_resets_the_streak() {
        let b = breaker();
        for _ in 0..4 {
            fail(&b, t0());
        }
        b.try_acquire(t0()).unwrap().succeeded();
        fail(&b, t0());

        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.status().consecutive_failures, 1);
    }

    #[test]
    fn open_rejects_until_reopen_then_allows_a_single_trial() {
        let b = breaker();
        for _ in 0..5 {
            fail(&b, t0());
        }

        let err = b.try_acquire(t0() + Duration::seconds(59)).unwrap_err();
        assert!(matches!(err, WeatherError::CircuitOpen { .. }));
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);

        let later = t0() + Duration::seconds(60);
        let trial = b.try_acquire(later).unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        // A second caller while the trial is in flight is rejected.
        assert!(b.try_acquire(later).is_err());

        trial.succeeded();
        let status = b.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.reopen_at, None);
    }

    #[test]
    fn failed_trial_reopens_with_new_deadline() {
        let b = breaker();
        for _ in 0..5 {
            fail(&b, t0());
        }

        let later = t0() + Duration::seconds(90);
        b.try_acquire(later).unwrap().failed(later);

        let status = b.status();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.reopen_at, Some(later + Duration::seconds(60)));
    }

    #[test]
    fn dropped_trial_gives_the_slot_back() {
        let b = breaker();
        for _ in 0..5 {
            fail(&b, t0());
        }
        let later = t0() + Duration::seconds(61);

        drop(b.try_acquire(later).unwrap());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.would_admit(later));
        assert!(b.try_acquire(later).unwrap().is_trial());
    }

    #[test]
    fn reset_closes_an_open_breaker() {
        let b = breaker();
        for _ in 0..5 {
            fail(&b, t0());
        }
        b.reset();

        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire(t0()).is_ok());
    }
}
