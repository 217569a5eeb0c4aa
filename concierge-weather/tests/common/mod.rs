#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use concierge_weather::{
    BreakerSettings, CachePolicy, CanonicalWeatherResponse, CurrentConditions, ManualClock,
    ProviderCapabilities, ProviderId, RateLimitHints, RetryPolicy, WeatherError, WeatherProvider,
    WeatherRequest, WeatherService,
    mapper::{format_temperature, format_wind},
};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Unavailable,
    Reject,
    /// HTTP 429 with the given `Retry-After` seconds.
    RateLimited(Option<u64>),
    /// Any call is a test failure.
    Forbidden,
}

/// Scriptable in-memory provider that counts calls.
#[derive(Debug)]
pub struct StubProvider {
    id: ProviderId,
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
    temperature_c: f64,
}

impl StubProvider {
    pub fn new(id: ProviderId, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id,
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            temperature_c: 22.5,
        })
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherProvider for StubProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            requires_credential: false,
            supports_hourly: false,
            supports_daily: false,
            max_forecast_days: 0,
            rate_limit_hints: RateLimitHints::default(),
        }
    }

    async fn fetch_weather(
        &self,
        request: &WeatherRequest,
    ) -> Result<CanonicalWeatherResponse, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let behavior = *self.behavior.lock();
        match behavior {
            Behavior::Succeed => Ok(payload(
                self.id,
                self.temperature_c,
                request,
            )),
            Behavior::Unavailable => Err(WeatherError::unavailable(self.id, "stubbed outage")),
            Behavior::Reject => Err(WeatherError::bad_request("stubbed rejection")),
            Behavior::RateLimited(retry_after_secs) => Err(WeatherError::RateLimited {
                provider: self.id,
                retry_after_secs,
            }),
            Behavior::Forbidden => panic!("{} was called but must not be", self.id),
        }
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap()
}

pub fn payload(id: ProviderId, celsius: f64, request: &WeatherRequest) -> CanonicalWeatherResponse {
    let units = request.unit_system();
    CanonicalWeatherResponse {
        current: CurrentConditions {
            temperature: format_temperature(celsius, units),
            feels_like: format_temperature(celsius, units),
            humidity_percent: 65,
            wind_speed: format_wind(15.2, Some(180.0), units),
            condition_text: "clear sky".into(),
        },
        hourly: Vec::new(),
        daily: Vec::new(),
        issued_at: t0(),
        provider_name: id.as_str().to_string(),
        is_stale: false,
    }
}

pub struct Harness {
    pub service: WeatherService,
    pub clock: Arc<ManualClock>,
}

/// Service with no retries and default breaker/cache tuning on a manual clock.
pub fn harness(
    primary: Arc<StubProvider>,
    fallback: Option<Arc<StubProvider>>,
) -> Harness {
    harness_with(primary, fallback, CachePolicy::default())
}

pub fn harness_with(
    primary: Arc<StubProvider>,
    fallback: Option<Arc<StubProvider>>,
    cache: CachePolicy,
) -> Harness {
    harness_with_retry(primary, fallback, cache, RetryPolicy::no_retry())
}

/// Two retries with millisecond backoff and no jitter.
pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        factor: 2.0,
        max_delay: Duration::from_millis(5),
        jitter: Duration::ZERO,
    }
}

pub fn harness_with_retry(
    primary: Arc<StubProvider>,
    fallback: Option<Arc<StubProvider>>,
    cache: CachePolicy,
    retry: RetryPolicy,
) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));

    let mut builder = WeatherService::builder(primary)
        .clock(clock.clone())
        .retry(retry)
        .breaker(BreakerSettings::default())
        .cache_policy(cache);
    if let Some(fallback) = fallback {
        builder = builder.fallback(fallback);
    }

    Harness {
        service: builder.build().unwrap(),
        clock,
    }
}

/// Polls until `done` holds or a second has passed.
pub async fn eventually(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}
