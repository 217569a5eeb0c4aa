//! Public entry point: primary provider, optional fallback, shared cache.

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    clock::{Clock, SystemClock},
    config::{Config, HttpConfig},
    error::{ErrorKind, WeatherError},
    metrics::{MetricsSnapshot, ServiceMetrics},
    model::{CanonicalWeatherResponse, Coordinates, UnitSystem, WeatherQuery, WeatherRequest},
    provider::{ProviderId, WeatherProvider, http_client, provider_from_config},
    resilience::{
        BreakerSettings, BreakerStatus, CachePolicy, CircuitState, ResilientProvider,
        ResponseSource, RetryPolicy, WeatherCache,
    },
    time_sync::{self, DriftReport, TIME_REFERENCE_URL},
};

/// A successful call, with enough detail for health reporting.
#[derive(Debug, Clone)]
pub struct Served {
    pub response: CanonicalWeatherResponse,
    pub provider: ProviderId,
    pub source: ResponseSource,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: ProviderId,
    pub role: &'static str,
    pub breaker: BreakerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub provider_used: Option<String>,
    pub is_stale: Option<bool>,
    pub source: Option<ResponseSource>,
    pub response_time_ms: f64,
    /// Failure class only; upstream error text stays in the logs.
    pub error: Option<ErrorKind>,
    pub providers: Vec<ProviderHealth>,
    pub cache_entries: usize,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug)]
pub struct WeatherService {
    primary: ResilientProvider,
    fallback: Option<ResilientProvider>,
    cache: Arc<WeatherCache>,
    metrics: Arc<ServiceMetrics>,
    clock: Arc<dyn Clock>,
    default_location: Coordinates,
    default_units: UnitSystem,
    drift_check: Option<DriftCheck>,
}

#[derive(Debug)]
struct DriftCheck {
    http: reqwest::Client,
    url: String,
}

impl WeatherService {
    pub fn builder(primary: Arc<dyn WeatherProvider>) -> WeatherServiceBuilder {
        WeatherServiceBuilder::new(primary)
    }

    /// Validates `config`, builds every configured provider, and wires the
    /// resilience layers. Bad credentials fail here, not on the first call.
    pub fn from_config(config: &Config) -> Result<Self, WeatherError> {
        config.validate()?;

        if config.fallback_shadows_primary() {
            tracing::debug!(
                provider = %config.service.provider,
                "fallback provider is the same as the primary, running without one"
            );
        }

        let primary = provider_from_config(config.primary_provider_id()?, config)?;
        let fallback = config
            .fallback_provider_id()?
            .map(|id| provider_from_config(id, config))
            .transpose()?;

        let uses_signed_tokens = std::iter::once(&primary)
            .chain(fallback.as_ref())
            .any(|p| p.id() == ProviderId::WeatherKit);

        let mut builder = WeatherServiceBuilder::new(primary)
            .read_timeout(config.http.read_timeout())
            .retry(config.retry.policy())
            .breaker(config.circuit_breaker.settings())
            .cache_policy(config.cache.policy())
            .default_location(config.default_coordinates()?)
            .default_units(config.service.units);

        if let Some(fallback) = fallback {
            builder = builder.fallback(fallback);
        }
        if uses_signed_tokens {
            builder = builder.time_reference_url(TIME_REFERENCE_URL);
        }

        builder.build()
    }

    /// One-time startup work. Currently only the clock drift check, which
    /// runs only when a signed-token provider is configured.
    pub async fn startup(&self) -> Option<DriftReport> {
        let check = self.drift_check.as_ref()?;
        time_sync::check_clock_drift(&check.http, &check.url, self.clock.as_ref()).await
    }

    pub fn primary_provider(&self) -> ProviderId {
        self.primary.id()
    }

    pub fn fallback_provider(&self) -> Option<ProviderId> {
        self.fallback.as_ref().map(ResilientProvider::id)
    }

    pub async fn get_current_weather(
        &self,
        query: WeatherQuery,
    ) -> Result<CanonicalWeatherResponse, WeatherError> {
        self.get_current_weather_with_cancel(query, &CancellationToken::new())
            .await
    }

    /// Like [`WeatherService::get_current_weather`]. Cancelling `cancel`
    /// stops any further retries and skips the fallback.
    pub async fn get_current_weather_with_cancel(
        &self,
        query: WeatherQuery,
        cancel: &CancellationToken,
    ) -> Result<CanonicalWeatherResponse, WeatherError> {
        self.serve(query, cancel).await.map(|served| served.response)
    }

    /// Full call path, returning where the payload came from.
    #[instrument(skip(self, cancel), fields(primary = %self.primary.id()))]
    pub async fn serve(
        &self,
        query: WeatherQuery,
        cancel: &CancellationToken,
    ) -> Result<Served, WeatherError> {
        self.metrics.record_request();
        let started = Instant::now();

        let result = match self.resolve(query) {
            Ok(request) => self.fetch_with_fallback(&request, cancel).await,
            Err(error) => Err(error),
        };

        self.metrics.record_latency(started.elapsed());

        match &result {
            Ok(served) => tracing::debug!(
                provider = %served.provider,
                source = ?served.source,
                fallback_used = served.fallback_used,
                is_stale = served.response.is_stale,
                "weather served"
            ),
            Err(error) => {
                self.metrics.record_error();
                match error.kind() {
                    ErrorKind::BadRequest | ErrorKind::Cancelled => {
                        tracing::warn!(%error, "weather request rejected")
                    }
                    _ => tracing::error!(%error, "weather unavailable from every source"),
                }
            }
        }

        result
    }

    fn resolve(&self, query: WeatherQuery) -> Result<WeatherRequest, WeatherError> {
        WeatherRequest::new(
            query.latitude.unwrap_or(self.default_location.latitude),
            query.longitude.unwrap_or(self.default_location.longitude),
            query.unit_system.unwrap_or(self.default_units),
        )
    }

    async fn fetch_with_fallback(
        &self,
        request: &WeatherRequest,
        cancel: &CancellationToken,
    ) -> Result<Served, WeatherError> {
        let primary_error = match self.primary.fetch(request, cancel).await {
            Ok(fetched) => {
                return Ok(Served {
                    response: fetched.response,
                    provider: self.primary.id(),
                    source: fetched.source,
                    fallback_used: false,
                });
            }
            Err(WeatherError::Cancelled) => return Err(WeatherError::Cancelled),
            Err(error) => error,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_error);
        };

        tracing::info!(
            primary = %self.primary.id(),
            fallback = %fallback.id(),
            error = %primary_error,
            "primary provider failed, trying fallback"
        );

        match fallback.fetch(request, cancel).await {
            Ok(fetched) => {
                self.metrics.record_fallback_used();
                Ok(Served {
                    response: fetched.response,
                    provider: fallback.id(),
                    source: fetched.source,
                    fallback_used: true,
                })
            }
            Err(fallback_error) => {
                tracing::warn!(
                    fallback = %fallback.id(),
                    error = %fallback_error,
                    "fallback provider failed as well"
                );
                Err(primary_error)
            }
        }
    }

    /// Performs one live call and folds the outcome together with breaker
    /// state into a single verdict.
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let outcome = self
            .serve(WeatherQuery::default(), &CancellationToken::new())
            .await;
        let response_time_ms = started.elapsed().as_micros() as f64 / 1000.0;

        let providers = self.provider_health();
        let primary_open = providers
            .first()
            .is_some_and(|p| p.breaker.state == CircuitState::Open);

        let (provider_used, is_stale, source, error) = match &outcome {
            Ok(served) => (
                Some(served.response.provider_name.clone()),
                Some(served.response.is_stale),
                Some(served.source),
                None,
            ),
            Err(error) => (None, None, None, Some(error.kind())),
        };

        let healthy = outcome
            .as_ref()
            .is_ok_and(|served| !served.response.is_stale)
            && !primary_open;

        HealthReport {
            healthy,
            checked_at: self.clock.now(),
            provider_used,
            is_stale,
            source,
            response_time_ms,
            error,
            providers,
            cache_entries: self.cache.len(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Breaker status per provider, primary first.
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        std::iter::once((&self.primary, "primary"))
            .chain(self.fallback.iter().map(|f| (f, "fallback")))
            .map(|(p, role)| ProviderHealth {
                provider: p.id(),
                role,
                breaker: p.breaker_status(),
            })
            .collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        let removed = self.cache.clear();
        tracing::info!(removed, "weather cache cleared");
    }

    pub fn reset_circuit_breakers(&self) {
        self.primary.reset_breaker();
        if let Some(fallback) = &self.fallback {
            fallback.reset_breaker();
        }
    }

    /// Background revalidations running across both providers.
    pub fn revalidations_in_flight(&self) -> usize {
        self.primary.revalidations_in_flight()
            + self
                .fallback
                .as_ref()
                .map_or(0, ResilientProvider::revalidations_in_flight)
    }
}

/// Assembles a [`WeatherService`] from already-constructed providers.
#[derive(Debug)]
pub struct WeatherServiceBuilder {
    primary: Arc<dyn WeatherProvider>,
    fallback: Option<Arc<dyn WeatherProvider>>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    breaker: BreakerSettings,
    cache_policy: CachePolicy,
    default_location: Option<Coordinates>,
    default_units: UnitSystem,
    read_timeout: std::time::Duration,
    time_reference_url: Option<String>,
}

impl WeatherServiceBuilder {
    pub fn new(primary: Arc<dyn WeatherProvider>) -> Self {
        Self {
            primary,
            fallback: None,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            breaker: BreakerSettings::default(),
            cache_policy: CachePolicy::default(),
            default_location: None,
            default_units: UnitSystem::Metric,
            read_timeout: HttpConfig::default().read_timeout(),
            time_reference_url: None,
        }
    }

    pub fn fallback(mut self, provider: Arc<dyn WeatherProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn breaker(mut self, settings: BreakerSettings) -> Self {
        self.breaker = settings;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn default_location(mut self, coordinates: Coordinates) -> Self {
        self.default_location = Some(coordinates);
        self
    }

    pub fn default_units(mut self, units: UnitSystem) -> Self {
        self.default_units = units;
        self
    }

    /// Timeout for the service's own HTTP calls (the drift check).
    pub fn read_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Enables the startup drift check against `url`.
    pub fn time_reference_url(mut self, url: impl Into<String>) -> Self {
        self.time_reference_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<WeatherService, WeatherError> {
        let default_location = match self.default_location {
            Some(coords) => coords,
            None => Coordinates::new(crate::config::DEFAULT_LATITUDE, crate::config::DEFAULT_LONGITUDE)?,
        };

        let fallback = match self.fallback {
            Some(fallback) if fallback.id() == self.primary.id() => {
                tracing::warn!(provider = %fallback.id(), "fallback provider is the same as the primary, ignoring it");
                None
            }
            other => other,
        };

        let cache = Arc::new(WeatherCache::new(self.cache_policy));
        let metrics = Arc::new(ServiceMetrics::new());

        let wrap = |provider: Arc<dyn WeatherProvider>| {
            ResilientProvider::new(
                provider,
                self.breaker,
                self.retry.clone(),
                Arc::clone(&cache),
                Arc::clone(&self.clock),
                Arc::clone(&metrics),
            )
        };

        let primary = wrap(self.primary);
        let fallback = fallback.map(wrap);

        let drift_check = match self.time_reference_url {
            Some(url) => Some(DriftCheck {
                http: http_client(self.read_timeout)?,
                url,
            }),
            None => None,
        };

        tracing::info!(
            primary = %primary.id(),
            fallback = ?fallback.as_ref().map(ResilientProvider::id),
            "weather service ready"
        );

        Ok(WeatherService {
            primary,
            fallback,
            cache,
            metrics,
            clock: self.clock,
            default_location,
            default_units: self.default_units,
            drift_check,
        })
    }
}
