//! Wraps one provider with a circuit breaker, retries, and the shared cache.

pub mod cache;
pub mod circuit_breaker;
pub mod retry;

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    error::WeatherError,
    metrics::ServiceMetrics,
    model::{CanonicalWeatherResponse, ProviderCapabilities, WeatherRequest},
    provider::{ProviderId, WeatherProvider},
};

pub use cache::{CacheKey, CacheLookup, CachePolicy, WeatherCache};
pub use circuit_breaker::{BreakerSettings, BreakerStatus, CircuitBreaker, CircuitState};
pub use retry::{RetryPolicy, should_retry, with_retry};

/// Where a returned payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Fetched from the upstream during this call.
    Live,
    /// Fresh cache entry.
    Cache,
    /// Past its TTL, or served because the live fetch failed.
    StaleCache,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub response: CanonicalWeatherResponse,
    pub source: ResponseSource,
}

#[derive(Debug)]
struct Inner {
    provider: Arc<dyn WeatherProvider>,
    breaker: CircuitBreaker,
    cache: Arc<WeatherCache>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    metrics: Arc<ServiceMetrics>,
    revalidating: Mutex<HashSet<CacheKey>>,
}

/// One provider plus its own breaker, sharing the cache and metrics with its peers.
#[derive(Debug, Clone)]
pub struct ResilientProvider {
    inner: Arc<Inner>,
}

impl ResilientProvider {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        breaker: BreakerSettings,
        retry: RetryPolicy,
        cache: Arc<WeatherCache>,
        clock: Arc<dyn Clock>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        let id = provider.id();
        Self {
            inner: Arc::new(Inner {
                provider,
                breaker: CircuitBreaker::new(id, breaker),
                cache,
                retry,
                clock,
                metrics,
                revalidating: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn id(&self) -> ProviderId {
        self.inner.provider.id()
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        self.inner.provider.capabilities()
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.inner.breaker.status()
    }

    pub fn reset_breaker(&self) {
        self.inner.breaker.reset();
    }

    /// Background revalidations currently running for this provider.
    pub fn revalidations_in_flight(&self) -> usize {
        self.inner.revalidating.lock().len()
    }

    /// Serves from cache when possible, otherwise goes to the upstream.
    ///
    /// A failed live fetch falls back to any cached entry for the key, however
    /// old, flagged stale. Only when nothing is cached does the error surface.
    pub async fn fetch(
        &self,
        request: &WeatherRequest,
        cancel: &CancellationToken,
    ) -> Result<Fetched, WeatherError> {
        let key = CacheKey::for_request(request);
        let now = self.inner.clock.now();

        let fallback = match self.inner.cache.lookup(&key, now) {
            CacheLookup::Fresh(response) => {
                tracing::debug!(%key, provider = %self.id(), "cache hit");
                self.inner.metrics.record_cache_hit();
                return Ok(Fetched {
                    response,
                    source: ResponseSource::Cache,
                });
            }
            CacheLookup::Stale(response) => {
                tracing::debug!(%key, provider = %self.id(), "serving stale entry");
                self.inner.metrics.record_stale_served();
                if self.inner.cache.policy().background_revalidate {
                    self.spawn_revalidation(*request, key);
                }
                return Ok(Fetched {
                    response,
                    source: ResponseSource::StaleCache,
                });
            }
            CacheLookup::Expired(response) => Some(response),
            CacheLookup::Miss => None,
        };

        match self.inner.fetch_live(request, key, cancel).await {
            Ok(response) => Ok(Fetched {
                response,
                source: ResponseSource::Live,
            }),
            Err(WeatherError::Cancelled) => Err(WeatherError::Cancelled),
            Err(error) => match fallback {
                Some(response) => {
                    tracing::warn!(
                        %key,
                        provider = %self.id(),
                        %error,
                        "live fetch failed, serving expired cache entry"
                    );
                    self.inner.metrics.record_stale_served();
                    Ok(Fetched {
                        response,
                        source: ResponseSource::StaleCache,
                    })
                }
                None => Err(error),
            },
        }
    }

    fn spawn_revalidation(&self, request: WeatherRequest, key: CacheKey) {
        if !self.inner.breaker.would_admit(self.inner.clock.now()) {
            tracing::debug!(%key, provider = %self.id(), "breaker closed to revalidation");
            return;
        }
        if !self.inner.revalidating.lock().insert(key) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let token = CancellationToken::new();
            match inner.fetch_live(&request, key, &token).await {
                Ok(_) => tracing::debug!(%key, provider = %inner.provider.id(), "revalidated"),
                Err(error) => {
                    tracing::debug!(%key, provider = %inner.provider.id(), %error, "revalidation failed")
                }
            }
            inner.revalidating.lock().remove(&key);
        });
    }
}

impl Inner {
    async fn fetch_live(
        &self,
        request: &WeatherRequest,
        key: CacheKey,
        cancel: &CancellationToken,
    ) -> Result<CanonicalWeatherResponse, WeatherError> {
        let response = with_retry(&self.retry, cancel, |_| self.attempt(request)).await?;
        self.cache.store(key, response.clone(), self.clock.now());
        Ok(response)
    }

    /// Exactly one upstream call, gated and accounted for by the breaker.
    async fn attempt(
        &self,
        request: &WeatherRequest,
    ) -> Result<CanonicalWeatherResponse, WeatherError> {
        let id = self.provider.id();
        let permit = self.breaker.try_acquire(self.clock.now())?;
        self.metrics.record_attempt(id);

        match self.provider.fetch_weather(request).await {
            Ok(response) => {
                permit.succeeded();
                Ok(response)
            }
            Err(error) => {
                self.metrics.record_provider_error(id);
                if error.counts_toward_breaker() {
                    permit.failed(self.clock.now());
                } else {
                    permit.release();
                }
                Err(error)
            }
        }
    }
}
