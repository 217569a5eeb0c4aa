//! Core library for the `concierge-weather` service.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Provider adapters (Open-Meteo, WeatherKit, OpenWeather) and their mappers
//! - The resilience layer: retries, per-provider circuit breakers, stale-serving cache
//! - The [`WeatherService`] orchestrator with primary/fallback selection
//!
//! It is used by `concierge-weather-cli`, but can also be embedded by any host
//! that needs "current weather for coordinates X in units U".

pub mod clock;
pub mod config;
pub mod error;
pub mod mapper;
pub mod metrics;
pub mod model;
pub mod provider;
pub mod resilience;
pub mod service;
pub mod time_sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ErrorKind, UNAVAILABLE_MESSAGE, WeatherError};
pub use metrics::{MetricsSnapshot, ServiceMetrics};
pub use model::{
    CanonicalWeatherResponse, Coordinates, CurrentConditions, DailyPoint, HourlyPoint,
    ProviderCapabilities, RateLimitHints, UnitSystem, WeatherQuery, WeatherRequest,
};
pub use provider::{ProviderId, WeatherProvider};
pub use resilience::{
    BreakerSettings, BreakerStatus, CachePolicy, CircuitState, ResponseSource, RetryPolicy,
};
pub use service::{HealthReport, Served, WeatherService, WeatherServiceBuilder};

pub use tokio_util::sync::CancellationToken;
