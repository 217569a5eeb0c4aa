use std::{convert::TryFrom, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, header::RETRY_AFTER};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    CanonicalWeatherResponse, Config, ProviderCapabilities, WeatherError, WeatherRequest,
    provider::{
        open_meteo::OpenMeteoProvider, openweather::OpenWeatherProvider,
        weatherkit::WeatherKitProvider,
    },
};

pub mod open_meteo;
pub mod openweather;
pub mod weatherkit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[serde(rename = "open_meteo")]
    OpenMeteo,
    WeatherKit,
    OpenWeather,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenMeteo => "open_meteo",
            ProviderId::WeatherKit => "weatherkit",
            ProviderId::OpenWeather => "openweather",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenMeteo, ProviderId::WeatherKit, ProviderId::OpenWeather]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = WeatherError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.trim().to_lowercase();

        match lower.as_str() {
            "open_meteo" | "open-meteo" | "openmeteo" => Ok(ProviderId::OpenMeteo),
            "weatherkit" | "apple" => Ok(ProviderId::WeatherKit),
            "openweather" | "openweathermap" => Ok(ProviderId::OpenWeather),
            _ => Err(WeatherError::config(format!(
                "Unknown provider '{value}'. Supported providers: open_meteo, weatherkit, openweather."
            ))),
        }
    }
}

/// One upstream weather service.
///
/// Implementations make exactly one outbound call per `fetch_weather` and
/// never retry; retries, breaking and caching are layered on top by
/// [`crate::resilience::ResilientProvider`].
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn fetch_weather(
        &self,
        request: &WeatherRequest,
    ) -> Result<CanonicalWeatherResponse, WeatherError>;

    /// Checks that the configured credential is usable without calling the upstream.
    fn validate_credential(&self) -> Result<(), WeatherError> {
        Ok(())
    }
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> Result<Arc<dyn WeatherProvider>, WeatherError> {
    let timeout = config.http.read_timeout();

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::OpenMeteo => {
            let mut provider = OpenMeteoProvider::new(timeout)?;
            if let Some(url) = config.providers.open_meteo.as_ref().and_then(|c| c.base_url.clone()) {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        ProviderId::WeatherKit => {
            let section = config.providers.weatherkit.as_ref().ok_or_else(|| {
                WeatherError::config(
                    "No credentials configured for provider 'weatherkit'.\n\
                     Hint: run `concierge-weather configure weatherkit`.",
                )
            })?;
            let mut provider = WeatherKitProvider::new(section.credentials()?, timeout)?;
            if let Some(url) = section.base_url.clone() {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        ProviderId::OpenWeather => {
            let section = config.providers.openweather.as_ref().ok_or_else(|| {
                WeatherError::config(
                    "No API key configured for provider 'openweather'.\n\
                     Hint: run `concierge-weather configure openweather` and enter your API key.",
                )
            })?;
            let mut provider = OpenWeatherProvider::new(section.api_key.clone(), timeout)?;
            if let Some(url) = section.base_url.clone() {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
    };

    provider.validate_credential()?;
    Ok(provider)
}

pub(crate) fn http_client(read_timeout: Duration) -> Result<Client, WeatherError> {
    Client::builder()
        .timeout(read_timeout)
        .connect_timeout(read_timeout)
        .user_agent(concat!("concierge-weather/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| WeatherError::config(format!("failed to build HTTP client: {e}")))
}

/// Maps a transport-level failure. Timeouts look exactly like a 5xx to the
/// layers above.
///
/// The URL is stripped first: some adapters carry the API key in the query.
pub(crate) fn transport_error(provider: ProviderId, err: reqwest::Error) -> WeatherError {
    let err = err.without_url();
    if err.is_timeout() {
        WeatherError::unavailable(provider, "request timed out")
    } else if err.is_connect() {
        WeatherError::unavailable(provider, format!("connection failed: {err}"))
    } else if err.is_builder() {
        WeatherError::bad_request(format!("could not build {provider} request: {err}"))
    } else {
        WeatherError::unavailable(provider, format!("request failed: {err}"))
    }
}

/// Classifies a non-success upstream status.
pub fn classify_status(
    provider: ProviderId,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> WeatherError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => WeatherError::RateLimited {
            provider,
            retry_after_secs,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WeatherError::bad_request(format!(
            "{provider} rejected the credential ({status})"
        )),
        StatusCode::REQUEST_TIMEOUT => WeatherError::unavailable(provider, "upstream request timeout (408)"),
        s if s.is_client_error() => WeatherError::bad_request(format!(
            "{provider} rejected the request with status {s}: {}",
            truncate_body(body)
        )),
        s => WeatherError::unavailable(provider, format!("status {s}: {}", truncate_body(body))),
    }
}

/// Reads the body, classifies the status and decodes a successful payload.
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: ProviderId,
    response: Response,
) -> Result<T, WeatherError> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let body = response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))?;

    if !status.is_success() {
        return Err(classify_status(provider, status, retry_after, &body));
    }

    serde_json::from_str(&body).map_err(|e| {
        WeatherError::unavailable(provider, format!("malformed {provider} payload: {e}"))
    })
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
