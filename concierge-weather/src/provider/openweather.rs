use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::Client;

use crate::{
    mapper::openweather::{self, OneCallPayload},
    model::{CanonicalWeatherResponse, ProviderCapabilities, RateLimitHints, WeatherRequest},
    provider::{ProviderId, http_client, read_json, transport_error},
    WeatherError,
};

use super::WeatherProvider;

const ONECALL_BASE: &str = "https://api.openweathermap.org";

#[derive(Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    http: Client,
    base_url: String,
}

impl fmt::Debug for OpenWeatherProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenWeatherProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, read_timeout: Duration) -> Result<Self, WeatherError> {
        if api_key.trim().is_empty() {
            return Err(WeatherError::config("openweather api_key is empty"));
        }
        Ok(Self {
            api_key: api_key.trim().to_string(),
            http: http_client(read_timeout)?,
            base_url: ONECALL_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            requires_credential: true,
            supports_hourly: true,
            supports_daily: true,
            max_forecast_days: 8,
            rate_limit_hints: RateLimitHints {
                requests_per_minute: Some(60),
                requests_per_day: Some(1_000),
            },
        }
    }

    async fn fetch_weather(
        &self,
        request: &WeatherRequest,
    ) -> Result<CanonicalWeatherResponse, WeatherError> {
        let url = format!("{}/data/3.0/onecall", self.base_url);

        // Wire units are always metric; conversion happens in the mapper.
        let res = self
            .http
            .get(&url)
            .query(&[
                ("lat", request.latitude().to_string()),
                ("lon", request.longitude().to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
                ("exclude", "minutely,alerts".to_string()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(self.id(), e))?;

        let payload: OneCallPayload = read_json(self.id(), res).await?;

        openweather::map(&payload, request.unit_system(), false)
            .map_err(|e| WeatherError::unavailable(self.id(), e.to_string()))
    }
}
