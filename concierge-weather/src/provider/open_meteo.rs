use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::{
    mapper::open_meteo::{self, OpenMeteoPayload},
    model::{CanonicalWeatherResponse, ProviderCapabilities, RateLimitHints, WeatherRequest},
    provider::{ProviderId, http_client, read_json, transport_error},
    WeatherError,
};

use super::WeatherProvider;

const OPEN_METEO_BASE: &str = "https://api.open-meteo.com";

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,weather_code,wind_speed_10m,wind_direction_10m";
const HOURLY_FIELDS: &str = "temperature_2m,weather_code,precipitation_probability";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,precipitation_probability_max";

/// Forecast window requested on the wire.
const FORECAST_DAYS: u8 = 3;

/// Keyless Open-Meteo adapter; the default fallback.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    http: Client,
    base_url: String,
}

impl OpenMeteoProvider {
    pub fn new(read_timeout: Duration) -> Result<Self, WeatherError> {
        Ok(Self {
            http: http_client(read_timeout)?,
            base_url: OPEN_METEO_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenMeteo
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            requires_credential: false,
            supports_hourly: true,
            supports_daily: true,
            max_forecast_days: 16,
            rate_limit_hints: RateLimitHints {
                requests_per_minute: Some(600),
                requests_per_day: Some(10_000),
            },
        }
    }

    async fn fetch_weather(
        &self,
        request: &WeatherRequest,
    ) -> Result<CanonicalWeatherResponse, WeatherError> {
        let url = format!("{}/v1/forecast", self.base_url);

        let res = self
            .http
            .get(&url)
            .query(&[
                ("latitude", request.latitude().to_string()),
                ("longitude", request.longitude().to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("hourly", HOURLY_FIELDS.to_string()),
                ("daily", DAILY_FIELDS.to_string()),
                ("temperature_unit", "celsius".to_string()),
                ("wind_speed_unit", "kmh".to_string()),
                ("forecast_days", FORECAST_DAYS.to_string()),
                ("timezone", "GMT".to_string()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(self.id(), e))?;

        let payload: OpenMeteoPayload = read_json(self.id(), res).await?;

        open_meteo::map(&payload, request.unit_system(), false)
            .map_err(|e| WeatherError::unavailable(self.id(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::UnitSystem;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body() -> serde_json::Value {
        json!({
            "current": {
                "time": "2025-06-01T14:00",
                "temperature_2m": 22.5,
                "relative_humidity_2m": 65,
                "apparent_temperature": 23.0,
                "weather_code": 1,
                "wind_speed_10m": 15.2,
                "wind_direction_10m": 180
            }
        })
    }

    #[tokio::test]
    async fn fetches_with_celsius_and_kmh_on_the_wire() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("temperature_unit", "celsius"))
            .and(query_param("wind_speed_unit", "kmh"))
            .and(query_param("forecast_days", "3"))
            .and(query_param("latitude", "32.2949"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenMeteoProvider::new(Duration::from_secs(3))
            .unwrap()
            .with_base_url(server.uri());
        let request = WeatherRequest::new(32.2949, -64.7814, UnitSystem::Imperial).unwrap();

        let resp = provider.fetch_weather(&request).await.unwrap();
        assert_eq!(resp.current.temperature, "73°F");
        assert_eq!(resp.current.condition_text, "mainly clear");
        assert!(resp.hourly.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_upstream_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let provider = OpenMeteoProvider::new(Duration::from_secs(3))
            .unwrap()
            .with_base_url(server.uri());
        let request = WeatherRequest::new(0.0, 0.0, UnitSystem::Metric).unwrap();

        let err = provider.fetch_weather(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(body())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let provider = OpenMeteoProvider::new(Duration::from_millis(50))
            .unwrap()
            .with_base_url(server.uri());
        let request = WeatherRequest::new(0.0, 0.0, UnitSystem::Metric).unwrap();

        let err = provider.fetch_weather(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn malformed_json_is_upstream_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let provider = OpenMeteoProvider::new(Duration::from_secs(3))
            .unwrap()
            .with_base_url(server.uri());
        let request = WeatherRequest::new(0.0, 0.0, UnitSystem::Metric).unwrap();

        let err = provider.fetch_weather(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }
}
