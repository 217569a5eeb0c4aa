use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    mapper::weatherkit::{self, WeatherKitPayload},
    model::{CanonicalWeatherResponse, ProviderCapabilities, RateLimitHints, WeatherRequest},
    provider::{ProviderId, http_client, read_json, transport_error},
    WeatherError,
};

use super::WeatherProvider;

const WEATHERKIT_BASE: &str = "https://weatherkit.apple.com";
const DATA_SETS: &str = "currentWeather,forecastHourly,forecastDaily";
const LANGUAGE: &str = "en";

pub const TOKEN_AUDIENCE: &str = "weatherkit.apple.com";

/// Upstream rejects tokens valid for longer than this.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 50 * 60;

fn max_token_lifetime() -> chrono::Duration {
    chrono::Duration::seconds(MAX_TOKEN_LIFETIME_SECS)
}

#[derive(Clone)]
pub struct WeatherKitCredentials {
    pub team_id: String,
    pub service_id: String,
    pub key_id: String,
    /// PKCS#8 PEM of the P-256 signing key.
    pub private_key_pem: String,
}

impl fmt::Debug for WeatherKitCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeatherKitCredentials")
            .field("team_id", &self.team_id)
            .field("service_id", &self.service_id)
            .field("key_id", &self.key_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherKitClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints short-lived ES256 assertions for WeatherKit.
pub struct TokenSigner {
    team_id: String,
    service_id: String,
    key_id: String,
    key: EncodingKey,
    lifetime: chrono::Duration,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("team_id", &self.team_id)
            .field("service_id", &self.service_id)
            .field("key_id", &self.key_id)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Parses the key and signs a throwaway token, so a bad key fails here and
    /// not on the first request.
    pub fn new(credentials: &WeatherKitCredentials, lifetime: chrono::Duration) -> Result<Self, WeatherError> {
        for (name, value) in [
            ("team_id", &credentials.team_id),
            ("service_id", &credentials.service_id),
            ("key_id", &credentials.key_id),
        ] {
            if value.trim().is_empty() {
                return Err(WeatherError::config(format!("weatherkit {name} is empty")));
            }
        }

        let key = EncodingKey::from_ec_pem(credentials.private_key_pem.as_bytes()).map_err(|e| {
            WeatherError::config(format!("weatherkit private key is not a valid EC PEM key: {e}"))
        })?;

        let signer = Self {
            team_id: credentials.team_id.trim().to_string(),
            service_id: credentials.service_id.trim().to_string(),
            key_id: credentials.key_id.trim().to_string(),
            key,
            lifetime: lifetime.min(max_token_lifetime()),
        };

        signer.sign(Utc::now())?;
        Ok(signer)
    }

    pub fn claims(&self, now: DateTime<Utc>) -> WeatherKitClaims {
        let iat = now.timestamp();
        WeatherKitClaims {
            iss: self.team_id.clone(),
            sub: self.service_id.clone(),
            aud: TOKEN_AUDIENCE.to_string(),
            iat,
            exp: iat + self.lifetime.num_seconds(),
        }
    }

    pub fn sign(&self, now: DateTime<Utc>) -> Result<String, WeatherError> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        encode(&header, &self.claims(now), &self.key)
            .map_err(|e| WeatherError::config(format!("failed to sign weatherkit token: {e}")))
    }
}

/// WeatherKit REST adapter authenticated with a per-request signed token.
#[derive(Debug)]
pub struct WeatherKitProvider {
    signer: TokenSigner,
    http: Client,
    base_url: String,
}

impl WeatherKitProvider {
    pub fn new(credentials: WeatherKitCredentials, read_timeout: Duration) -> Result<Self, WeatherError> {
        Ok(Self {
            signer: TokenSigner::new(&credentials, max_token_lifetime())?,
            http: http_client(read_timeout)?,
            base_url: WEATHERKIT_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl WeatherProvider for WeatherKitProvider {
    fn id(&self) -> ProviderId {
        ProviderId::WeatherKit
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            requires_credential: true,
            supports_hourly: true,
            supports_daily: true,
            max_forecast_days: 10,
            rate_limit_hints: RateLimitHints {
                requests_per_minute: None,
                requests_per_day: None,
            },
        }
    }

    async fn fetch_weather(
        &self,
        request: &WeatherRequest,
    ) -> Result<CanonicalWeatherResponse, WeatherError> {
        let token = self.signer.sign(Utc::now())?;
        let url = format!(
            "{}/api/v1/weather/{LANGUAGE}/{}/{}",
            self.base_url,
            request.latitude(),
            request.longitude()
        );

        let res = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("dataSets", DATA_SETS), ("timezone", "UTC")])
            .send()
            .await
            .map_err(|e| transport_error(self.id(), e))?;

        let payload: WeatherKitPayload = read_json(self.id(), res).await?;

        weatherkit::map(&payload, request.unit_system(), false)
            .map_err(|e| WeatherError::unavailable(self.id(), e.to_string()))
    }

    fn validate_credential(&self) -> Result<(), WeatherError> {
        self.signer.sign(Utc::now()).map(|_| ())
    }
}
