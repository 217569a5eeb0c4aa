use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WeatherError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitSystem {
    type Err = WeatherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "metric" => Ok(UnitSystem::Metric),
            "imperial" => Ok(UnitSystem::Imperial),
            other => Err(WeatherError::bad_request(format!(
                "unknown unit system '{other}', expected 'metric' or 'imperial'"
            ))),
        }
    }
}

/// A validated latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, WeatherError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(WeatherError::bad_request(format!(
                "latitude {latitude} is outside [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(WeatherError::bad_request(format!(
                "longitude {longitude} is outside [-180, 180]"
            )));
        }
        Ok(Self { latitude, longitude })
    }
}

/// One upstream lookup. Only constructible through [`WeatherRequest::new`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherRequest {
    latitude: f64,
    longitude: f64,
    unit_system: UnitSystem,
}

impl WeatherRequest {
    pub fn new(latitude: f64, longitude: f64, unit_system: UnitSystem) -> Result<Self, WeatherError> {
        let coords = Coordinates::new(latitude, longitude)?;
        Ok(Self {
            latitude: coords.latitude,
            longitude: coords.longitude,
            unit_system,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn unit_system(&self) -> UnitSystem {
        self.unit_system
    }
}

/// Per-call input of the service; missing fields fall back to configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeatherQuery {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub unit_system: Option<UnitSystem>,
}

impl WeatherQuery {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            unit_system: None,
        }
    }

    pub fn with_units(mut self, unit_system: UnitSystem) -> Self {
        self.unit_system = Some(unit_system);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature: String,
    pub feels_like: String,
    pub humidity_percent: u8,
    /// e.g. "15 km/h from the S"
    pub wind_speed: String,
    pub condition_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyPoint {
    pub time: DateTime<Utc>,
    pub temperature: String,
    pub condition_text: String,
    pub precipitation_chance: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub high: String,
    pub low: String,
    pub condition_text: String,
    pub precipitation_chance: Option<u8>,
}

/// The single response shape every provider is mapped into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalWeatherResponse {
    pub current: CurrentConditions,
    pub hourly: Vec<HourlyPoint>,
    pub daily: Vec<DailyPoint>,
    pub issued_at: DateTime<Utc>,
    pub provider_name: String,
    pub is_stale: bool,
}

impl CanonicalWeatherResponse {
    pub const MAX_HOURLY: usize = 24;
    pub const MAX_DAILY: usize = 10;

    /// Sentinel rendered by hosts when no provider and no cache could answer.
    pub fn unavailable(issued_at: DateTime<Utc>) -> Self {
        Self {
            current: CurrentConditions {
                temperature: "--".to_string(),
                feels_like: "--".to_string(),
                humidity_percent: 0,
                wind_speed: "--".to_string(),
                condition_text: "weather unavailable".to_string(),
            },
            hourly: Vec::new(),
            daily: Vec::new(),
            issued_at,
            provider_name: "none".to_string(),
            is_stale: true,
        }
    }

    pub fn into_stale(mut self) -> Self {
        self.is_stale = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct RateLimitHints {
    pub requests_per_minute: Option<u32>,
    pub requests_per_day: Option<u32>,
}

/// Static description of what an adapter can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderCapabilities {
    pub requires_credential: bool,
    pub supports_hourly: bool,
    pub supports_daily: bool,
    pub max_forecast_days: u8,
    pub rate_limit_hints: RateLimitHints,
}
