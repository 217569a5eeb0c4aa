//! WeatherKit REST payload. Temperatures in Celsius, wind in km/h,
//! humidity and precipitation chance as 0..=1 fractions.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{
    MappingError, UNKNOWN_CONDITION, cap_daily, format_temperature, format_wind,
    fraction_to_percent, window_hourly,
};
use crate::model::{CanonicalWeatherResponse, CurrentConditions, DailyPoint, HourlyPoint, UnitSystem};

pub const PROVIDER_NAME: &str = "weatherkit";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherKitPayload {
    #[serde(default)]
    pub current_weather: Option<WkCurrent>,
    #[serde(default)]
    pub forecast_hourly: Option<WkHourly>,
    #[serde(default)]
    pub forecast_daily: Option<WkDaily>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WkCurrent {
    pub as_of: DateTime<Utc>,
    pub temperature: f64,
    pub temperature_apparent: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    #[serde(default)]
    pub wind_direction: Option<f64>,
    pub condition_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WkHourly {
    pub hours: Vec<WkHour>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WkHour {
    pub forecast_start: DateTime<Utc>,
    pub temperature: f64,
    pub condition_code: String,
    #[serde(default)]
    pub precipitation_chance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WkDaily {
    pub days: Vec<WkDay>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WkDay {
    pub forecast_start: DateTime<Utc>,
    pub temperature_max: f64,
    pub temperature_min: f64,
    pub condition_code: String,
    #[serde(default)]
    pub precipitation_chance: Option<f64>,
}

pub fn condition_text(code: &str) -> &'static str {
    match code {
        "Clear" => "clear",
        "MostlyClear" => "mostly clear",
        "PartlyCloudy" => "partly cloudy",
        "MostlyCloudy" => "mostly cloudy",
        "Cloudy" => "cloudy",
        "Foggy" => "fog",
        "Haze" => "haze",
        "Smoky" => "smoke",
        "Dust" => "blowing dust",
        "Breezy" => "breezy",
        "Windy" => "windy",
        "Drizzle" => "drizzle",
        "Rain" => "rain",
        "HeavyRain" => "heavy rain",
        "SunShowers" => "sun showers",
        "IsolatedThunderstorms" => "isolated thunderstorms",
        "ScatteredThunderstorms" => "scattered thunderstorms",
        "Thunderstorms" => "thunderstorms",
        "StrongStorms" => "strong storms",
        "TropicalStorm" => "tropical storm",
        "Hurricane" => "hurricane",
        "Flurries" => "snow flurries",
        "Snow" => "snow",
        "HeavySnow" => "heavy snow",
        "Blizzard" => "blizzard",
        "Sleet" => "sleet",
        "FreezingDrizzle" => "freezing drizzle",
        "FreezingRain" => "freezing rain",
        "Hail" => "hail",
        "Hot" => "hot",
        "Frigid" => "frigid",
        _ => UNKNOWN_CONDITION,
    }
}

pub fn map(
    payload: &WeatherKitPayload,
    units: UnitSystem,
    is_stale: bool,
) -> Result<CanonicalWeatherResponse, MappingError> {
    let current = payload
        .current_weather
        .as_ref()
        .ok_or_else(|| MappingError("weatherkit response has no currentWeather block".into()))?;

    let hourly = payload
        .forecast_hourly
        .as_ref()
        .map(|h| {
            h.hours
                .iter()
                .map(|hour| HourlyPoint {
                    time: hour.forecast_start,
                    temperature: format_temperature(hour.temperature, units),
                    condition_text: condition_text(&hour.condition_code).to_string(),
                    precipitation_chance: hour.precipitation_chance.map(fraction_to_percent),
                })
                .collect()
        })
        .unwrap_or_default();

    let daily = payload
        .forecast_daily
        .as_ref()
        .map(|d| {
            d.days
                .iter()
                .map(|day| DailyPoint {
                    date: day.forecast_start.date_naive(),
                    high: format_temperature(day.temperature_max, units),
                    low: format_temperature(day.temperature_min, units),
                    condition_text: condition_text(&day.condition_code).to_string(),
                    precipitation_chance: day.precipitation_chance.map(fraction_to_percent),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(CanonicalWeatherResponse {
        current: CurrentConditions {
            temperature: format_temperature(current.temperature, units),
            feels_like: format_temperature(current.temperature_apparent, units),
            humidity_percent: fraction_to_percent(current.humidity),
            wind_speed: format_wind(current.wind_speed, current.wind_direction, units),
            condition_text: condition_text(&current.condition_code).to_string(),
        },
        hourly: window_hourly(hourly, current.as_of),
        daily: cap_daily(daily),
        issued_at: current.as_of,
        provider_name: PROVIDER_NAME.to_string(),
        is_stale,
    })
}
