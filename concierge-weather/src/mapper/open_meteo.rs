//! Open-Meteo `/v1/forecast` payload (Celsius, km/h, GMT timestamps).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use super::{
    MappingError, UNKNOWN_CONDITION, cap_daily, clamp_percent, format_temperature, format_wind,
    window_hourly,
};
use crate::model::{CanonicalWeatherResponse, CurrentConditions, DailyPoint, HourlyPoint, UnitSystem};

pub const PROVIDER_NAME: &str = "open_meteo";

#[derive(Debug, Clone, Deserialize)]
pub struct OpenMeteoPayload {
    pub current: OmCurrent,
    #[serde(default)]
    pub hourly: Option<OmHourly>,
    #[serde(default)]
    pub daily: Option<OmDaily>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OmCurrent {
    pub time: String,
    pub temperature_2m: f64,
    pub relative_humidity_2m: f64,
    pub apparent_temperature: f64,
    pub weather_code: i32,
    pub wind_speed_10m: f64,
    #[serde(default)]
    pub wind_direction_10m: Option<f64>,
}

/// Column-oriented: index `i` of every vector describes the same hour.
#[derive(Debug, Clone, Deserialize)]
pub struct OmHourly {
    pub time: Vec<String>,
    pub temperature_2m: Vec<Option<f64>>,
    pub weather_code: Vec<Option<i32>>,
    #[serde(default)]
    pub precipitation_probability: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OmDaily {
    pub time: Vec<String>,
    pub weather_code: Vec<Option<i32>>,
    pub temperature_2m_max: Vec<Option<f64>>,
    pub temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_probability_max: Vec<Option<f64>>,
}

/// WMO weather interpretation codes.
pub fn condition_text(code: i32) -> &'static str {
    match code {
        0 => "clear sky",
        1 => "mainly clear",
        2 => "partly cloudy",
        3 => "overcast",
        45 => "fog",
        48 => "depositing rime fog",
        51 => "light drizzle",
        53 => "moderate drizzle",
        55 => "dense drizzle",
        56 | 57 => "freezing drizzle",
        61 => "slight rain",
        63 => "moderate rain",
        65 => "heavy rain",
        66 | 67 => "freezing rain",
        71 => "slight snow",
        73 => "moderate snow",
        75 => "heavy snow",
        77 => "snow grains",
        80 => "slight rain showers",
        81 => "moderate rain showers",
        82 => "violent rain showers",
        85 | 86 => "snow showers",
        95 => "thunderstorm",
        96 | 99 => "thunderstorm with hail",
        _ => UNKNOWN_CONDITION,
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, MappingError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .map(|t| t.and_utc())
        .map_err(|e| MappingError(format!("bad open-meteo timestamp '{raw}': {e}")))
}

fn column<T: Copy>(values: &[Option<T>], i: usize) -> Option<T> {
    values.get(i).copied().flatten()
}

pub fn map(
    payload: &OpenMeteoPayload,
    units: UnitSystem,
    is_stale: bool,
) -> Result<CanonicalWeatherResponse, MappingError> {
    let current = &payload.current;
    let issued_at = parse_time(&current.time)?;

    let hourly = payload
        .hourly
        .as_ref()
        .map(|h| map_hourly(h, units))
        .unwrap_or_default();
    let daily = payload
        .daily
        .as_ref()
        .map(|d| map_daily(d, units))
        .unwrap_or_default();

    Ok(CanonicalWeatherResponse {
        current: CurrentConditions {
            temperature: format_temperature(current.temperature_2m, units),
            feels_like: format_temperature(current.apparent_temperature, units),
            humidity_percent: clamp_percent(current.relative_humidity_2m),
            wind_speed: format_wind(current.wind_speed_10m, current.wind_direction_10m, units),
            condition_text: condition_text(current.weather_code).to_string(),
        },
        hourly: window_hourly(hourly, issued_at),
        daily: cap_daily(daily),
        issued_at,
        provider_name: PROVIDER_NAME.to_string(),
        is_stale,
    })
}

// Rows with a missing timestamp or temperature are skipped rather than
// failing the whole response.
fn map_hourly(hourly: &OmHourly, units: UnitSystem) -> Vec<HourlyPoint> {
    hourly
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| {
            let time = parse_time(raw).ok()?;
            let temp = column(&hourly.temperature_2m, i)?;
            Some(HourlyPoint {
                time,
                temperature: format_temperature(temp, units),
                condition_text: column(&hourly.weather_code, i)
                    .map_or(UNKNOWN_CONDITION, condition_text)
                    .to_string(),
                precipitation_chance: column(&hourly.precipitation_probability, i).map(clamp_percent),
            })
        })
        .collect()
}

fn map_daily(daily: &OmDaily, units: UnitSystem) -> Vec<DailyPoint> {
    daily
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
            let high = column(&daily.temperature_2m_max, i)?;
            let low = column(&daily.temperature_2m_min, i)?;
            Some(DailyPoint {
                date,
                high: format_temperature(high, units),
                low: format_temperature(low, units),
                condition_text: column(&daily.weather_code, i)
                    .map_or(UNKNOWN_CONDITION, condition_text)
                    .to_string(),
                precipitation_chance: column(&daily.precipitation_probability_max, i)
                    .map(clamp_percent),
            })
        })
        .collect()
}
