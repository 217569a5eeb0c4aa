//! OpenWeather One Call payload requested with `units=metric`
//! (Celsius, wind in m/s, unix timestamps).

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{
    MappingError, UNKNOWN_CONDITION, cap_daily, clamp_percent, format_temperature, format_wind,
    fraction_to_percent, mps_to_kmh, window_hourly,
};
use crate::model::{CanonicalWeatherResponse, CurrentConditions, DailyPoint, HourlyPoint, UnitSystem};

pub const PROVIDER_NAME: &str = "openweather";

#[derive(Debug, Clone, Deserialize)]
pub struct OneCallPayload {
    pub current: OwCurrent,
    #[serde(default)]
    pub hourly: Vec<OwHour>,
    #[serde(default)]
    pub daily: Vec<OwDay>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwCondition {
    pub id: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwCurrent {
    pub dt: i64,
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    #[serde(default)]
    pub wind_deg: Option<f64>,
    #[serde(default)]
    pub weather: Vec<OwCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwHour {
    pub dt: i64,
    pub temp: f64,
    #[serde(default)]
    pub weather: Vec<OwCondition>,
    #[serde(default)]
    pub pop: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwDayTemp {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwDay {
    pub dt: i64,
    pub temp: OwDayTemp,
    #[serde(default)]
    pub weather: Vec<OwCondition>,
    #[serde(default)]
    pub pop: Option<f64>,
}

/// OpenWeather condition ids, see the "Weather condition codes" table.
pub fn condition_text(id: i32) -> &'static str {
    match id {
        200..=202 | 230..=232 => "thunderstorm with rain",
        210..=221 => "thunderstorm",
        300..=321 => "drizzle",
        500 => "light rain",
        501 => "moderate rain",
        502..=504 => "heavy rain",
        511 => "freezing rain",
        520..=531 => "rain showers",
        600 => "light snow",
        601 => "snow",
        602 => "heavy snow",
        611..=616 => "sleet",
        620..=622 => "snow showers",
        701 => "mist",
        711 => "smoke",
        721 => "haze",
        731 | 761 => "dust",
        741 => "fog",
        751 => "sand",
        762 => "volcanic ash",
        771 => "squalls",
        781 => "tornado",
        800 => "clear sky",
        801 => "few clouds",
        802 => "scattered clouds",
        803 => "broken clouds",
        804 => "overcast clouds",
        _ => UNKNOWN_CONDITION,
    }
}

fn first_condition(conditions: &[OwCondition]) -> &'static str {
    conditions
        .first()
        .map_or(UNKNOWN_CONDITION, |c| condition_text(c.id))
}

fn unix_to_utc(ts: i64) -> Result<DateTime<Utc>, MappingError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| MappingError(format!("openweather timestamp {ts} out of range")))
}

pub fn map(
    payload: &OneCallPayload,
    units: UnitSystem,
    is_stale: bool,
) -> Result<CanonicalWeatherResponse, MappingError> {
    let current = &payload.current;
    let issued_at = unix_to_utc(current.dt)?;

    let hourly = payload
        .hourly
        .iter()
        .filter_map(|hour| {
            Some(HourlyPoint {
                time: unix_to_utc(hour.dt).ok()?,
                temperature: format_temperature(hour.temp, units),
                condition_text: first_condition(&hour.weather).to_string(),
                precipitation_chance: hour.pop.map(fraction_to_percent),
            })
        })
        .collect();

    let daily = payload
        .daily
        .iter()
        .filter_map(|day| {
            Some(DailyPoint {
                date: unix_to_utc(day.dt).ok()?.date_naive(),
                high: format_temperature(day.temp.max, units),
                low: format_temperature(day.temp.min, units),
                condition_text: first_condition(&day.weather).to_string(),
                precipitation_chance: day.pop.map(fraction_to_percent),
            })
        })
        .collect();

    Ok(CanonicalWeatherResponse {
        current: CurrentConditions {
            temperature: format_temperature(current.temp, units),
            feels_like: format_temperature(current.feels_like, units),
            humidity_percent: clamp_percent(current.humidity),
            wind_speed: format_wind(mps_to_kmh(current.wind_speed), current.wind_deg, units),
            condition_text: first_condition(&current.weather).to_string(),
        },
        hourly: window_hourly(hourly, issued_at),
        daily: cap_daily(daily),
        issued_at,
        provider_name: PROVIDER_NAME.to_string(),
        is_stale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // 2025-06-01T14:00:00Z
    const NOON_ISH: i64 = 1_748_786_400;

    fn payload() -> OneCallPayload {
        let hourly: Vec<_> = (0..48)
            .map(|h| json!({"dt": NOON_ISH + h * 3600, "temp": 20.0, "weather": [{"id": 500}], "pop": 0.3}))
            .collect();
        serde_json::from_value(json!({
            "current": {
                "dt": NOON_ISH + 600,
                "temp": 22.5,
                "feels_like": 22.9,
                "humidity": 65,
                "wind_speed": 4.2222,
                "wind_deg": 90,
                "weather": [{"id": 803, "main": "Clouds", "description": "broken clouds"}]
            },
            "hourly": hourly,
            "daily": [
                {"dt": NOON_ISH, "temp": {"min": 19.0, "max": 26.0, "day": 24.0}, "weather": [{"id": 800}], "pop": 0.0}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn converts_wind_from_metres_per_second() {
        let resp = map(&payload(), UnitSystem::Metric, false).unwrap();

        // 4.2222 m/s is 15.2 km/h
        assert_eq!(resp.current.wind_speed, "15 km/h from the E");
        assert_eq!(resp.current.temperature, "23°C");
        assert_eq!(resp.current.condition_text, "broken clouds");
    }

    #[test]
    fn hourly_is_capped_to_a_day() {
        let resp = map(&payload(), UnitSystem::Imperial, false).unwrap();

        assert_eq!(resp.hourly.len(), 24);
        assert_eq!(resp.hourly[0].temperature, "68°F");
        assert_eq!(resp.hourly[0].condition_text, "light rain");
        assert_eq!(resp.daily[0].condition_text, "clear sky");
        assert_eq!(resp.daily[0].precipitation_chance, Some(0));
    }

    #[test]
    fn missing_condition_list_falls_back() {
        assert_eq!(first_condition(&[]), "partly cloudy");
        assert_eq!(condition_text(999), "partly cloudy");
    }
}
