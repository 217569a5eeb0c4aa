//! Translation of upstream payloads into [`CanonicalWeatherResponse`].
//!
//! Everything in here is pure: no I/O and no wall-clock reads, so identical
//! payloads always map to identical responses. Upstream values are
//! normalised to Celsius and km/h first, then converted to the requested
//! unit system and rounded for display.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use thiserror::Error;

use crate::model::{CanonicalWeatherResponse, DailyPoint, HourlyPoint, UnitSystem};

pub mod open_meteo;
pub mod openweather;
pub mod weatherkit;

/// Text used when a provider reports a condition code we have no entry for.
pub const UNKNOWN_CONDITION: &str = "partly cloudy";

const KM_PER_MILE: f64 = 1.609_344;

const CARDINALS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

#[derive(Debug, Error, PartialEq)]
#[error("unusable payload: {0}")]
pub struct MappingError(pub String);

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh / KM_PER_MILE
}

pub fn mph_to_kmh(mph: f64) -> f64 {
    mph * KM_PER_MILE
}

pub fn mps_to_kmh(mps: f64) -> f64 {
    mps * 3.6
}

/// 16-point compass label, `round(degrees / 22.5) mod 16`.
pub fn degrees_to_cardinal(degrees: f64) -> &'static str {
    let index = (degrees / 22.5).round() as i64;
    CARDINALS[index.rem_euclid(16) as usize]
}

/// Rounds half away from zero and drops the sign of a rounded zero.
fn display_round(value: f64) -> i64 {
    let rounded = value.round() as i64;
    if rounded == 0 { 0 } else { rounded }
}

pub fn format_temperature(celsius: f64, units: UnitSystem) -> String {
    match units {
        UnitSystem::Metric => format!("{}°C", display_round(celsius)),
        UnitSystem::Imperial => format!("{}°F", display_round(celsius_to_fahrenheit(celsius))),
    }
}

pub fn format_wind(kmh: f64, degrees: Option<f64>, units: UnitSystem) -> String {
    let speed = match units {
        UnitSystem::Metric => format!("{} km/h", display_round(kmh)),
        UnitSystem::Imperial => format!("{} mph", display_round(kmh_to_mph(kmh))),
    };
    match degrees {
        Some(deg) => format!("{speed} from the {}", degrees_to_cardinal(deg)),
        None => speed,
    }
}

/// Clamps a 0..=100 reading to an integer percentage.
pub fn clamp_percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Converts a 0..=1 fraction to an integer percentage.
pub fn fraction_to_percent(fraction: f64) -> u8 {
    clamp_percent(fraction * 100.0)
}

fn start_of_hour(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::hours(1)).unwrap_or(at)
}

/// Keeps hourly points from the observation hour onward, capped at 24.
pub(crate) fn window_hourly(points: Vec<HourlyPoint>, observed_at: DateTime<Utc>) -> Vec<HourlyPoint> {
    let from = start_of_hour(observed_at);
    points
        .into_iter()
        .filter(|p| p.time >= from)
        .take(CanonicalWeatherResponse::MAX_HOURLY)
        .collect()
}

pub(crate) fn cap_daily(mut days: Vec<DailyPoint>) -> Vec<DailyPoint> {
    days.truncate(CanonicalWeatherResponse::MAX_DAILY);
    days
}
