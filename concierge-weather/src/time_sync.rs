//! One-shot clock drift check against a public time reference.
//!
//! WeatherKit tokens carry `iat`/`exp`, so a skewed host clock shows up as
//! rejected credentials. The check only warns; it never blocks startup.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

pub const TIME_REFERENCE_URL: &str = "https://worldtimeapi.org/api/timezone/Etc/UTC";

/// Drift beyond this many seconds is logged as a warning.
pub const MAX_DRIFT_SECS: i64 = 2;

#[derive(Debug, Deserialize)]
struct TimeReference {
    unixtime: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub reference: DateTime<Utc>,
    pub local: DateTime<Utc>,
    /// `local - reference`, in whole seconds.
    pub drift_secs: i64,
}

impl DriftReport {
    pub fn within_tolerance(&self) -> bool {
        self.drift_secs.abs() <= MAX_DRIFT_SECS
    }
}

pub async fn measure_drift(http: &Client, url: &str, clock: &dyn Clock) -> Result<DriftReport> {
    let res = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("time reference request to {url} failed"))?
        .error_for_status()
        .context("time reference returned an error status")?;

    let body: TimeReference = res
        .json()
        .await
        .context("time reference payload has no usable `unixtime`")?;

    let local = clock.now();
    let reference = DateTime::<Utc>::from_timestamp(body.unixtime, 0)
        .context("time reference returned an out-of-range timestamp")?;

    Ok(DriftReport {
        reference,
        local,
        drift_secs: local.timestamp() - body.unixtime,
    })
}

/// Runs [`measure_drift`] and logs the outcome. Failures are swallowed.
pub async fn check_clock_drift(http: &Client, url: &str, clock: &dyn Clock) -> Option<DriftReport> {
    match measure_drift(http, url, clock).await {
        Ok(report) if report.within_tolerance() => {
            tracing::debug!(drift_secs = report.drift_secs, "clock drift within tolerance");
            Some(report)
        }
        Ok(report) => {
            tracing::warn!(
                drift_secs = report.drift_secs,
                max_drift_secs = MAX_DRIFT_SECS,
                "system clock drift exceeds tolerance, signed WeatherKit tokens may be rejected"
            );
            Some(report)
        }
        Err(error) => {
            tracing::warn!(error = %format!("{error:#}"), "clock drift check skipped");
            None
        }
    }
}
