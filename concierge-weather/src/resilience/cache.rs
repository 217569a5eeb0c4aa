//! Response cache shared by every provider.
//!
//! Keys are coordinates rounded to two decimals plus the unit system, so a
//! payload stored by the fallback satisfies a later lookup for the primary.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::model::{CanonicalWeatherResponse, UnitSystem, WeatherRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub stale_window: Duration,
    pub background_revalidate: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(3),
            stale_window: Duration::hours(6),
            background_revalidate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    lat_hundredths: i64,
    lon_hundredths: i64,
    units: UnitSystem,
}

impl CacheKey {
    pub fn for_request(request: &WeatherRequest) -> Self {
        Self {
            lat_hundredths: (request.latitude() * 100.0).round() as i64,
            lon_hundredths: (request.longitude() * 100.0).round() as i64,
            units: request.unit_system(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2},{:.2},{}",
            self.lat_hundredths as f64 / 100.0,
            self.lon_hundredths as f64 / 100.0,
            self.units
        )
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: CanonicalWeatherResponse,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
    pub stale_window: Duration,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.stored_at
    }
}

/// Result of consulting the cache at a given instant.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// `age < ttl`; payload exactly as stored.
    Fresh(CanonicalWeatherResponse),
    /// `ttl <= age < ttl + stale_window`; flagged stale.
    Stale(CanonicalWeatherResponse),
    /// Past the stale window. Kept only as a last resort on failure; flagged stale.
    Expired(CanonicalWeatherResponse),
    Miss,
}

#[derive(Debug, Default)]
pub struct WeatherCache {
    policy: CachePolicy,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl WeatherCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn lookup(&self, key: &CacheKey, now: DateTime<Utc>) -> CacheLookup {
        let entries = self.entries.lock();
        let Some(entry) = entries.get(key) else {
            return CacheLookup::Miss;
        };

        let age = entry.age(now);
        if age < entry.ttl {
            CacheLookup::Fresh(entry.payload.clone())
        } else if entry
            .ttl
            .checked_add(&entry.stale_window)
            .is_none_or(|limit| age < limit)
        {
            CacheLookup::Stale(entry.payload.clone().into_stale())
        } else {
            CacheLookup::Expired(entry.payload.clone().into_stale())
        }
    }

    /// Overwrites whatever is stored for `key`. Last write wins.
    pub fn store(&self, key: CacheKey, payload: CanonicalWeatherResponse, now: DateTime<Utc>) {
        let entry = CacheEntry {
            payload,
            stored_at: now,
            ttl: self.policy.ttl,
            stale_window: self.policy.stale_window,
        };
        self.entries.lock().insert(key, entry);
        tracing::debug!(%key, "cache entry stored");
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
