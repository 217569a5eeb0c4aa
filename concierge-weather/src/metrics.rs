//! Process-wide request metrics.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use serde::Serialize;

use crate::provider::ProviderId;

/// Size of the rolling latency buffer.
pub const LATENCY_SAMPLES: usize = 1000;

#[derive(Debug, Default)]
struct ProviderCounters {
    attempts: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug)]
pub struct ServiceMetrics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    fallback_used: AtomicU64,
    cache_hits: AtomicU64,
    stale_served: AtomicU64,
    providers: [ProviderCounters; 3],
    /// Milliseconds, oldest first.
    latencies: Mutex<VecDeque<f64>>,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            fallback_used: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            providers: Default::default(),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLES)),
        }
    }
}

fn slot(provider: ProviderId) -> usize {
    match provider {
        ProviderId::OpenMeteo => 0,
        ProviderId::WeatherKit => 1,
        ProviderId::OpenWeather => 2,
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A call that ended with an error surfaced to the caller.
    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_used(&self) {
        self.fallback_used.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    /// One outbound upstream call.
    pub fn record_attempt(&self, provider: ProviderId) {
        self.providers[slot(provider)]
            .attempts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_error(&self, provider: ProviderId) {
        self.providers[slot(provider)]
            .errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let mut latencies = self.latencies.lock();
        if latencies.len() == LATENCY_SAMPLES {
            latencies.pop_front();
        }
        latencies.push_back(elapsed.as_micros() as f64 / 1000.0);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);

        let error_rate_percent = if total_requests == 0 {
            0.0
        } else {
            total_errors as f64 / total_requests as f64 * 100.0
        };

        let mut sorted: Vec<f64> = self.latencies.lock().iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let providers = ProviderId::all()
            .iter()
            .map(|&id| {
                let counters = &self.providers[slot(id)];
                (
                    id,
                    ProviderCounts {
                        attempts: counters.attempts.load(Ordering::Relaxed),
                        errors: counters.errors.load(Ordering::Relaxed),
                    },
                )
            })
            .filter(|(_, counts)| counts.attempts > 0 || counts.errors > 0)
            .collect();

        MetricsSnapshot {
            total_requests,
            total_errors,
            fallback_used: self.fallback_used.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            error_rate_percent,
            latency: LatencySummary {
                samples: sorted.len(),
                p50_ms: percentile(&sorted, 0.50),
                p95_ms: percentile(&sorted, 0.95),
                p99_ms: percentile(&sorted, 0.99),
            },
            providers,
        }
    }
}

/// Nearest-rank percentile: `sorted[ceil(n * p) - 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (sorted.len() as f64 * p).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[idx])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderCounts {
    pub attempts: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub fallback_used: u64,
    pub cache_hits: u64,
    pub stale_served: u64,
    pub error_rate_percent: f64,
    pub latency: LatencySummary,
    pub providers: BTreeMap<ProviderId, ProviderCounts>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_uses_nearest_rank() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.50), Some(50.0));
        assert_eq!(percentile(&sorted, 0.95), Some(95.0));
        assert_eq!(percentile(&sorted, 0.99), Some(99.0));
        assert_eq!(percentile(&[7.0], 0.99), Some(7.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn error_rate_is_a_percentage() {
        let metrics = ServiceMetrics::new();
        for _ in 0..4 {
            metrics.record_request();
        }
        metrics.record_error();

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.error_rate_percent, 25.0);
    }

    #[test]
    fn latency_ring_keeps_the_most_recent_samples() {
        let metrics = ServiceMetrics::new();
        for ms in 0..(LATENCY_SAMPLES as u64 + 500) {
            metrics.record_latency(Duration::from_millis(ms));
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.latency.samples, LATENCY_SAMPLES);
        // Samples 500..1500 remain; p50 is the 500th of them.
        assert_eq!(snap.latency.p50_ms, Some(999.0));
    }

    #[test]
    fn per_provider_counts_are_tracked() {
        let metrics = ServiceMetrics::new();
        metrics.record_attempt(ProviderId::WeatherKit);
        metrics.record_attempt(ProviderId::WeatherKit);
        metrics.record_provider_error(ProviderId::WeatherKit);
        metrics.record_attempt(ProviderId::OpenMeteo);

        let snap = metrics.snapshot();
        assert_eq!(
            snap.providers[&ProviderId::WeatherKit],
            ProviderCounts { attempts: 2, errors: 1 }
        );
        assert_eq!(snap.providers[&ProviderId::OpenMeteo].attempts, 1);
        assert!(!snap.providers.contains_key(&ProviderId::OpenWeather));

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["providers"]["weatherkit"]["attempts"], 2);
    }
}
