use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::{
    error::WeatherError,
    model::{Coordinates, UnitSystem},
    provider::{ProviderId, weatherkit::WeatherKitCredentials},
    resilience::{BreakerSettings, CachePolicy, RetryPolicy},
};

/// Resort location served when a call does not name coordinates.
pub const DEFAULT_LATITUDE: f64 = 32.2949;
pub const DEFAULT_LONGITUDE: f64 = -64.7814;

/// Upper bound for every breaker and cache duration: 30 days.
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// [service]
/// provider = "weatherkit"
/// fallback_provider = "open_meteo"
///
/// [providers.openweather]
/// api_key = "..."
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Primary provider id, e.g. "weatherkit" or "open_meteo".
    pub provider: String,
    pub fallback_provider: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub units: UnitSystem,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider: ProviderId::OpenMeteo.as_str().to_string(),
            fallback_provider: Some(ProviderId::OpenMeteo.as_str().to_string()),
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            units: UnitSystem::Metric,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub read_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { read_timeout_secs: 3 }
    }
}

impl HttpConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 250,
            backoff_factor: 2.0,
            max_delay_ms: 2_000,
            jitter_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub window_secs: u64,
    pub open_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 120,
            open_secs: 60,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold,
            window: secs(self.window_secs),
            open_duration: secs(self.open_secs),
        }
    }
}

// Saturates instead of panicking; `validate` rejects anything this large.
fn secs(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub stale_window_secs: u64,
    pub background_revalidate: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3 * 60 * 60,
            stale_window_secs: 6 * 60 * 60,
            background_revalidate: true,
        }
    }
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: secs(self.ttl_secs),
            stale_window: secs(self.stale_window_secs),
            background_revalidate: self.background_revalidate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub open_meteo: Option<OpenMeteoConfig>,
    pub weatherkit: Option<WeatherKitConfig>,
    pub openweather: Option<OpenWeatherConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OpenMeteoConfig {
    pub base_url: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WeatherKitConfig {
    pub team_id: String,
    pub service_id: String,
    pub key_id: String,
    /// Inline PEM. Takes precedence over `private_key_path`.
    pub private_key: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for WeatherKitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherKitConfig")
            .field("team_id", &self.team_id)
            .field("service_id", &self.service_id)
            .field("key_id", &self.key_id)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl WeatherKitConfig {
    fn has_key_material(&self) -> bool {
        self.private_key.as_ref().is_some_and(|k| !k.trim().is_empty())
            || self.private_key_path.is_some()
    }

    /// Resolves the signing key (inline or from disk) into credentials.
    pub fn credentials(&self) -> Result<WeatherKitCredentials, WeatherError> {
        let pem = match (&self.private_key, &self.private_key_path) {
            (Some(inline), _) if !inline.trim().is_empty() => normalize_pem(inline),
            (_, Some(path)) => fs::read_to_string(path).map_err(|e| {
                WeatherError::config(format!(
                    "failed to read weatherkit private key {}: {e}",
                    path.display()
                ))
            })?,
            _ => return Err(WeatherError::config("weatherkit private key is not configured")),
        };

        Ok(WeatherKitCredentials {
            team_id: self.team_id.clone(),
            service_id: self.service_id.clone(),
            key_id: self.key_id.clone(),
            private_key_pem: pem,
        })
    }
}

/// Keys passed through environment variables often carry literal `\n`.
fn normalize_pem(raw: &str) -> String {
    raw.replace("\\n", "\n").trim().to_string()
}

#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OpenWeatherConfig {
    pub api_key: String,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for OpenWeatherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenWeatherConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Config {
    /// Return the primary provider as a strongly-typed ProviderId.
    pub fn primary_provider_id(&self) -> Result<ProviderId, WeatherError> {
        ProviderId::try_from(self.service.provider.as_str())
    }

    /// The fallback provider, or `None` when disabled or identical to the primary.
    pub fn fallback_provider_id(&self) -> Result<Option<ProviderId>, WeatherError> {
        let Some(raw) = self.named_fallback() else {
            return Ok(None);
        };
        let fallback = ProviderId::try_from(raw)?;
        if fallback == self.primary_provider_id()? {
            return Ok(None);
        }
        Ok(Some(fallback))
    }

    /// True when a fallback is named but resolves to the primary itself.
    pub fn fallback_shadows_primary(&self) -> bool {
        self.named_fallback().is_some() && matches!(self.fallback_provider_id(), Ok(None))
    }

    // "none" and "off" disable the fallback, since TOML has no null.
    fn named_fallback(&self) -> Option<&str> {
        let raw = self.service.fallback_provider.as_deref()?.trim();
        match raw.to_lowercase().as_str() {
            "" | "none" | "off" => None,
            _ => Some(raw),
        }
    }

    pub fn set_primary_provider(&mut self, id: ProviderId) {
        self.service.provider = id.as_str().to_string();
    }

    pub fn default_coordinates(&self) -> Result<Coordinates, WeatherError> {
        Coordinates::new(self.service.latitude, self.service.longitude)
            .map_err(|e| WeatherError::config(format!("default location: {e}")))
    }

    pub fn is_provider_configured(&self, id: ProviderId) -> bool {
        match id {
            ProviderId::OpenMeteo => true,
            ProviderId::WeatherKit => self.providers.weatherkit.as_ref().is_some_and(|wk| {
                !wk.team_id.trim().is_empty()
                    && !wk.service_id.trim().is_empty()
                    && !wk.key_id.trim().is_empty()
                    && wk.has_key_material()
            }),
            ProviderId::OpenWeather => self
                .providers
                .openweather
                .as_ref()
                .is_some_and(|ow| !ow.api_key.trim().is_empty()),
        }
    }

    /// Convenience helper: set/replace the OpenWeather key.
    pub fn upsert_openweather_key(&mut self, api_key: String) {
        let section = self.providers.openweather.get_or_insert_with(Default::default);
        section.api_key = api_key;
    }

    pub fn upsert_weatherkit(&mut self, section: WeatherKitConfig) {
        self.providers.weatherkit = Some(section);
    }

    /// Eager startup validation. Anything wrong here is `ConfigurationInvalid`.
    pub fn validate(&self) -> Result<(), WeatherError> {
        self.default_coordinates()?;

        let primary = self.primary_provider_id()?;
        let fallback = self.fallback_provider_id()?;

        for id in std::iter::once(primary).chain(fallback) {
            if !self.is_provider_configured(id) {
                return Err(WeatherError::config(format!(
                    "provider '{id}' is selected but its credentials are missing or incomplete"
                )));
            }
        }

        if self.http.read_timeout_secs == 0 {
            return Err(WeatherError::config("http.read_timeout_secs must be positive"));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(WeatherError::config("retry.backoff_factor must be >= 1.0"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(WeatherError::config("circuit_breaker.failure_threshold must be positive"));
        }
        if self.circuit_breaker.window_secs == 0 || self.circuit_breaker.open_secs == 0 {
            return Err(WeatherError::config(
                "circuit_breaker.window_secs and open_secs must be positive",
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(WeatherError::config("cache.ttl_secs must be positive"));
        }
        for (name, value) in [
            ("circuit_breaker.window_secs", self.circuit_breaker.window_secs),
            ("circuit_breaker.open_secs", self.circuit_breaker.open_secs),
            ("cache.ttl_secs", self.cache.ttl_secs),
            ("cache.stale_window_secs", self.cache.stale_window_secs),
        ] {
            if value > MAX_DURATION_SECS {
                return Err(WeatherError::config(format!(
                    "{name} must be at most {MAX_DURATION_SECS} (30 days), got {value}"
                )));
            }
        }

        Ok(())
    }

    /// Applies `WEATHER_*`, `WEATHERKIT_*` and `OPENWEATHER_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), WeatherError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::apply_env_overrides`] with an injectable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), WeatherError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WEATHER_PROVIDER") {
            self.service.provider = v;
        }
        if let Some(v) = get("WEATHER_FALLBACK_PROVIDER") {
            self.service.fallback_provider = Some(v);
        }
        if let Some(v) = get("WEATHER_LATITUDE") {
            self.service.latitude = parse_var("WEATHER_LATITUDE", &v)?;
        }
        if let Some(v) = get("WEATHER_LONGITUDE") {
            self.service.longitude = parse_var("WEATHER_LONGITUDE", &v)?;
        }
        if let Some(v) = get("WEATHER_UNITS") {
            self.service.units = v
                .parse()
                .map_err(|e: WeatherError| WeatherError::config(format!("WEATHER_UNITS: {e}")))?;
        }
        if let Some(v) = get("WEATHER_READ_TIMEOUT_SECS") {
            self.http.read_timeout_secs = parse_var("WEATHER_READ_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("WEATHER_MAX_RETRIES") {
            self.retry.max_retries = parse_var("WEATHER_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("WEATHER_CB_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = parse_var("WEATHER_CB_FAILURE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("WEATHER_CB_WINDOW_SECS") {
            self.circuit_breaker.window_secs = parse_var("WEATHER_CB_WINDOW_SECS", &v)?;
        }
        if let Some(v) = get("WEATHER_CB_OPEN_SECS") {
            self.circuit_breaker.open_secs = parse_var("WEATHER_CB_OPEN_SECS", &v)?;
        }
        if let Some(v) = get("WEATHER_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_var("WEATHER_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = get("WEATHER_CACHE_STALE_WINDOW_SECS") {
            self.cache.stale_window_secs = parse_var("WEATHER_CACHE_STALE_WINDOW_SECS", &v)?;
        }

        let wk_vars = [
            "WEATHERKIT_TEAM_ID",
            "WEATHERKIT_SERVICE_ID",
            "WEATHERKIT_KEY_ID",
            "WEATHERKIT_PRIVATE_KEY",
            "WEATHERKIT_PRIVATE_KEY_PATH",
        ];
        if wk_vars.iter().any(|name| get(name).is_some()) {
            let wk = self.providers.weatherkit.get_or_insert_with(Default::default);
            if let Some(v) = get("WEATHERKIT_TEAM_ID") {
                wk.team_id = v;
            }
            if let Some(v) = get("WEATHERKIT_SERVICE_ID") {
                wk.service_id = v;
            }
            if let Some(v) = get("WEATHERKIT_KEY_ID") {
                wk.key_id = v;
            }
            if let Some(v) = get("WEATHERKIT_PRIVATE_KEY") {
                wk.private_key = Some(v);
            }
            if let Some(v) = get("WEATHERKIT_PRIVATE_KEY_PATH") {
                wk.private_key_path = Some(PathBuf::from(v));
            }
        }

        if let Some(v) = get("OPENWEATHER_API_KEY") {
            self.upsert_openweather_key(v);
        }

        Ok(())
    }

    /// Load config from disk, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, use defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "concierge", "concierge-weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T, WeatherError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| WeatherError::config(format!("{name}='{raw}' is invalid: {e}")))
}
