use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use concierge_weather::{
    CanonicalWeatherResponse, Config, HealthReport, ProviderId, UnitSystem, WeatherQuery,
    WeatherService, config::WeatherKitConfig,
};
use inquire::{Confirm, Password, Text};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "concierge-weather", version, about = "Concierge weather service CLI")]
pub struct Cli {
    /// Log library activity at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name: "weatherkit", "openweather" or "open_meteo".
        provider: String,
    },

    /// Show current weather and forecast.
    Show {
        /// Latitude; defaults to the configured location.
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude; defaults to the configured location.
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,

        /// "metric" or "imperial"; defaults to the configured unit system.
        #[arg(long)]
        units: Option<UnitSystem>,

        /// Print the canonical payload as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run one live lookup and report provider, breaker and cache health.
    Health {
        #[arg(long)]
        json: bool,
    },

    /// Print the path of the configuration file.
    ConfigPath,
}

impl Cli {
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "concierge_weather=debug,concierge_weather_cli=debug"
        } else {
            "concierge_weather=info"
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Show {
                lat,
                lon,
                units,
                json,
            } => show(lat, lon, units, json).await,
            Command::Health { json } => health(json).await,
            Command::ConfigPath => {
                println!("{}", Config::config_file_path()?.display());
                Ok(())
            }
        }
    }
}

fn load_config() -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    config.apply_env_overrides()?;
    Ok(config)
}

async fn start_service() -> anyhow::Result<WeatherService> {
    let config = load_config()?;
    let service = WeatherService::from_config(&config)
        .context("Weather service configuration is invalid")?;
    service.startup().await;
    Ok(service)
}

async fn show(
    lat: Option<f64>,
    lon: Option<f64>,
    units: Option<UnitSystem>,
    json: bool,
) -> anyhow::Result<()> {
    let service = start_service().await?;
    let query = WeatherQuery {
        latitude: lat,
        longitude: lon,
        unit_system: units,
    };

    match service.get_current_weather(query).await {
        Ok(resp) if json => {
            println!("{}", serde_json::to_string_pretty(&resp)?);
            Ok(())
        }
        Ok(resp) => {
            print_weather(&resp);
            Ok(())
        }
        Err(err) => {
            if json {
                let sentinel = CanonicalWeatherResponse::unavailable(Utc::now());
                println!("{}", serde_json::to_string_pretty(&sentinel)?);
            }
            bail!(err.user_message())
        }
    }
}

fn print_weather(resp: &CanonicalWeatherResponse) {
    let c = &resp.current;
    let stale = if resp.is_stale { "  [stale]" } else { "" };

    println!("Now: {}, {}{stale}", c.temperature, c.condition_text);
    println!("  feels like {}", c.feels_like);
    println!("  humidity   {}%", c.humidity_percent);
    println!("  wind       {}", c.wind_speed);
    println!(
        "  source     {} (issued {})",
        resp.provider_name,
        resp.issued_at.format("%Y-%m-%d %H:%M UTC")
    );

    if !resp.hourly.is_empty() {
        println!();
        println!("Next hours:");
        for h in resp.hourly.iter().take(12) {
            let precip = h
                .precipitation_chance
                .map(|p| format!(", {p}% precip"))
                .unwrap_or_default();
            println!(
                "  {}  {:>6}  {}{precip}",
                h.time.format("%H:%M"),
                h.temperature,
                h.condition_text
            );
        }
    }

    if !resp.daily.is_empty() {
        println!();
        println!("Coming days:");
        for d in &resp.daily {
            println!(
                "  {}  {:>6} / {:<6}  {}",
                d.date.format("%a %d %b"),
                d.high,
                d.low,
                d.condition_text
            );
        }
    }
}

async fn health(json: bool) -> anyhow::Result<()> {
    let service = start_service().await?;
    let report = service.health_check().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_health(&report);
    }

    if !report.healthy {
        bail!("weather service is unhealthy");
    }
    Ok(())
}

fn print_health(report: &HealthReport) {
    println!("healthy:        {}", report.healthy);
    println!(
        "provider used:  {}",
        report.provider_used.as_deref().unwrap_or("-")
    );
    println!(
        "stale:          {}",
        report.is_stale.map_or("-".to_string(), |s| s.to_string())
    );
    println!("response time:  {:.1} ms", report.response_time_ms);
    if let Some(kind) = report.error {
        println!("error:          {kind:?}");
    }
    for p in &report.providers {
        println!(
            "breaker {:<8} {:<11} {:?} ({} consecutive failures)",
            p.role, p.provider, p.breaker.state, p.breaker.consecutive_failures
        );
    }
    println!("cache entries:  {}", report.cache_entries);
    println!(
        "requests:       {} ({} errors, {:.1}% error rate, {} via fallback)",
        report.metrics.total_requests,
        report.metrics.total_errors,
        report.metrics.error_rate_percent,
        report.metrics.fallback_used
    );
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    match id {
        ProviderId::OpenMeteo => {
            println!("open_meteo needs no credentials.");
        }
        ProviderId::OpenWeather => {
            let api_key = Password::new("OpenWeather API key:")
                .without_confirmation()
                .prompt()
                .context("Failed to read API key")?;
            config.upsert_openweather_key(api_key.trim().to_string());
        }
        ProviderId::WeatherKit => {
            let existing = config.providers.weatherkit.clone().unwrap_or_default();

            let team_id = Text::new("Apple team id:")
                .with_initial_value(&existing.team_id)
                .prompt()?;
            let service_id = Text::new("WeatherKit service id:")
                .with_initial_value(&existing.service_id)
                .prompt()?;
            let key_id = Text::new("Signing key id:")
                .with_initial_value(&existing.key_id)
                .prompt()?;
            let key_path = Text::new("Path to the .p8 private key:").prompt()?;

            let private_key_path = PathBuf::from(key_path.trim());
            if !private_key_path.is_file() {
                bail!("No key file at {}", private_key_path.display());
            }

            config.upsert_weatherkit(WeatherKitConfig {
                team_id: team_id.trim().to_string(),
                service_id: service_id.trim().to_string(),
                key_id: key_id.trim().to_string(),
                private_key: None,
                private_key_path: Some(private_key_path),
                base_url: existing.base_url,
            });
        }
    }

    let make_primary = Confirm::new(&format!("Use {id} as the primary provider?"))
        .with_default(true)
        .prompt()?;
    if make_primary {
        config.set_primary_provider(id);
    }

    // Re-check before writing so a half-configured file never lands on disk.
    config.validate()?;
    config.save()?;

    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}
