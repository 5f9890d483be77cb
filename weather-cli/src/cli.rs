use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use inquire::Password;
use weather_core::{AggregatedWeather, Aggregator, Config, ProviderId};

use crate::server::{self, ServerState};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Multi-provider weather aggregator")]
pub struct Cli {
    /// Emit logs as JSON (same as setting WEATHER_LOG_JSON).
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the REST API.
    Serve {
        /// Address to listen on, e.g. "127.0.0.1:8000". Defaults to the configured bind.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Aggregate current weather for a city name or "lat,lon" pair.
    Show {
        /// City name or coordinates.
        location: String,

        /// Print the raw JSON envelope.
        #[arg(long)]
        json: bool,
    },

    /// Store an API key for a provider in the config file.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,
    },

    /// Print the effective configuration (API keys are never shown).
    Config,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Serve { bind } => {
                let config = effective_config()?;
                let bind = bind.unwrap_or_else(|| config.server.bind.clone());
                if config.server.api_keys.is_empty() {
                    tracing::warn!("No API keys configured; every request will be rejected");
                }

                let aggregator = Aggregator::from_config(&config)?;
                let state = Arc::new(ServerState::new(aggregator, &config));
                server::serve(state, &bind).await
            }
            Command::Show { location, json } => {
                let config = effective_config()?;
                let aggregator = Aggregator::from_config(&config)?;

                let weather = aggregator
                    .aggregate(&location)
                    .await
                    .map_err(|err| anyhow!(err.detail()))?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&weather)?);
                } else {
                    print_weather(&weather);
                }
                Ok(())
            }
            Command::Configure { provider } => configure(&provider),
            Command::Config => {
                let config = effective_config()?;
                println!("Config file: {}", Config::config_file_path()?.display());
                println!("{}", serde_json::to_string_pretty(&config.summary())?);
                Ok(())
            }
        }
    }
}

/// File config with environment overrides applied.
fn effective_config() -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    config
        .apply_env_overrides(|var| std::env::var(var).ok())
        .map_err(|err| anyhow!(err.detail()))?;
    Ok(config)
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    if id.api_key_env().is_none() {
        bail!(
            "{} does not need an API key (city names are geocoded with the {} key).",
            id.display_name(),
            id.credential().display_name()
        );
    }

    // Only the file config is written back; environment overrides stay out of it.
    let mut config = Config::load()?;

    let api_key = Password::new(&format!("{} API key:", id.display_name()))
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    let api_key = api_key.trim();
    if api_key.is_empty() {
        bail!("API key cannot be empty");
    }

    config.upsert_provider_api_key(id, api_key.to_string());
    config.save()?;

    println!(
        "Saved {} API key to {}",
        id.display_name(),
        Config::config_file_path()?.display()
    );
    Ok(())
}

fn print_weather(weather: &AggregatedWeather) {
    let fmt_opt = |value: Option<f64>, unit: &str| {
        value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1} {unit}"))
    };

    println!("Weather for {}", weather.location);
    println!(
        "  Temperature: {} ({})",
        fmt_opt(weather.temperature.value, "°C"),
        weather.temperature.method
    );
    println!("  Humidity:    {}", fmt_opt(weather.humidity, "%"));
    println!("  Conditions:  {}", weather.conditions);
    println!("  As of:       {}", weather.timestamp.to_rfc3339());
    println!("  Sources:");
    for source in &weather.sources {
        println!(
            "    {:<15} {:>6} ms  {}",
            source.provider, source.response_time_ms, source.status
        );
    }
}
