//! Fan-out/fan-in over every provider, reduced to one consensus answer.
//!
//! Temperature is the median of successful readings, humidity the mean of
//! the readings that exist, conditions the most common description. Every
//! provider gets a source record whatever its outcome.

use std::{collections::HashMap, sync::Arc};

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    cache::ResponseCache,
    config::Config,
    error::{Result, WeatherError},
    http::HttpClient,
    model::{AggregatedWeather, LocationQuery, ProviderResult, Temperature, service_timestamp},
    provider::{ProviderId, WeatherProvider, registry},
    validate::validate_location,
};

pub const ALL_PROVIDERS_FAILED: &str = "All weather providers failed to return current weather data for this location now, please try again later or change location.";

/// Reported when no provider supplied a description.
pub const CONDITIONS_UNAVAILABLE: &str = "Weather data unavailable";

/// API keys the adapters are called with.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    keys: HashMap<ProviderId, String>,
}

impl Credentials {
    pub fn from_config(config: &Config) -> Self {
        let keys = ProviderId::all()
            .iter()
            .filter_map(|&id| config.provider_api_key(id).map(|key| (id, key.to_string())))
            .collect();
        Self { keys }
    }

    pub fn with_key(mut self, id: ProviderId, key: impl Into<String>) -> Self {
        self.keys.insert(id, key.into());
        self
    }

    /// Key `provider`'s calls are made with (Open-Meteo borrows OpenWeatherMap's).
    pub fn key_for(&self, provider: ProviderId) -> Option<&str> {
        self.keys.get(&provider.credential()).map(String::as_str)
    }

    /// Env var names of required keys that aren't set.
    pub fn missing(&self) -> Vec<&'static str> {
        ProviderId::all()
            .iter()
            .filter(|id| !self.keys.contains_key(id))
            .filter_map(|id| id.api_key_env())
            .collect()
    }
}

#[derive(Debug)]
pub struct Aggregator {
    providers: Vec<Arc<dyn WeatherProvider>>,
    cache: ResponseCache,
    credentials: Credentials,
}

impl Aggregator {
    pub fn new(
        providers: Vec<Arc<dyn WeatherProvider>>,
        cache: ResponseCache,
        credentials: Credentials,
    ) -> Self {
        Self { providers, cache, credentials }
    }

    /// Wire the shared HTTP client, rate limiter, cache and adapters from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = Arc::new(HttpClient::from_config(config)?);
        Ok(Self::new(
            registry(config, http),
            ResponseCache::from_config(&config.cache),
            Credentials::from_config(config),
        ))
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Current weather for `location` from every provider, or a cached answer.
    pub async fn aggregate(&self, location: &str) -> Result<AggregatedWeather> {
        let started = Instant::now();
        let query = validate_location(location)?;
        let location = location.trim();

        if let Some(cached) = self.cache.get(location) {
            info!(location, "Serving cached weather");
            return Ok(cached);
        }

        let missing = self.credentials.missing();
        if !missing.is_empty() {
            error!(missing = ?missing, "Required API keys are not configured");
            return Err(WeatherError::Configuration(format!(
                "Missing required API keys: {}",
                missing.join(", ")
            )));
        }

        info!(location, coordinates = query.is_coordinates(), providers = self.providers.len(), "Fetching weather");

        let results = self.fetch_all(&query).await;
        let weather = summarize(location, &results)?;

        self.cache.set(location, weather.clone());

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            location,
            succeeded,
            failed = results.len() - succeeded,
            temperature = ?weather.temperature.value,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Weather aggregated"
        );

        Ok(weather)
    }

    /// Run every adapter concurrently and wait for all of them.
    ///
    /// Each adapter runs in its own task so a panic in one becomes a failure
    /// record instead of taking the others down.
    async fn fetch_all(&self, query: &LocationQuery) -> Vec<ProviderResult> {
        let handles = self.providers.iter().map(|provider| {
            let provider = provider.clone();
            let query = query.clone();
            let api_key = self.credentials.key_for(provider.id()).unwrap_or_default().to_string();
            let id = provider.id();
            let handle = tokio::spawn(async move { provider.fetch(&query, &api_key).await });
            (id, handle)
        });

        let (ids, handles): (Vec<_>, Vec<_>) = handles.unzip();

        join_all(handles)
            .await
            .into_iter()
            .zip(ids)
            .map(|(joined, id)| {
                joined.unwrap_or_else(|err| {
                    warn!(provider = id.display_name(), error = %err, "Provider task did not complete");
                    ProviderResult::failure(id, format!("Unexpected error: {err}"), 0, 0)
                })
            })
            .collect()
    }
}

/// Reduce per-provider results to the response envelope.
///
/// Fails only when no provider succeeded.
pub fn summarize(location: &str, results: &[ProviderResult]) -> Result<AggregatedWeather> {
    let successes: Vec<&ProviderResult> = results.iter().filter(|r| r.is_success()).collect();

    if successes.is_empty() {
        let reasons: Vec<String> = results.iter().map(|r| format!("{}: {}", r.provider.display_name(), r.status)).collect();
        error!(location, reasons = ?reasons, "All providers failed");
        return Err(WeatherError::Provider(ALL_PROVIDERS_FAILED.to_string()));
    }

    let temperatures: Vec<f64> = successes.iter().filter_map(|r| r.temperature).collect();
    let humidities: Vec<f64> = successes.iter().filter_map(|r| r.humidity).collect();
    let descriptions: Vec<&str> = successes.iter().filter_map(|r| r.description.as_deref()).collect();

    Ok(AggregatedWeather {
        location: location.to_string(),
        temperature: Temperature::median_celsius(median(&temperatures).map(round1)),
        humidity: mean(&humidities).map(round1),
        conditions: mode(&descriptions).unwrap_or(CONDITIONS_UNAVAILABLE).to_string(),
        sources: results.iter().map(ProviderResult::source).collect(),
        timestamp: service_timestamp(),
    })
}

/// Middle value; the mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Most frequent value. Ties go to whichever was seen first.
pub fn mode<'a>(values: &[&'a str]) -> Option<&'a str> {
    let mut counts: Vec<(&'a str, usize)> = Vec::new();
    for &value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&'a str, usize)> = None;
    for (value, n) in counts {
        if best.is_none_or(|(_, top)| n > top) {
            best = Some((value, n));
        }
    }
    best.map(|(value, _)| value)
}

/// Round half away from zero to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
