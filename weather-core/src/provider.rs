use crate::{
    Config, LocationQuery, ProviderResult, ProviderStatus,
    http::{FetchOutcome, HttpClient},
    provider::{openmeteo::OpenMeteoProvider, openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
};
use async_trait::async_trait;
use serde_json::Value;
use std::{convert::TryFrom, fmt::Debug, sync::Arc};
use tracing::{info, warn};

pub mod geocode;
pub mod openmeteo;
pub mod openweather;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
    OpenMeteo,
}

impl ProviderId {
    /// Config / CLI identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
            ProviderId::OpenMeteo => "openmeteo",
        }
    }

    /// Name reported in source records.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "OpenWeatherMap",
            ProviderId::WeatherApi => "WeatherAPI",
            ProviderId::OpenMeteo => "OpenMeteo",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi, ProviderId::OpenMeteo]
    }

    /// Which provider's API key this provider's calls are made with.
    ///
    /// Open-Meteo itself is keyless, but geocoding a city name for it goes
    /// through OpenWeatherMap.
    pub fn credential(&self) -> ProviderId {
        match self {
            ProviderId::WeatherApi => ProviderId::WeatherApi,
            ProviderId::OpenWeather | ProviderId::OpenMeteo => ProviderId::OpenWeather,
        }
    }

    /// Environment variable holding this provider's key, if it takes one.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderId::OpenWeather => Some("OPENWEATHER_API_KEY"),
            ProviderId::WeatherApi => Some("WEATHERAPI_KEY"),
            ProviderId::OpenMeteo => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" | "openweathermap" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            "openmeteo" | "open-meteo" => Ok(ProviderId::OpenMeteo),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi, openmeteo."
            )),
        }
    }
}

/// One upstream weather service.
///
/// Implementations never fail past this boundary: every outcome, including
/// transport errors and unparseable bodies, comes back as a [`ProviderResult`].
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    async fn fetch(&self, location: &LocationQuery, api_key: &str) -> ProviderResult;
}

/// The fixed set of adapters the aggregator fans out to, in response order.
pub fn registry(config: &Config, http: Arc<HttpClient>) -> Vec<Arc<dyn WeatherProvider>> {
    ProviderId::all()
        .iter()
        .map(|&id| {
            let settings = config.provider_settings(id);
            let provider: Arc<dyn WeatherProvider> = match id {
                ProviderId::OpenWeather => Arc::new(OpenWeatherProvider::new(settings, http.clone())),
                ProviderId::WeatherApi => Arc::new(WeatherApiProvider::new(settings, http.clone())),
                ProviderId::OpenMeteo => {
                    let geocoding = config.provider_settings(ProviderId::OpenWeather);
                    Arc::new(OpenMeteoProvider::new(settings, geocoding, http.clone()))
                }
            };
            provider
        })
        .collect()
}

/// Fields an adapter extracts from a successful response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Reading {
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub description: Option<String>,
    pub location_name: Option<String>,
    pub weather_code: Option<i64>,
}

/// Turn a fetch outcome into a normalized result, parsing the body with `parse`.
///
/// A body that doesn't have the expected shape is a failure for this
/// provider, not an error for the whole request.
pub(crate) fn normalize(
    id: ProviderId,
    outcome: FetchOutcome,
    parse: impl FnOnce(&Value) -> Result<Reading, serde_json::Error>,
) -> ProviderResult {
    match outcome {
        FetchOutcome::Success { body, elapsed_ms, attempts } => {
            match parse(&body) {
                Ok(reading) => {
                    info!(
                        provider = id.display_name(),
                        temperature = reading.temperature,
                        humidity = ?reading.humidity,
                        code = ?reading.weather_code,
                        location_name = ?reading.location_name,
                        elapsed_ms,
                        "Provider returned data"
                    );
                    ProviderResult {
                        provider: id,
                        status: ProviderStatus::Success,
                        temperature: Some(reading.temperature),
                        humidity: reading.humidity,
                        description: reading.description,
                        location_name: reading.location_name,
                        weather_code: reading.weather_code,
                        response_time_ms: elapsed_ms,
                        attempts,
                    }
                }
                Err(err) => {
                    warn!(
                        provider = id.display_name(),
                        error = %err,
                        body = %truncate_body(&body.to_string()),
                        "Unexpected response shape"
                    );
                    ProviderResult::failure(id, format!("Invalid response format: {err}"), elapsed_ms, attempts)
                }
            }
        }
        FetchOutcome::Failure { reason, elapsed_ms, attempts } => {
            warn!(provider = id.display_name(), error = %reason, elapsed_ms, "Provider failed");
            ProviderResult::failure(id, reason, elapsed_ms, attempts)
        }
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{config::{RateLimitSettings, defaults_for, ProviderSettings}, http::RetryPolicy, rate_limit::RateLimiter};

    /// Client with roomy buckets and one quick retry.
    pub fn fast_http() -> Arc<HttpClient> {
        let limiter = RateLimiter::new(ProviderId::all().iter().map(|&id| {
            (id, RateLimitSettings { max_tokens: 100, refill_per_sec: 100.0 })
        }));
        let retry = RetryPolicy {
            max_retries: 1,
            base_delay_secs: 0.0,
            backoff_multiplier: 2.0,
            max_delay_secs: 0.0,
            jitter_factor: 0.0,
        };
        Arc::new(HttpClient::new(reqwest::Client::new(), limiter, retry))
    }

    /// Default settings for `id`, pointed at `url`.
    pub fn settings_for(id: ProviderId, url: &str) -> ProviderSettings {
        let mut settings = defaults_for(id);
        settings.base_url = url.to_string();
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_as_str_roundtrip() {
        for id in ProviderId::all() {
            let s = id.as_str();
            let parsed = ProviderId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn unknown_provider_error() {
        let err = ProviderId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn open_meteo_borrows_openweather_credential() {
        assert_eq!(ProviderId::OpenMeteo.credential(), ProviderId::OpenWeather);
        assert_eq!(ProviderId::WeatherApi.credential(), ProviderId::WeatherApi);
        assert_eq!(ProviderId::OpenMeteo.api_key_env(), None);
    }

    #[test]
    fn registry_covers_every_provider_in_order() {
        let cfg = Config::default();
        let http = Arc::new(HttpClient::from_config(&cfg).unwrap());
        let ids: Vec<_> = registry(&cfg, http).iter().map(|p| p.id()).collect();
        assert_eq!(ids, ProviderId::all());
    }

    #[test]
    fn normalize_maps_parse_errors_to_failure() {
        let outcome = FetchOutcome::Success { body: serde_json::json!({ "nope": 1 }), elapsed_ms: 12, attempts: 1 };
        let result = normalize(ProviderId::WeatherApi, outcome, |body| {
            #[derive(serde::Deserialize)]
            struct Shape {
                #[allow(dead_code)]
                temp: f64,
            }
            <Shape as serde::Deserialize>::deserialize(body).map(|_| Reading::default())
        });

        assert!(!result.is_success());
        assert_eq!(result.response_time_ms, 12);
        assert!(result.status.to_string().starts_with("failure - Invalid response format"));
    }

    #[test]
    fn normalize_passes_failures_through() {
        let outcome = FetchOutcome::Failure { reason: "Client error (HTTP 404)".into(), elapsed_ms: 5, attempts: 1 };
        let result = normalize(ProviderId::OpenWeather, outcome, |_| Ok(Reading::default()));
        assert_eq!(result.status, ProviderStatus::Failure("Client error (HTTP 404)".into()));
        assert_eq!(result.attempts, 1);
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let long = "é".repeat(300);
        let out = truncate_body(&long);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 203);
        assert_eq!(truncate_body("short"), "short");
    }
}
