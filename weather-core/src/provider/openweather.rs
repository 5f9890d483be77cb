use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    LocationQuery, ProviderResult,
    conditions,
    config::ProviderSettings,
    http::{HttpClient, ProviderRequest},
    provider::{ProviderId, Reading, WeatherProvider, normalize},
};

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    settings: ProviderSettings,
    http: Arc<HttpClient>,
}

impl OpenWeatherProvider {
    pub fn new(settings: ProviderSettings, http: Arc<HttpClient>) -> Self {
        Self { settings, http }
    }

    fn params(location: &LocationQuery, api_key: &str) -> Vec<(&'static str, String)> {
        let mut params = match location {
            LocationQuery::Coordinates { lat, lon } => {
                vec![("lat", lat.to_string()), ("lon", lon.to_string())]
            }
            LocationQuery::City(name) => vec![("q", name.clone())],
        };
        params.push(("appid", api_key.to_string()));
        params.push(("units", "metric".to_string()));
        params
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    id: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: Option<String>,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
}

fn parse(body: &Value) -> Result<Reading, serde_json::Error> {
    let parsed = OwCurrentResponse::deserialize(body)?;
    let weather = parsed.weather.first();
    let code = weather.and_then(|w| w.id);
    let fallback = weather.and_then(|w| w.description.as_deref());

    Ok(Reading {
        temperature: parsed.main.temp,
        humidity: parsed.main.humidity,
        description: conditions::describe(ProviderId::OpenWeather, code, fallback),
        location_name: parsed.name.filter(|n| !n.is_empty()),
        weather_code: code,
    })
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    async fn fetch(&self, location: &LocationQuery, api_key: &str) -> ProviderResult {
        let params = Self::params(location, api_key);
        let outcome = self
            .http
            .request(ProviderRequest {
                rate_identity: ProviderId::OpenWeather,
                name: ProviderId::OpenWeather.display_name(),
                url: &self.settings.base_url,
                params: &params,
                timeout: self.settings.timeouts.total,
            })
            .await;

        normalize(ProviderId::OpenWeather, outcome, parse)
    }
}
