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
pub struct WeatherApiProvider {
    settings: ProviderSettings,
    http: Arc<HttpClient>,
}

impl WeatherApiProvider {
    pub fn new(settings: ProviderSettings, http: Arc<HttpClient>) -> Self {
        Self { settings, http }
    }
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    code: Option<i64>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    humidity: Option<f64>,
    condition: Option<WaCondition>,
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: Option<WaLocation>,
    current: WaCurrent,
}

fn parse(body: &Value) -> Result<Reading, serde_json::Error> {
    let parsed = WaResponse::deserialize(body)?;
    let condition = parsed.current.condition.as_ref();
    let code = condition.and_then(|c| c.code);
    let fallback = condition.and_then(|c| c.text.as_deref());

    Ok(Reading {
        temperature: parsed.current.temp_c,
        humidity: parsed.current.humidity,
        description: conditions::describe(ProviderId::WeatherApi, code, fallback),
        location_name: parsed.location.and_then(|l| l.name),
        weather_code: code,
    })
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::WeatherApi
    }

    /// WeatherAPI takes cities and `lat,lon` pairs in the same `q` parameter.
    async fn fetch(&self, location: &LocationQuery, api_key: &str) -> ProviderResult {
        let params = [("key", api_key.to_string()), ("q", location.to_string())];
        let outcome = self
            .http
            .request(ProviderRequest {
                rate_identity: ProviderId::WeatherApi,
                name: ProviderId::WeatherApi.display_name(),
                url: &self.settings.base_url,
                params: &params,
                timeout: self.settings.timeouts.total,
            })
            .await;

        normalize(ProviderId::WeatherApi, outcome, parse)
    }
}
