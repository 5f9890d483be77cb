use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

use crate::{
    LocationQuery, ProviderResult,
    conditions,
    config::ProviderSettings,
    http::{FetchOutcome, HttpClient, ProviderRequest},
    provider::{ProviderId, Reading, WeatherProvider, geocode::Geocoder, normalize},
};

/// Open-Meteo only takes coordinates; city names are geocoded first.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    settings: ProviderSettings,
    geocoder: Geocoder,
    http: Arc<HttpClient>,
}

impl OpenMeteoProvider {
    /// `geocoding` is OpenWeatherMap's resolved settings.
    pub fn new(settings: ProviderSettings, geocoding: ProviderSettings, http: Arc<HttpClient>) -> Self {
        Self {
            settings,
            geocoder: Geocoder::new(geocoding, http.clone()),
            http,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OmCurrentWeather {
    temperature: f64,
    weathercode: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    current_weather: OmCurrentWeather,
}

fn parse(body: &Value) -> Result<Reading, serde_json::Error> {
    let parsed = OmResponse::deserialize(body)?;
    let code = parsed.current_weather.weathercode;
    let fallback = code.map(|c| format!("Weather code {c}"));

    Ok(Reading {
        temperature: parsed.current_weather.temperature,
        // `current_weather` carries no humidity.
        humidity: None,
        description: conditions::describe(ProviderId::OpenMeteo, code, fallback.as_deref()),
        location_name: None,
        weather_code: code,
    })
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenMeteo
    }

    /// `api_key` is the OpenWeatherMap key, only used to geocode city names.
    async fn fetch(&self, location: &LocationQuery, api_key: &str) -> ProviderResult {
        let started = Instant::now();

        let (lat, lon, geocode_attempts) = match location {
            LocationQuery::Coordinates { lat, lon } => (*lat, *lon, 0),
            LocationQuery::City(name) => match self.geocoder.resolve(name, api_key).await {
                Ok(found) => (found.lat, found.lon, found.attempts),
                Err(failure) => {
                    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    warn!(provider = ProviderId::OpenMeteo.display_name(), error = %failure.reason, "Location could not be geocoded");
                    return ProviderResult::failure(ProviderId::OpenMeteo, failure.reason, elapsed_ms, failure.attempts);
                }
            },
        };

        let params = [
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("current_weather", "true".to_string()),
        ];
        let outcome = self
            .http
            .request(ProviderRequest {
                rate_identity: ProviderId::OpenMeteo,
                name: ProviderId::OpenMeteo.display_name(),
                url: &self.settings.base_url,
                params: &params,
                timeout: self.settings.timeouts.total,
            })
            .await;

        // Report time spent geocoding as part of this provider's response time.
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = match outcome {
            FetchOutcome::Success { body, attempts, .. } => FetchOutcome::Success {
                body,
                elapsed_ms,
                attempts: attempts + geocode_attempts,
            },
            FetchOutcome::Failure { reason, attempts, .. } => FetchOutcome::Failure {
                reason,
                elapsed_ms,
                attempts: attempts + geocode_attempts,
            },
        };

        normalize(ProviderId::OpenMeteo, outcome, parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::test_support::{fast_http, settings_for};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenMeteoProvider {
        let settings = settings_for(ProviderId::OpenMeteo, &format!("{}/v1/forecast", server.uri()));
        let mut geocoding = settings_for(ProviderId::OpenWeather, "http://unused.invalid");
        geocoding.geocoding_url = Some(format!("{}/geo/1.0/direct", server.uri()));
        OpenMeteoProvider::new(settings, geocoding, fast_http())
    }

    async fn mount_forecast(server: &MockServer, lat: &str, lon: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("latitude", lat))
            .and(query_param("longitude", lon))
            .and(query_param("current_weather", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn coordinates_skip_geocoding() {
        let server = MockServer::start().await;
        mount_forecast(
            &server,
            "1.29",
            "103.85",
            json!({ "current_weather": { "temperature": 28.8, "weathercode": 3 } }),
        )
        .await;
        Mock::given(path("/geo/1.0/direct"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let location = LocationQuery::Coordinates { lat: 1.29, lon: 103.85 };
        let result = provider(&server).fetch(&location, "").await;

        assert!(result.is_success(), "{:?}", result.status);
        assert_eq!(result.temperature, Some(28.8));
        assert_eq!(result.humidity, None);
        assert_eq!(result.description.as_deref(), Some("Overcast"));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn city_is_geocoded_with_openweather_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geo/1.0/direct"))
            .and(query_param("appid", "OW_KEY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "lat": 1.29, "lon": 103.85 }])))
            .expect(1)
            .mount(&server)
            .await;
        mount_forecast(
            &server,
            "1.29",
            "103.85",
            json!({ "current_weather": { "temperature": 28.8, "weathercode": 42 } }),
        )
        .await;

        let result = provider(&server).fetch(&LocationQuery::City("Singapore".into()), "OW_KEY").await;

        assert!(result.is_success(), "{:?}", result.status);
        assert_eq!(result.description.as_deref(), Some("Weather code 42"));
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn geocoding_miss_becomes_open_meteo_failure() {
        let server = MockServer::start().await;
        Mock::given(path("/geo/1.0/direct"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = provider(&server).fetch(&LocationQuery::City("Nowhere".into()), "OW_KEY").await;

        let source = result.source();
        assert_eq!(source.provider, "OpenMeteo");
        assert!(source.status.starts_with("failure - Geocoding"));
    }
}
