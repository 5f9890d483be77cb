//! City name to coordinates, through the OpenWeatherMap direct geocoding endpoint.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::{
    config::{OPENWEATHER_GEOCODING_URL, ProviderSettings},
    http::{FetchOutcome, HttpClient, ProviderRequest},
    provider::ProviderId,
};

/// Name geocoding calls are logged under.
pub const GEOCODING: &str = "Geocoding";

#[derive(Debug, Deserialize)]
struct GeoEntry {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geocoded {
    pub lat: f64,
    pub lon: f64,
    pub attempts: u32,
}

/// Why a city couldn't be resolved, plus what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeFailure {
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct Geocoder {
    url: String,
    settings: ProviderSettings,
    http: Arc<HttpClient>,
}

impl Geocoder {
    /// `settings` are OpenWeatherMap's: geocoding shares its bucket, timeouts and key.
    pub fn new(settings: ProviderSettings, http: Arc<HttpClient>) -> Self {
        let url = settings
            .geocoding_url
            .clone()
            .unwrap_or_else(|| OPENWEATHER_GEOCODING_URL.to_string());
        Self { url, settings, http }
    }

    pub async fn resolve(&self, city: &str, api_key: &str) -> Result<Geocoded, GeocodeFailure> {
        debug!(city, "Geocoding");

        let params = [
            ("q", city.to_string()),
            ("limit", "1".to_string()),
            ("appid", api_key.to_string()),
        ];
        let outcome = self
            .http
            .request(ProviderRequest {
                rate_identity: ProviderId::OpenWeather,
                name: GEOCODING,
                url: &self.url,
                params: &params,
                timeout: self.settings.timeouts.total,
            })
            .await;

        match outcome {
            FetchOutcome::Success { body, attempts, .. } => {
                let entries = Vec::<GeoEntry>::deserialize(&body).map_err(|err| GeocodeFailure {
                    reason: format!("Geocoding returned an invalid response: {err}"),
                    attempts,
                })?;

                match entries.first() {
                    Some(entry) => {
                        debug!(city, lat = entry.lat, lon = entry.lon, "Geocoded");
                        Ok(Geocoded { lat: entry.lat, lon: entry.lon, attempts })
                    }
                    None => Err(GeocodeFailure {
                        reason: format!("Geocoding found no match for '{city}'"),
                        attempts,
                    }),
                }
            }
            FetchOutcome::Failure { reason, attempts, .. } => Err(GeocodeFailure {
                reason: format!("Geocoding failed: {reason}"),
                attempts,
            }),
        }
    }
}
