use std::fmt;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;

/// Offset used for every timestamp the service emits (UTC+8).
const SERVICE_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// A validated location, either a free-text city name or a coordinate pair.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationQuery {
    City(String),
    Coordinates { lat: f64, lon: f64 },
}

impl LocationQuery {
    pub fn is_coordinates(&self) -> bool {
        matches!(self, LocationQuery::Coordinates { .. })
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match self {
            LocationQuery::Coordinates { lat, lon } => Some((*lat, *lon)),
            LocationQuery::City(_) => None,
        }
    }
}

impl fmt::Display for LocationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationQuery::City(name) => f.write_str(name),
            LocationQuery::Coordinates { lat, lon } => write!(f, "{lat},{lon}"),
        }
    }
}

/// Outcome of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStatus {
    Success,
    Failure(String),
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderStatus::Success => f.write_str("success"),
            ProviderStatus::Failure(reason) => write!(f, "failure - {reason}"),
        }
    }
}

/// Normalized per-provider result, produced by an adapter and consumed by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    pub provider: ProviderId,
    pub status: ProviderStatus,
    /// Degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity in percent; `None` when the provider doesn't report it.
    pub humidity: Option<f64>,
    pub description: Option<String>,
    /// Location name as resolved by the provider, when it reports one.
    pub location_name: Option<String>,
    /// Provider-specific condition code before normalization.
    pub weather_code: Option<i64>,
    pub response_time_ms: u64,
    pub attempts: u32,
}

impl ProviderResult {
    pub fn failure(
        provider: ProviderId,
        reason: impl Into<String>,
        response_time_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            provider,
            status: ProviderStatus::Failure(reason.into()),
            temperature: None,
            humidity: None,
            description: None,
            location_name: None,
            weather_code: None,
            response_time_ms,
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ProviderStatus::Success
    }

    pub fn source(&self) -> SourceRecord {
        SourceRecord {
            provider: self.provider.display_name().to_string(),
            status: self.status.to_string(),
            response_time_ms: self.response_time_ms,
        }
    }
}

/// Per-provider status entry included in every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub provider: String,
    pub status: String,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub value: Option<f64>,
    pub unit: String,
    pub method: String,
}

impl Temperature {
    pub fn median_celsius(value: Option<f64>) -> Self {
        Self {
            value,
            unit: "celsius".to_string(),
            method: "median".to_string(),
        }
    }
}

/// The response envelope returned to callers and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedWeather {
    pub location: String,
    pub temperature: Temperature,
    pub humidity: Option<f64>,
    pub conditions: String,
    pub sources: Vec<SourceRecord>,
    pub timestamp: DateTime<FixedOffset>,
}

/// Current time at the service's fixed UTC+8 offset.
pub fn service_timestamp() -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(SERVICE_UTC_OFFSET_SECS).unwrap_or(Utc.fix());
    Utc::now().with_timezone(&offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_status_renders_with_reason() {
        let result = ProviderResult::failure(ProviderId::WeatherApi, "Client error (HTTP 401)", 42, 1);
        let source = result.source();

        assert_eq!(source.provider, "WeatherAPI");
        assert_eq!(source.status, "failure - Client error (HTTP 401)");
        assert_eq!(source.response_time_ms, 42);
        assert!(!result.is_success());
    }

    #[test]
    fn timestamp_carries_plus_eight_offset() {
        let ts = service_timestamp();
        assert_eq!(ts.offset().local_minus_utc(), 8 * 3600);
        assert!(ts.to_rfc3339().ends_with("+08:00"));
    }

    #[test]
    fn envelope_serializes_expected_shape() {
        let envelope = AggregatedWeather {
            location: "Singapore".into(),
            temperature: Temperature::median_celsius(Some(28.8)),
            humidity: None,
            conditions: "Clear Sky".into(),
            sources: vec![SourceRecord {
                provider: "OpenMeteo".into(),
                status: "success".into(),
                response_time_ms: 120,
            }],
            timestamp: service_timestamp(),
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["temperature"]["unit"], "celsius");
        assert_eq!(json["temperature"]["method"], "median");
        assert!(json["humidity"].is_null());
        assert_eq!(json["sources"][0]["provider"], "OpenMeteo");
        assert!(json["timestamp"].as_str().unwrap().ends_with("+08:00"));
    }

    #[test]
    fn coordinates_display_as_pair() {
        let q = LocationQuery::Coordinates { lat: 1.29, lon: 103.85 };
        assert_eq!(q.to_string(), "1.29,103.85");
        assert!(q.is_coordinates());
        assert_eq!(LocationQuery::City("Paris".into()).coordinates(), None);
    }
}
