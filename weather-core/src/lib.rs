//! Core library for the `weather` aggregation service.
//!
//! This crate defines:
//! - Location input validation
//! - Per-provider token-bucket rate limiting and a retrying HTTP client
//! - Adapters for OpenWeatherMap, WeatherAPI and Open-Meteo
//! - The aggregation engine and its response cache
//! - Configuration & credentials handling
//!
//! It is used by `weather-cli`, which also hosts the REST API.

pub mod aggregate;
pub mod cache;
pub mod conditions;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod provider;
pub mod rate_limit;
pub mod validate;

pub use aggregate::{Aggregator, Credentials};
pub use cache::{CacheStats, ResponseCache};
pub use config::{Config, ConfigSummary, ProviderConfig, Role};
pub use error::{Result, WeatherError};
pub use model::{AggregatedWeather, LocationQuery, ProviderResult, ProviderStatus, SourceRecord};
pub use provider::{ProviderId, WeatherProvider};
pub use validate::validate_location;
