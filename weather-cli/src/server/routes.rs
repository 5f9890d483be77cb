//! API route handlers. All endpoints return JSON.

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use weather_core::{
    AggregatedWeather, CacheStats, ConfigSummary, Role, WeatherError, model::service_timestamp,
};

use super::AppState;

/// Failure responses, rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    NotAuthenticated,
    InvalidApiKey,
    AdminRequired,
    MissingLocation,
    Weather(WeatherError),
}

impl From<WeatherError> for ApiError {
    fn from(err: WeatherError) -> Self {
        ApiError::Weather(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "Not authenticated".to_string()),
            ApiError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "Invalid API key".to_string()),
            ApiError::AdminRequired => (StatusCode::FORBIDDEN, "Admin access required".to_string()),
            ApiError::MissingLocation => {
                (StatusCode::BAD_REQUEST, "Location parameter is required".to_string())
            }
            ApiError::Weather(err) if err.is_client_error() => (StatusCode::BAD_REQUEST, err.detail()),
            ApiError::Weather(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.detail()),
        };

        let mut response = (status, Json(json!({ "detail": detail }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Resolve the caller's role from the bearer token and check it against `required`.
fn authorize(state: &AppState, headers: &HeaderMap, required: Role) -> Result<Role, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::NotAuthenticated)?;

    let role = *state.api_keys.get(token).ok_or_else(|| {
        warn!("Rejected request with unknown API key");
        ApiError::InvalidApiKey
    })?;

    if required == Role::Admin && role != Role::Admin {
        return Err(ApiError::AdminRequired);
    }
    Ok(role)
}

#[derive(Debug, Deserialize)]
pub struct WeatherParams {
    pub location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub message: &'static str,
    pub timestamp: String,
    pub operation: &'static str,
}

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "weather-aggregator",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// GET /api/v1/weather?location=...
pub async fn get_weather(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WeatherParams>,
) -> Result<Json<AggregatedWeather>, ApiError> {
    let role = authorize(&state, &headers, Role::Normal)?;

    let location = params
        .location
        .filter(|l| !l.trim().is_empty())
        .ok_or(ApiError::MissingLocation)?;

    info!(location = %location, role = ?role, "Weather requested");
    let weather = state.aggregator.aggregate(&location).await?;
    Ok(Json(weather))
}

/// GET /api/v1/config
pub async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConfigSummary>, ApiError> {
    authorize(&state, &headers, Role::Admin)?;
    Ok(Json(state.summary.clone()))
}

/// DELETE /api/v1/cache
pub async fn clear_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CacheClearResponse>, ApiError> {
    authorize(&state, &headers, Role::Admin)?;

    let removed = state.aggregator.cache().clear();
    info!(removed, "Cache cleared by admin");

    Ok(Json(CacheClearResponse {
        message: "Cache cleared successfully",
        timestamp: service_timestamp().to_rfc3339(),
        operation: "cache_clear",
    }))
}

/// GET /api/v1/cache/stats
pub async fn cache_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CacheStats>, ApiError> {
    authorize(&state, &headers, Role::Admin)?;
    Ok(Json(state.aggregator.cache().stats()))
}
