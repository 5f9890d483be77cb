//! REST API over the aggregation engine.
//!
//! Every `/api/v1` route requires `Authorization: Bearer <token>`; config and
//! cache routes additionally require the admin role.

pub mod routes;

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use axum::{
    Router,
    http::{Method, header},
    routing::{delete, get},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use weather_core::{Aggregator, Config, ConfigSummary, Role};

/// Shared state accessible by all route handlers.
#[derive(Debug)]
pub struct ServerState {
    pub aggregator: Aggregator,
    pub api_keys: HashMap<String, Role>,
    pub summary: ConfigSummary,
}

impl ServerState {
    pub fn new(aggregator: Aggregator, config: &Config) -> Self {
        Self {
            aggregator,
            api_keys: config.server.api_keys.clone(),
            summary: config.summary(),
        }
    }
}

pub type AppState = Arc<ServerState>;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/api/v1/weather", get(routes::get_weather))
        .route("/api/v1/config", get(routes::get_config))
        .route("/api/v1/cache", delete(routes::clear_cache))
        .route("/api/v1/cache/stats", get(routes::cache_stats))
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "Weather API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Weather API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
}
