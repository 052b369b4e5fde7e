//! HTTP API for querying collected metrics.
//!
//! Endpoints:
//! - `GET /collector/metrics?name=a,b` fresh stream projection with rates
//! - `GET /collector/metrics/streams?name=a,b` materialized stream cache
//! - `POST /collector/metrics` ingest one metrics payload
//! - `GET /health` status and cache statistics

use crate::core::config::ServerConfig;
use crate::core::{CollectorError, Result};
use crate::metrics::{MetricsCollector, Stream};
use crate::receiver::http::{handle_ingest, HttpError};
use crate::receiver::INGEST_PATH;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Path of the materialized stream view.
pub const STREAMS_PATH: &str = "/collector/metrics/streams";

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    entry_count: usize,
    hit_count: u64,
    miss_count: u64,
    hit_rate: f64,
    miss_rate: f64,
    eviction_count: u64,
    invalidation_count: u64,
    rejected_count: u64,
}

/// Query parameters for stream listings.
#[derive(Debug, Deserialize)]
struct StreamQuery {
    /// Comma-separated stream names
    name: Option<String>,
}

/// Builds the API router.
pub fn create_router(collector: MetricsCollector, enable_cors: bool) -> Router {
    let app = Router::new()
        .route(INGEST_PATH, get(metrics_handler).post(handle_ingest))
        .route(STREAMS_PATH, get(streams_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(collector);

    if enable_cors {
        app.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
    } else {
        app
    }
}

/// Start the API server and serve until the future is dropped.
pub async fn start_server(collector: MetricsCollector, config: &ServerConfig) -> Result<()> {
    let app = create_router(collector, config.enable_cors);

    let addr = SocketAddr::new(config.bind_address, config.port);
    tracing::info!("Starting API server on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| CollectorError::network(format!("Failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| CollectorError::network(format!("API server error: {e}")))?;

    Ok(())
}

/// GET /collector/metrics - Stream projection with derived rates
async fn metrics_handler(
    State(collector): State<MetricsCollector>,
    Query(params): Query<StreamQuery>,
) -> std::result::Result<Json<Vec<Stream>>, HttpError> {
    let streams = collector.query(params.name.as_deref()).map_err(|e| {
        tracing::error!(error = %e, "Failed to project streams");
        HttpError::from(e)
    })?;
    Ok(Json(streams))
}

/// GET /collector/metrics/streams - Materialized stream cache
async fn streams_handler(
    State(collector): State<MetricsCollector>,
    Query(params): Query<StreamQuery>,
) -> Json<Vec<Stream>> {
    Json(collector.materialized_view(params.name.as_deref()))
}

/// GET /health - Collector status and cache statistics
async fn health_handler(State(collector): State<MetricsCollector>) -> impl IntoResponse {
    let stats = collector.stats();

    Json(HealthResponse {
        status: "UP",
        version: env!("CARGO_PKG_VERSION"),
        entry_count: stats.entry_count,
        hit_count: stats.hit_count,
        miss_count: stats.miss_count,
        hit_rate: stats.hit_rate(),
        miss_rate: stats.miss_rate(),
        eviction_count: stats.eviction_count,
        invalidation_count: stats.invalidation_count,
        rejected_count: stats.rejected_count,
    })
}
