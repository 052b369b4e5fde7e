//! HTTP ingestion endpoint for application metrics payloads.

use crate::core::CollectorError;
use crate::metrics::MetricsCollector;
use crate::receiver::payload;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

/// Path payloads are posted to.
pub const INGEST_PATH: &str = "/collector/metrics";

/// Create the router for the ingestion endpoint alone.
pub fn create_ingest_router(collector: MetricsCollector) -> Router {
    Router::new()
        .route(INGEST_PATH, post(handle_ingest))
        .with_state(collector)
}

/// Handle one posted metrics payload.
pub async fn handle_ingest(
    State(collector): State<MetricsCollector>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<StatusCode, HttpError> {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    tracing::debug!(bytes = body.len(), content_type, "Received metrics payload");

    let sample = payload::decode(&body, content_type)?;
    collector.ingest(sample)?;

    Ok(StatusCode::ACCEPTED)
}

/// HTTP-specific error type.
#[derive(Debug)]
pub enum HttpError {
    /// The payload could not be decoded (400).
    BadRequest(String),
    /// The payload decoded to an unusable sample (422).
    Unprocessable(String),
    /// The collector failed (500).
    Internal(String),
}

impl HttpError {
    fn status(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CollectorError> for HttpError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Parse { .. } | CollectorError::Serialization(_) => HttpError::BadRequest(err.to_string()),
            CollectorError::InvalidSample { .. } => HttpError::Unprocessable(err.to_string()),
            other => HttpError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (HttpError::BadRequest(message) | HttpError::Unprocessable(message) | HttpError::Internal(message)) =
            self;

        let body = Json(serde_json::json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            HttpError::Unprocessable(msg) => write!(f, "Unprocessable: {msg}"),
            HttpError::Internal(msg) => write!(f, "Internal Error: {msg}"),
        }
    }
}

impl std::error::Error for HttpError {}
