//! Prometheus scrape endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use prometheus::{Encoder, TextEncoder};

/// GET /metrics - Current backup size and status in text exposition format
pub async fn metrics(State(state): State<super::AppState>) -> Result<impl IntoResponse, StatusCode> {
    let body = state.registry.encode().map_err(|e| {
        tracing::error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
        body,
    ))
}
