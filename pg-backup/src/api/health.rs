//! Health check endpoint.

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

/// GET /health - Liveness plus the current backup outcome
pub async fn health(State(state): State<super::AppState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "backup_running": state.run_slot.is_running(),
        "last_status": snapshot.status,
        "last_size": snapshot.size,
    }))
}
