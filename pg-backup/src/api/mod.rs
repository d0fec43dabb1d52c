//! HTTP API module: the pull endpoint read by Prometheus.

pub mod health;
pub mod metrics;

use crate::metrics::OutcomeRegistry;
use crate::scheduler::run_slot::RunSlot;
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<OutcomeRegistry>,
    pub run_slot: RunSlot,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<OutcomeRegistry>, run_slot: RunSlot) -> Self {
        Self {
            registry,
            run_slot,
            started_at: Instant::now(),
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics::metrics))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
