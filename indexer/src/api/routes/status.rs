//! Operational status route.

use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;

use crate::api::server::AppState;
use crate::error::Result;
use crate::models::StatusResponse;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new().route("/status", get(status)).with_state(state)
}

/// Most recent error entries included in the status payload.
const RECENT_ERRORS: usize = 10;

#[axum::debug_handler]
async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>> {
    state.errors.prune();
    Ok(Json(StatusResponse {
        database: state.manager.status(),
        coordinator: state.coordinator.status(),
        errors: state.errors.stats(),
        recent_errors: state.errors.recent(RECENT_ERRORS),
    }))
}
