//! Rollback route.

use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::server::AppState;
use crate::error::{IndexerError, Result};
use crate::models::RollbackResponse;

#[derive(Deserialize)]
struct RollbackParams {
    height: Option<String>,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new().route("/rollback", post(rollback)).with_state(state)
}

/// Parses the target height strictly: present, an integer (no floats),
/// non-negative.
fn parse_target(params: &RollbackParams) -> Result<u64> {
    let raw = params
        .height
        .as_deref()
        .ok_or_else(|| IndexerError::Validation("height query parameter is required".into()))?;
    let target: i64 = raw
        .trim()
        .parse()
        .map_err(|_| IndexerError::Validation("height must be an integer".into()))?;
    if target < 0 {
        return Err(IndexerError::Validation("height must not be negative".into()));
    }
    Ok(target as u64)
}

#[axum::debug_handler]
async fn rollback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RollbackParams>,
) -> Result<Json<RollbackResponse>> {
    let target = parse_target(&params)?;
    let new_height = state.service.rollback_to_height(target).await?;
    Ok(Json(RollbackResponse {
        success: true,
        new_height,
        message: Some(format!("Chain rolled back to height {new_height}")),
    }))
}
