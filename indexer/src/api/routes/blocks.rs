//! Block submission route.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use ledger_core::Block;
use std::sync::Arc;

use crate::api::server::AppState;
use crate::error::{IndexerError, Result};
use crate::models::SubmitBlockResponse;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new().route("/blocks", post(submit_block)).with_state(state)
}

#[axum::debug_handler]
async fn submit_block(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Block>, JsonRejection>,
) -> Result<Json<SubmitBlockResponse>> {
    // Any structural deviation from the wire format is a 400, not the
    // extractor's default 422.
    let Json(block) = payload
        .map_err(|rejection| IndexerError::Validation(format!("Invalid block payload: {rejection}")))?;

    let block_height = state.service.submit_block(block).await?;
    Ok(Json(SubmitBlockResponse {
        success: true,
        block_height,
        message: Some(format!("Block {block_height} accepted")),
    }))
}
