//! Balance query route.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::api::server::AppState;
use crate::error::{IndexerError, Result};
use crate::models::{AddressUtxosResponse, BalanceResponse};

/// Addresses accepted at the boundary: trimmed, non-empty, at most
/// 100 characters from `[A-Za-z0-9._-]`.
pub fn validate_address(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let ok = !trimmed.is_empty()
        && trimmed.len() <= 100
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    ok.then_some(trimmed)
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/balance/:address", get(get_balance))
        .route("/address/:address/utxos", get(get_unspent_outputs))
        .with_state(state)
}

#[axum::debug_handler]
async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<BalanceResponse>> {
    let address = validate_address(&address)
        .ok_or_else(|| IndexerError::Validation("Invalid address".into()))?;
    let balance = state.service.balance(address).await?;
    Ok(Json(BalanceResponse { address: address.to_string(), balance }))
}

#[axum::debug_handler]
async fn get_unspent_outputs(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<AddressUtxosResponse>> {
    let address = validate_address(&address)
        .ok_or_else(|| IndexerError::Validation("Invalid address".into()))?;
    let utxos = state.service.unspent_outputs(address).await?;
    Ok(Json(AddressUtxosResponse {
        address: address.to_string(),
        utxos: utxos.into_iter().map(Into::into).collect(),
    }))
}
