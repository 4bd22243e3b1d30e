//! Data models: persisted rows and API payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, Result};

/// Raw `transaction_outputs` row; `value` stays a string until parsed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UtxoRow {
    pub transaction_id: String,
    pub output_index: i64,
    pub address: String,
    pub value: String,
    pub is_spent: bool,
    pub spent_by_tx_id: Option<String>,
    pub spent_at_height: Option<i64>,
}

/// An unspent (or spent) output with its value decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Utxo {
    pub tx_id: String,
    pub output_index: u32,
    pub address: String,
    pub value: Decimal,
    pub is_spent: bool,
    pub spent_by_tx_id: Option<String>,
    pub spent_at_height: Option<i64>,
}

impl TryFrom<UtxoRow> for Utxo {
    type Error = IndexerError;

    fn try_from(row: UtxoRow) -> Result<Utxo> {
        let value = ledger_core::amount::from_db_str(&row.value).map_err(|e| {
            IndexerError::Internal(format!(
                "stored value for {}:{} is not a decimal: {e}",
                row.transaction_id, row.output_index
            ))
        })?;
        Ok(Utxo {
            tx_id: row.transaction_id,
            output_index: row.output_index as u32,
            address: row.address,
            value,
            is_spent: row.is_spent,
            spent_by_tx_id: row.spent_by_tx_id,
            spent_at_height: row.spent_at_height,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBlockResponse {
    pub success: bool,
    pub block_height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub address: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoResponse {
    pub tx_id: String,
    pub output_index: u32,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub value: Decimal,
}

impl From<Utxo> for UtxoResponse {
    fn from(utxo: Utxo) -> Self {
        Self { tx_id: utxo.tx_id, output_index: utxo.output_index, value: utxo.value }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUtxosResponse {
    pub address: String,
    pub utxos: Vec<UtxoResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResponse {
    pub success: bool,
    pub new_height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub database: crate::database::DatabaseStatus,
    pub coordinator: crate::coordinator::CoordinatorStatus,
    pub errors: crate::classify::ErrorStats,
    pub recent_errors: Vec<crate::classify::StructuredError>,
}
