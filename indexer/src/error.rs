//! Error types for the indexer service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ledger_core::ValidationError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    /// Malformed block, transaction, or address.
    #[error("{0}")]
    Validation(String),

    /// Height sequence, content hash, value conservation, spend rules.
    #[error("{0}")]
    BusinessLogic(String),

    /// Block with this height or id was already processed.
    #[error("{0}")]
    Duplicate(String),

    /// Rollback window exceeded.
    #[error("rollback limited to {0} blocks")]
    RollbackLimited(u64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No healthy pool is available right now.
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Concurrency(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Balance reads are rejected while a rollback holds the ledger.
    #[error("{0}")]
    Busy(String),

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, IndexerError>;

impl From<ValidationError> for IndexerError {
    fn from(err: ValidationError) -> Self {
        match err {
            // Shape problems in the submitted payload.
            ValidationError::MalformedBlockId
            | ValidationError::EmptyTransactionId
            | ValidationError::DuplicateTransactionId { .. }
            | ValidationError::NegativeValue { .. }
            | ValidationError::ValueOutOfRange { .. } => IndexerError::Validation(err.to_string()),
            // Rule violations over well-formed payloads.
            ValidationError::NonSequentialHeight { .. }
            | ValidationError::BlockIdMismatch { .. }
            | ValidationError::UtxoMissing { .. }
            | ValidationError::UnbalancedTransaction { .. }
            | ValidationError::NegativeCoinbase { .. } => IndexerError::BusinessLogic(err.to_string()),
        }
    }
}

impl IndexerError {
    /// Stable machine-visible label, also used as the `error` field of
    /// HTTP error bodies.
    pub fn label(&self) -> &'static str {
        match self {
            IndexerError::Validation(_) => "validation",
            IndexerError::BusinessLogic(_) => "business_logic",
            IndexerError::Duplicate(_) => "duplicate",
            IndexerError::RollbackLimited(_) => "rollback_limited",
            IndexerError::Database(_) => "database",
            IndexerError::Unavailable(_) => "unavailable",
            IndexerError::Concurrency(_) => "concurrency",
            IndexerError::Network(_) => "network",
            IndexerError::Busy(_) => "busy",
            IndexerError::ShuttingDown => "shutting_down",
            IndexerError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IndexerError::Validation(_) | IndexerError::BusinessLogic(_) => StatusCode::BAD_REQUEST,
            IndexerError::Duplicate(_) | IndexerError::RollbackLimited(_) => StatusCode::CONFLICT,
            IndexerError::Database(_)
            | IndexerError::Concurrency(_)
            | IndexerError::Network(_)
            | IndexerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IndexerError::Unavailable(_) | IndexerError::Busy(_) | IndexerError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for IndexerError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.label(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}
