//! API server implementation.

use axum::{http::Method, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::routes;
use crate::classify::ErrorLog;
use crate::coordinator::Coordinator;
use crate::database::DatabaseManager;
use crate::error::Result;
use crate::processor::LedgerApi;

/// Shared handler state.
pub struct AppState {
    pub service: Arc<dyn LedgerApi>,
    pub manager: DatabaseManager,
    pub coordinator: Coordinator,
    pub errors: Arc<ErrorLog>,
}

pub struct ApiServer {
    state: Arc<AppState>,
    port: u16,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>, port: u16) -> Self {
        Self { state, port }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);

        Router::new()
            .merge(routes::blocks::routes(self.state.clone()))
            .merge(routes::balances::routes(self.state.clone()))
            .merge(routes::rollback::routes(self.state.clone()))
            .merge(routes::status::routes(self.state.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    pub async fn start(&self) -> Result<()> {
        let app = self.router();
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::IndexerError::Internal(format!("Failed to bind: {}", e)))?;

        tracing::info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::IndexerError::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}
