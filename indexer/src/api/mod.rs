//! HTTP API: thin handlers over the service interface.

pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
