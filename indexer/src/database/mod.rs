//! Database module: schema, pooled connection, lifecycle manager.

pub mod connection;
pub mod manager;
pub mod schema;

pub use connection::Database;
pub use manager::{DatabaseManager, DatabaseManagerConfig, DatabaseStatus, MigrationState};
