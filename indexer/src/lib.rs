//! UTXO Ledger Indexer
//!
//! Ingests blocks in strict height order, maintains the unspent-output
//! set and derived per-address balances in a relational store, and
//! supports bounded rollback. The HTTP surface exposes block
//! submission, balance queries, rollback and operational status.

pub mod api;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod models;
pub mod processor;
pub mod repository;
pub mod retry;

pub use error::{IndexerError, Result};

// Type alias for the database pool
pub type DbPool = sqlx::SqlitePool;
