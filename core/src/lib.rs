//! Core domain types and consensus rules for the UTXO ledger.
//!
//! This crate is pure: wire types, fixed-point amount handling, the
//! block content hash, and the validation rules. It performs no I/O;
//! callers provide lookups (e.g. referenced output values) as closures.

pub mod amount;
pub mod block;
pub mod errors;
pub mod hashing;
pub mod validate;

pub use block::{Block, Transaction, TxInput, TxOutput};
pub use errors::ValidationError;
