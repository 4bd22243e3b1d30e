//! Database schema definitions.
//!
//! All DDL is idempotent; `Database::migrate` runs every statement on
//! each start. Monetary values are TEXT columns holding canonical
//! decimal strings; arithmetic over them happens in the application.

pub const CREATE_BLOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    height INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    transaction_count INTEGER NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
"#;

pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    block_height INTEGER NOT NULL REFERENCES blocks(height) ON DELETE CASCADE,
    transaction_index INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_block_height ON transactions(block_height);
"#;

pub const CREATE_TRANSACTION_INPUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_inputs (
    transaction_id TEXT NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
    input_index INTEGER NOT NULL,
    utxo_tx_id TEXT NOT NULL,
    utxo_index INTEGER NOT NULL,
    PRIMARY KEY (transaction_id, input_index)
);

CREATE INDEX IF NOT EXISTS idx_tx_inputs_utxo ON transaction_inputs(utxo_tx_id, utxo_index);
"#;

pub const CREATE_TRANSACTION_OUTPUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_outputs (
    transaction_id TEXT NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
    output_index INTEGER NOT NULL,
    address TEXT NOT NULL,
    value TEXT NOT NULL,
    is_spent INTEGER NOT NULL DEFAULT 0,
    spent_by_tx_id TEXT,
    spent_at_height INTEGER,
    PRIMARY KEY (transaction_id, output_index)
);

CREATE INDEX IF NOT EXISTS idx_tx_outputs_address ON transaction_outputs(address);
CREATE INDEX IF NOT EXISTS idx_tx_outputs_is_spent ON transaction_outputs(is_spent);
"#;

pub const CREATE_BALANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    address TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    last_updated_height INTEGER NOT NULL,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Applied in dependency order by `Database::migrate`.
pub const ALL_TABLES: &[&str] = &[
    CREATE_BLOCKS_TABLE,
    CREATE_TRANSACTIONS_TABLE,
    CREATE_TRANSACTION_INPUTS_TABLE,
    CREATE_TRANSACTION_OUTPUTS_TABLE,
    CREATE_BALANCES_TABLE,
];

/// Relations that must exist for the manager to report a healthy
/// migration state.
pub const REQUIRED_TABLES: &[&str] = &[
    "blocks",
    "transactions",
    "transaction_inputs",
    "transaction_outputs",
    "balances",
];
