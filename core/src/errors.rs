use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Block height must be exactly one above the current height (expected {expected}, got {got})")]
    NonSequentialHeight { expected: u64, got: u64 },

    #[error("Block id does not match block contents (expected {expected})")]
    BlockIdMismatch { expected: String },

    #[error("Block id must be a 64-character lowercase hex string")]
    MalformedBlockId,

    #[error("Transaction id must be a non-empty string")]
    EmptyTransactionId,

    #[error("Duplicate transaction id within block: {tx_id}")]
    DuplicateTransactionId { tx_id: String },

    #[error("Output value out of range in transaction {tx_id}")]
    ValueOutOfRange { tx_id: String },

    #[error("Negative output value in transaction {tx_id}")]
    NegativeValue { tx_id: String },

    #[error("Input refers to unknown UTXO {utxo_tx_id}:{utxo_index} in transaction {tx_id}")]
    UtxoMissing {
        tx_id: String,
        utxo_tx_id: String,
        utxo_index: u32,
    },

    #[error("Transaction {tx_id} does not conserve value (inputs {input_sum}, outputs {output_sum})")]
    UnbalancedTransaction {
        tx_id: String,
        input_sum: String,
        output_sum: String,
    },

    #[error("Coinbase transaction {tx_id} has a negative output sum")]
    NegativeCoinbase { tx_id: String },
}
