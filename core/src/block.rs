//! Wire-level block structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::hashing;

/// A block as submitted to the indexer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position in the chain; the first block has height 1.
    pub height: u64,
    /// Content hash of the block, 64 lowercase hex characters.
    pub id: String,
    /// Transactions in application order.
    pub transactions: Vec<Transaction>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// Reference to an output of a previous transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub tx_id: String,
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    pub address: String,
    /// Amount assigned to `address`. Parsed exactly from the JSON
    /// number token; never routed through binary floats.
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub value: Decimal,
}

impl Block {
    pub fn new(height: u64, id: String, transactions: Vec<Transaction>) -> Self {
        Self { height, id, transactions }
    }

    /// The id this block must carry for its contents.
    pub fn expected_id(&self) -> String {
        hashing::block_id(self.height, self.transactions.iter().map(|tx| tx.id.as_str()))
    }
}

impl Transaction {
    /// A coinbase transaction mints value: it has no inputs.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn output_sum(&self) -> Decimal {
        self.outputs.iter().map(|out| out.value).sum()
    }
}
