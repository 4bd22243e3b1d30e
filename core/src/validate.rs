//! Pure validation rules.
//!
//! Everything here is synchronous and side-effect free. Where a rule
//! needs external state (the value of a referenced output) the caller
//! passes a lookup closure; a `None` from the lookup means the output
//! does not exist.

use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::amount;
use crate::block::{Block, Transaction};
use crate::errors::ValidationError;

/// True iff `incoming` is the only height the chain will accept next.
pub fn height_is_next(incoming: u64, current_max: u64) -> bool {
    (current_max == 0 && incoming == 1)
        || (current_max >= 1 && current_max.checked_add(1) == Some(incoming))
}

/// Conservation-of-value check for a single transaction.
///
/// Coinbase transactions (no inputs) only require a non-negative output
/// sum. All other transactions must resolve every input through
/// `lookup` and have input and output sums exactly equal.
pub fn transaction_balance<F>(tx: &Transaction, mut lookup: F) -> Result<(), ValidationError>
where
    F: FnMut(&str, u32) -> Option<Decimal>,
{
    let output_sum = tx.output_sum();

    if tx.is_coinbase() {
        if output_sum.is_sign_negative() && !output_sum.is_zero() {
            return Err(ValidationError::NegativeCoinbase { tx_id: tx.id.clone() });
        }
        return Ok(());
    }

    let mut input_sum = Decimal::ZERO;
    for input in &tx.inputs {
        match lookup(&input.tx_id, input.index) {
            Some(value) => input_sum += value,
            None => {
                return Err(ValidationError::UtxoMissing {
                    tx_id: tx.id.clone(),
                    utxo_tx_id: input.tx_id.clone(),
                    utxo_index: input.index,
                })
            }
        }
    }

    if input_sum != output_sum {
        return Err(ValidationError::UnbalancedTransaction {
            tx_id: tx.id.clone(),
            input_sum: input_sum.normalize().to_string(),
            output_sum: output_sum.normalize().to_string(),
        });
    }
    Ok(())
}

/// Structural checks over a submitted block: id shape, transaction id
/// uniqueness and non-emptiness, output values inside the fixed-point
/// envelope.
pub fn block_structure(block: &Block) -> Result<(), ValidationError> {
    if block.id.len() != 64
        || !block.id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
    {
        return Err(ValidationError::MalformedBlockId);
    }

    let mut seen = HashSet::new();
    for tx in &block.transactions {
        if tx.id.trim().is_empty() {
            return Err(ValidationError::EmptyTransactionId);
        }
        if !seen.insert(tx.id.as_str()) {
            return Err(ValidationError::DuplicateTransactionId { tx_id: tx.id.clone() });
        }
        for output in &tx.outputs {
            if output.value.is_sign_negative() && !output.value.is_zero() {
                return Err(ValidationError::NegativeValue { tx_id: tx.id.clone() });
            }
            if !amount::in_range(&output.value) {
                return Err(ValidationError::ValueOutOfRange { tx_id: tx.id.clone() });
            }
        }
    }
    Ok(())
}
