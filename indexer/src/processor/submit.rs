//! Block submission: validation and the commit plan.

use ledger_core::{validate, Block, ValidationError};
use rust_decimal::Decimal;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::classify::{handle_database_error, ErrorLog};
use crate::database::DatabaseManager;
use crate::error::{IndexerError, Result};
use crate::repository::{BalanceRepository, BlockRepository, UtxoRepository};

/// One submission attempt: a single scoped transaction around the
/// whole pipeline. Any failure inside rolls the transaction back and
/// is returned as a value.
pub(super) async fn process_block(
    manager: DatabaseManager,
    errors: Arc<ErrorLog>,
    block: Arc<Block>,
) -> Result<u64> {
    let db = manager.connection_with_retry().await?;
    let mut tx = db.begin().await?;

    match apply_block(&mut tx, &block).await {
        Ok(height) => {
            tx.commit().await?;
            info!(height, block_id = %block.id, "block committed");
            Ok(height)
        }
        Err(err) => Err(handle_database_error(err, tx, &errors, "processor:submit_block").await),
    }
}

async fn apply_block(tx: &mut Transaction<'static, Sqlite>, block: &Block) -> Result<u64> {
    let conn: &mut SqliteConnection = &mut **tx;
    let height = i64::try_from(block.height)
        .map_err(|_| IndexerError::Validation("Block height out of range".into()))?;

    // Uniqueness by height and by id.
    if BlockRepository::height_exists(&mut *conn, height).await?
        || BlockRepository::id_exists(&mut *conn, &block.id).await?
    {
        return Err(IndexerError::Duplicate(format!(
            "Block already processed: height {} (id {})",
            block.height, block.id
        )));
    }

    // Height must extend the chain by exactly one.
    let current_max = BlockRepository::max_height(&mut *conn).await? as u64;
    if !validate::height_is_next(block.height, current_max) {
        return Err(ValidationError::NonSequentialHeight {
            expected: current_max + 1,
            got: block.height,
        }
        .into());
    }

    // The submitted id must equal the content hash.
    let expected = block.expected_id();
    if block.id != expected {
        return Err(ValidationError::BlockIdMismatch { expected }.into());
    }

    // Conservation of value, transaction by transaction. The lookup
    // consults outputs created earlier in this very block before the
    // stored UTXO set.
    let mut created_in_block: HashMap<(String, u32), Decimal> = HashMap::new();
    for tx_data in &block.transactions {
        let mut stored: HashMap<(String, u32), Decimal> = HashMap::new();
        for input in &tx_data.inputs {
            let key = (input.tx_id.clone(), input.index);
            if created_in_block.contains_key(&key) || stored.contains_key(&key) {
                continue;
            }
            if let Some(utxo) = UtxoRepository::get(&mut *conn, &input.tx_id, input.index).await? {
                stored.insert(key, utxo.value);
            }
        }
        validate::transaction_balance(tx_data, |tx_id, index| {
            let key = (tx_id.to_string(), index);
            created_in_block.get(&key).or_else(|| stored.get(&key)).copied()
        })?;
        for (index, output) in tx_data.outputs.iter().enumerate() {
            created_in_block.insert((tx_data.id.clone(), index as u32), output.value);
        }
    }

    validate::block_structure(block)?;

    // Transaction ids are globally unique, not just within the block.
    for tx_data in &block.transactions {
        if BlockRepository::transaction_exists(&mut *conn, &tx_data.id).await? {
            return Err(IndexerError::Duplicate(format!(
                "Transaction already processed: {}",
                tx_data.id
            )));
        }
    }

    // Commit plan: rows first, then balance deltas in one batch.
    BlockRepository::insert_block(&mut *conn, height, &block.id, block.transactions.len() as i64)
        .await?;

    let mut deltas: BTreeMap<String, Decimal> = BTreeMap::new();
    for (index, tx_data) in block.transactions.iter().enumerate() {
        BlockRepository::insert_transaction(&mut *conn, &tx_data.id, height, index as i64).await?;
        BlockRepository::insert_inputs(&mut *conn, &tx_data.id, &tx_data.inputs).await?;

        // Pre-spend: debit each referenced output's owner.
        for input in &tx_data.inputs {
            let utxo = UtxoRepository::get(&mut *conn, &input.tx_id, input.index)
                .await?
                .ok_or_else(|| {
                    IndexerError::BusinessLogic(format!(
                        "UTXO not found or already spent: {}:{}",
                        input.tx_id, input.index
                    ))
                })?;
            *deltas.entry(utxo.address).or_insert(Decimal::ZERO) -= utxo.value;
        }
        UtxoRepository::spend(&mut *conn, &tx_data.inputs, &tx_data.id, height).await?;

        UtxoRepository::save(&mut *conn, &tx_data.outputs, &tx_data.id).await?;
        for output in &tx_data.outputs {
            *deltas.entry(output.address.clone()).or_insert(Decimal::ZERO) += output.value;
        }
    }

    // Resolve deltas against stored balances. A balance that would go
    // negative aborts the block; one that lands on zero is removed
    // rather than materialised.
    let mut upserts: Vec<(String, Decimal)> = Vec::new();
    for (address, delta) in deltas {
        if delta.is_zero() {
            continue;
        }
        let current = BalanceRepository::get(&mut *conn, &address).await?;
        let next = current + delta;
        if next < Decimal::ZERO {
            return Err(IndexerError::BusinessLogic(format!(
                "Negative balance for address {address}"
            )));
        }
        if next.is_zero() {
            BalanceRepository::delete(&mut *conn, &address).await?;
        } else {
            upserts.push((address, next));
        }
    }
    BalanceRepository::batch_upsert(&mut *conn, &upserts, height).await?;

    Ok(block.height)
}
