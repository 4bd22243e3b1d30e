//! Rollback: reverse state transitions to a target height.

use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::sync::Arc;
use tracing::info;

use crate::classify::{handle_database_error, ErrorLog};
use crate::database::DatabaseManager;
use crate::error::{IndexerError, Result};
use crate::processor::MAX_ROLLBACK_DEPTH;
use crate::repository::{BalanceRepository, BlockRepository, UtxoRepository};

/// One rollback attempt inside a single scoped transaction.
pub(super) async fn rollback_once(
    manager: DatabaseManager,
    errors: Arc<ErrorLog>,
    target: u64,
) -> Result<u64> {
    let db = manager.connection_with_retry().await?;
    let mut tx = db.begin().await?;

    match apply_rollback(&mut tx, target).await {
        Ok(new_height) => {
            tx.commit().await?;
            info!(new_height, "chain state reverted");
            Ok(new_height)
        }
        Err(err) => Err(handle_database_error(err, tx, &errors, "processor:rollback").await),
    }
}

async fn apply_rollback(tx: &mut Transaction<'static, Sqlite>, target: u64) -> Result<u64> {
    let conn: &mut SqliteConnection = &mut **tx;
    let target_height = i64::try_from(target)
        .map_err(|_| IndexerError::Validation("Rollback target out of range".into()))?;

    let current = BlockRepository::max_height(&mut *conn).await? as u64;
    if target > current {
        return Err(IndexerError::BusinessLogic(format!(
            "Rollback target {target} is greater than current height {current}"
        )));
    }
    if current - target > MAX_ROLLBACK_DEPTH {
        return Err(IndexerError::RollbackLimited(MAX_ROLLBACK_DEPTH));
    }
    if target == current {
        // No-op; the caller still commits.
        return Ok(current);
    }

    // Forward state first (inputs, transactions, blocks), then the
    // output set, then the balance rebuild. The rebuild is
    // authoritative; incremental deltas do not survive a rollback.
    BlockRepository::delete_after(&mut *conn, target_height).await?;
    UtxoRepository::rollback_after(&mut *conn, target_height).await?;
    BalanceRepository::recalculate_all(&mut *conn, target_height).await?;

    Ok(target)
}
