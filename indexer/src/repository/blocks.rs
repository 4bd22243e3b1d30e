//! Block and transaction row persistence.

use ledger_core::TxInput;
use sqlx::SqliteConnection;

use crate::error::Result;

pub struct BlockRepository;

impl BlockRepository {
    pub async fn insert_block(
        conn: &mut SqliteConnection,
        height: i64,
        id: &str,
        transaction_count: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blocks (height, id, transaction_count)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(height)
        .bind(id)
        .bind(transaction_count)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn insert_transaction(
        conn: &mut SqliteConnection,
        tx_id: &str,
        block_height: i64,
        transaction_index: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, block_height, transaction_index)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(tx_id)
        .bind(block_height)
        .bind(transaction_index)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn insert_inputs(
        conn: &mut SqliteConnection,
        tx_id: &str,
        inputs: &[TxInput],
    ) -> Result<()> {
        for (input_index, input) in inputs.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO transaction_inputs (transaction_id, input_index, utxo_tx_id, utxo_index)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(tx_id)
            .bind(input_index as i64)
            .bind(&input.tx_id)
            .bind(input.index as i64)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Current tip, 0 when the chain is empty.
    pub async fn max_height(conn: &mut SqliteConnection) -> Result<i64> {
        let height: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(height), 0) FROM blocks")
            .fetch_one(conn)
            .await?;
        Ok(height)
    }

    pub async fn height_exists(conn: &mut SqliteConnection, height: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE height = $1")
            .bind(height)
            .fetch_one(conn)
            .await?;
        Ok(count > 0)
    }

    pub async fn id_exists(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE id = $1")
            .bind(id)
            .fetch_one(conn)
            .await?;
        Ok(count > 0)
    }

    pub async fn transaction_exists(conn: &mut SqliteConnection, tx_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE id = $1")
            .bind(tx_id)
            .fetch_one(conn)
            .await?;
        Ok(count > 0)
    }

    /// Removes all forward state above `target`: inputs, then
    /// transactions, then blocks. The store's cascade contract would
    /// cover the children; the explicit dependency order keeps the
    /// operation self-contained.
    pub async fn delete_after(conn: &mut SqliteConnection, target: i64) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM transaction_inputs
            WHERE transaction_id IN (SELECT id FROM transactions WHERE block_height > $1)
            "#,
        )
        .bind(target)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM transactions WHERE block_height > $1")
            .bind(target)
            .execute(&mut *conn)
            .await?;

        sqlx::query("DELETE FROM blocks WHERE height > $1")
            .bind(target)
            .execute(conn)
            .await?;
        Ok(())
    }
}
