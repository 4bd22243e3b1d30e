//! UTXO persistence: creation, spending, restoration.

use ledger_core::{amount, TxInput, TxOutput};
use sqlx::SqliteConnection;

use crate::error::{IndexerError, Result};
use crate::models::{Utxo, UtxoRow};

const UTXO_COLUMNS: &str = "transaction_id, output_index, address, value, \
                            is_spent, spent_by_tx_id, spent_at_height";

pub struct UtxoRepository;

impl UtxoRepository {
    /// Inserts one unspent row per output, `output_index` sequential
    /// from 0.
    pub async fn save(
        conn: &mut SqliteConnection,
        outputs: &[TxOutput],
        tx_id: &str,
    ) -> Result<()> {
        for (output_index, output) in outputs.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO transaction_outputs
                    (transaction_id, output_index, address, value, is_spent)
                VALUES ($1, $2, $3, $4, 0)
                "#,
            )
            .bind(tx_id)
            .bind(output_index as i64)
            .bind(&output.address)
            .bind(amount::to_db_string(&output.value))
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Marks each referenced output spent by `spender_tx_id` at
    /// `height`. The update is guarded on `is_spent = 0`; touching an
    /// unknown or already-spent output is a business-logic failure,
    /// which doubles as the double-spend check.
    pub async fn spend(
        conn: &mut SqliteConnection,
        inputs: &[TxInput],
        spender_tx_id: &str,
        height: i64,
    ) -> Result<()> {
        for input in inputs {
            let result = sqlx::query(
                r#"
                UPDATE transaction_outputs
                SET is_spent = 1, spent_by_tx_id = $1, spent_at_height = $2
                WHERE transaction_id = $3 AND output_index = $4 AND is_spent = 0
                "#,
            )
            .bind(spender_tx_id)
            .bind(height)
            .bind(&input.tx_id)
            .bind(input.index as i64)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(IndexerError::BusinessLogic(format!(
                    "UTXO not found or already spent: {}:{}",
                    input.tx_id, input.index
                )));
            }
        }
        Ok(())
    }

    /// Point read.
    pub async fn get(
        conn: &mut SqliteConnection,
        tx_id: &str,
        output_index: u32,
    ) -> Result<Option<Utxo>> {
        let row: Option<UtxoRow> = sqlx::query_as(&format!(
            "SELECT {UTXO_COLUMNS} FROM transaction_outputs \
             WHERE transaction_id = $1 AND output_index = $2"
        ))
        .bind(tx_id)
        .bind(output_index as i64)
        .fetch_optional(conn)
        .await?;

        row.map(Utxo::try_from).transpose()
    }

    pub async fn list_unspent(conn: &mut SqliteConnection, address: &str) -> Result<Vec<Utxo>> {
        let rows: Vec<UtxoRow> = sqlx::query_as(&format!(
            "SELECT {UTXO_COLUMNS} FROM transaction_outputs \
             WHERE address = $1 AND is_spent = 0 \
             ORDER BY transaction_id, output_index"
        ))
        .bind(address)
        .fetch_all(conn)
        .await?;

        rows.into_iter().map(Utxo::try_from).collect()
    }

    /// Reverts the output set to `target`: outputs spent above the
    /// target become unspent again, outputs created above it are
    /// deleted.
    pub async fn rollback_after(conn: &mut SqliteConnection, target: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transaction_outputs
            SET is_spent = 0, spent_by_tx_id = NULL, spent_at_height = NULL
            WHERE spent_at_height > $1
            "#,
        )
        .bind(target)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM transaction_outputs
            WHERE transaction_id IN (SELECT id FROM transactions WHERE block_height > $1)
            "#,
        )
        .bind(target)
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::repository::BlockRepository;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn test_db(dir: &tempfile::TempDir) -> Database {
        let db = Database::connect(&dir.path().join("utxo.db"), 5, Duration::from_secs(2))
            .await
            .unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn outputs(pairs: &[(&str, &str)]) -> Vec<TxOutput> {
        pairs
            .iter()
            .map(|(address, value)| TxOutput {
                address: (*address).into(),
                value: value.parse().unwrap(),
            })
            .collect()
    }

    async fn seed_tx(conn: &mut SqliteConnection, tx_id: &str, height: i64) {
        if !BlockRepository::height_exists(&mut *conn, height).await.unwrap() {
            BlockRepository::insert_block(&mut *conn, height, &format!("{height:064}"), 1)
                .await
                .unwrap();
        }
        BlockRepository::insert_transaction(&mut *conn, tx_id, height, 0).await.unwrap();
    }

    #[tokio::test]
    async fn save_and_get() {
        let dir = tempdir().unwrap();
        let db = test_db(&dir).await;
        let mut conn = db.pool().acquire().await.unwrap();
        seed_tx(&mut conn, "tx1", 1).await;

        UtxoRepository::save(&mut conn, &outputs(&[("alice", "1000"), ("bob", "500")]), "tx1")
            .await
            .unwrap();

        let utxo = UtxoRepository::get(&mut conn, "tx1", 0).await.unwrap().unwrap();
        assert_eq!(utxo.address, "alice");
        assert_eq!(utxo.value, dec!(1000));
        assert!(!utxo.is_spent);

        let utxo = UtxoRepository::get(&mut conn, "tx1", 1).await.unwrap().unwrap();
        assert_eq!(utxo.address, "bob");

        assert!(UtxoRepository::get(&mut conn, "tx1", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn spend_marks_and_guards_double_spend() {
        let dir = tempdir().unwrap();
        let db = test_db(&dir).await;
        let mut conn = db.pool().acquire().await.unwrap();
        seed_tx(&mut conn, "tx1", 1).await;
        UtxoRepository::save(&mut conn, &outputs(&[("alice", "1000")]), "tx1").await.unwrap();

        let spend = [TxInput { tx_id: "tx1".into(), index: 0 }];
        UtxoRepository::spend(&mut conn, &spend, "tx2", 2).await.unwrap();

        let utxo = UtxoRepository::get(&mut conn, "tx1", 0).await.unwrap().unwrap();
        assert!(utxo.is_spent);
        assert_eq!(utxo.spent_by_tx_id.as_deref(), Some("tx2"));
        assert_eq!(utxo.spent_at_height, Some(2));

        // Second spend of the same output must fail.
        let err = UtxoRepository::spend(&mut conn, &spend, "tx3", 3).await.unwrap_err();
        assert!(err.to_string().contains("UTXO not found or already spent"));

        // So must a spend of a nonexistent output.
        let ghost = [TxInput { tx_id: "ghost".into(), index: 9 }];
        let err = UtxoRepository::spend(&mut conn, &ghost, "tx3", 3).await.unwrap_err();
        assert!(matches!(err, IndexerError::BusinessLogic(_)));
    }

    #[tokio::test]
    async fn list_unspent_is_ordered_and_filters_spent() {
        let dir = tempdir().unwrap();
        let db = test_db(&dir).await;
        let mut conn = db.pool().acquire().await.unwrap();
        seed_tx(&mut conn, "tx-b", 1).await;
        BlockRepository::insert_transaction(&mut conn, "tx-a", 1, 1).await.unwrap();

        UtxoRepository::save(&mut conn, &outputs(&[("alice", "1"), ("alice", "2")]), "tx-b")
            .await
            .unwrap();
        UtxoRepository::save(&mut conn, &outputs(&[("alice", "3")]), "tx-a").await.unwrap();

        UtxoRepository::spend(&mut conn, &[TxInput { tx_id: "tx-b".into(), index: 1 }], "s", 2)
            .await
            .unwrap();

        let unspent = UtxoRepository::list_unspent(&mut conn, "alice").await.unwrap();
        let keys: Vec<(String, u32)> =
            unspent.iter().map(|u| (u.tx_id.clone(), u.output_index)).collect();
        assert_eq!(keys, vec![("tx-a".into(), 0), ("tx-b".into(), 0)]);
    }

    #[tokio::test]
    async fn rollback_after_restores_and_deletes() {
        let dir = tempdir().unwrap();
        let db = test_db(&dir).await;
        let mut conn = db.pool().acquire().await.unwrap();

        // Height 1 creates tx1; height 2 spends it and creates tx2.
        seed_tx(&mut conn, "tx1", 1).await;
        UtxoRepository::save(&mut conn, &outputs(&[("alice", "1000")]), "tx1").await.unwrap();
        seed_tx(&mut conn, "tx2", 2).await;
        UtxoRepository::spend(&mut conn, &[TxInput { tx_id: "tx1".into(), index: 0 }], "tx2", 2)
            .await
            .unwrap();
        UtxoRepository::save(&mut conn, &outputs(&[("charlie", "1000")]), "tx2").await.unwrap();

        UtxoRepository::rollback_after(&mut conn, 1).await.unwrap();

        // tx1's output is unspent again, tx2's output is gone.
        let utxo = UtxoRepository::get(&mut conn, "tx1", 0).await.unwrap().unwrap();
        assert!(!utxo.is_spent);
        assert_eq!(utxo.spent_by_tx_id, None);
        assert_eq!(utxo.spent_at_height, None);
        assert!(UtxoRepository::get(&mut conn, "tx2", 0).await.unwrap().is_none());
    }
}
