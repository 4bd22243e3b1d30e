//! Address balance persistence.
//!
//! Balances are a derived view over unspent outputs. Zero balances are
//! never materialised; deleting the row and writing zero are the same
//! thing to readers. Aggregation happens in application code with
//! exact decimal arithmetic, since the TEXT value columns would coerce
//! to binary floats under SQL SUM.

use ledger_core::amount;
use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::BTreeMap;

use crate::error::{IndexerError, Result};

/// Rows per multi-row upsert statement, kept under SQLite's bind
/// parameter limit.
const UPSERT_CHUNK: usize = 300;

pub struct BalanceRepository;

impl BalanceRepository {
    /// Zero when the address has no row.
    pub async fn get(conn: &mut SqliteConnection, address: &str) -> Result<Decimal> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM balances WHERE address = $1")
                .bind(address)
                .fetch_optional(conn)
                .await?;
        match value {
            Some(raw) => amount::from_db_str(&raw).map_err(|e| {
                IndexerError::Internal(format!("stored balance for {address} is not a decimal: {e}"))
            }),
            None => Ok(Decimal::ZERO),
        }
    }

    pub async fn upsert(
        conn: &mut SqliteConnection,
        address: &str,
        value: &Decimal,
        height: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (address, value, last_updated_height)
            VALUES ($1, $2, $3)
            ON CONFLICT (address) DO UPDATE SET
                value = excluded.value,
                last_updated_height = excluded.last_updated_height,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(address)
        .bind(amount::to_db_string(value))
        .bind(height)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Multi-row upsert. An empty batch is a no-op.
    pub async fn batch_upsert(
        conn: &mut SqliteConnection,
        entries: &[(String, Decimal)],
        height: i64,
    ) -> Result<()> {
        for chunk in entries.chunks(UPSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO balances (address, value, last_updated_height) ");
            builder.push_values(chunk, |mut row, (address, value)| {
                row.push_bind(address)
                    .push_bind(amount::to_db_string(value))
                    .push_bind(height);
            });
            builder.push(
                " ON CONFLICT (address) DO UPDATE SET \
                 value = excluded.value, \
                 last_updated_height = excluded.last_updated_height, \
                 updated_at = CURRENT_TIMESTAMP",
            );
            builder.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    pub async fn delete(conn: &mut SqliteConnection, address: &str) -> Result<()> {
        sqlx::query("DELETE FROM balances WHERE address = $1")
            .bind(address)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Rebuilds every balance from the unspent output set. Idempotent;
    /// authoritative after a rollback.
    pub async fn recalculate_all(conn: &mut SqliteConnection, height: i64) -> Result<()> {
        sqlx::query("UPDATE balances SET value = '0'").execute(&mut *conn).await?;

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT address, value FROM transaction_outputs WHERE is_spent = 0")
                .fetch_all(&mut *conn)
                .await?;

        let mut sums: BTreeMap<String, Decimal> = BTreeMap::new();
        for (address, raw) in rows {
            let value = amount::from_db_str(&raw).map_err(|e| {
                IndexerError::Internal(format!("stored value for {address} is not a decimal: {e}"))
            })?;
            *sums.entry(address).or_insert(Decimal::ZERO) += value;
        }

        let entries: Vec<(String, Decimal)> = sums.into_iter().collect();
        Self::batch_upsert(&mut *conn, &entries, height).await?;

        sqlx::query("DELETE FROM balances WHERE value = '0'").execute(conn).await?;
        Ok(())
    }

    /// Rebuilds one address from its unspent outputs.
    pub async fn recalculate(conn: &mut SqliteConnection, address: &str, height: i64) -> Result<()> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT value FROM transaction_outputs WHERE address = $1 AND is_spent = 0",
        )
        .bind(address)
        .fetch_all(&mut *conn)
        .await?;

        let mut sum = Decimal::ZERO;
        for raw in rows {
            sum += amount::from_db_str(&raw).map_err(|e| {
                IndexerError::Internal(format!("stored value for {address} is not a decimal: {e}"))
            })?;
        }

        if sum > Decimal::ZERO {
            Self::upsert(conn, address, &sum, height).await
        } else {
            Self::delete(conn, address).await
        }
    }
}
