//! Database connection management.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::time::Duration;

use crate::database::schema;
use crate::error::Result;

#[derive(Debug)]
pub struct Database {
    pool: sqlx::SqlitePool,
}

impl Database {
    pub async fn connect(
        database_path: &Path,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        // Ensure the database directory exists
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| crate::error::IndexerError::Internal(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }

    /// Begins a scoped transaction. Commit is explicit; any other exit
    /// path (drop on error or panic) rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Applies the schema. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        for ddl in schema::ALL_TABLES {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Trivial liveness probe.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// True when every relation the indexer needs is present.
    pub async fn required_tables_present(&self) -> Result<bool> {
        for table in schema::REQUIRED_TABLES {
            let found: Option<String> = sqlx::query_scalar(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = $1",
            )
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;
            if found.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
