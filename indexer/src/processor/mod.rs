//! Block processing pipeline.
//!
//! The processor is the sole mutator of the ledger. Submissions and
//! rollbacks are routed through the [`Coordinator`]; each runs inside
//! one scoped persistence transaction and is wrapped in the
//! classifier-driven retry. Failures come back as values; nothing is
//! thrown across the coordinator boundary.

mod rollback;
mod submit;

use async_trait::async_trait;
use ledger_core::Block;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::classify::{is_connection_class, ErrorLog};
use crate::coordinator::Coordinator;
use crate::database::DatabaseManager;
use crate::error::{IndexerError, Result};
use crate::models::Utxo;
use crate::repository::{BalanceRepository, UtxoRepository};
use crate::retry::{execute_with_retry, RetryPolicy};

/// How far back a rollback may reach from the current tip.
pub const MAX_ROLLBACK_DEPTH: u64 = 2000;

/// The service surface consumed by the HTTP layer (or any other
/// frontend).
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Validates and commits `block`; returns its height.
    async fn submit_block(&self, block: Block) -> Result<u64>;

    /// Current balance of `address`; zero when unknown.
    async fn balance(&self, address: &str) -> Result<Decimal>;

    /// Unspent outputs currently assigned to `address`.
    async fn unspent_outputs(&self, address: &str) -> Result<Vec<Utxo>>;

    /// Reverts the ledger to `target`; returns the new tip height.
    async fn rollback_to_height(&self, target: u64) -> Result<u64>;
}

pub struct BlockProcessor {
    manager: DatabaseManager,
    coordinator: Coordinator,
    errors: Arc<ErrorLog>,
}

impl BlockProcessor {
    pub fn new(manager: DatabaseManager, coordinator: Coordinator, errors: Arc<ErrorLog>) -> Self {
        Self { manager, coordinator, errors }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn manager(&self) -> &DatabaseManager {
        &self.manager
    }

    /// Flags connection-class database failures to the manager so it
    /// re-probes the pool.
    fn report_if_connection_error(&self, err: &IndexerError) {
        if let IndexerError::Database(db_err) = err {
            let entry = crate::classify::classify(err, "processor");
            if is_connection_class(&entry) {
                self.manager.report_pool_error(db_err);
            }
        }
    }
}

#[async_trait]
impl LedgerApi for BlockProcessor {
    async fn submit_block(&self, block: Block) -> Result<u64> {
        let manager = self.manager.clone();
        let errors = self.errors.clone();
        let block = Arc::new(block);
        let height = block.height;

        let result = self
            .coordinator
            .submit(async move {
                let log = errors.clone();
                execute_with_retry(
                    &RetryPolicy::submit_block(),
                    "processor:submit_block",
                    &log,
                    || submit::process_block(manager.clone(), errors.clone(), block.clone()),
                    |entry| entry.retryable,
                )
                .await
            })
            .await;

        match &result {
            Ok(committed) => info!(height = committed, "block accepted"),
            Err(err) => {
                warn!(height, error = %err, "block rejected");
                self.report_if_connection_error(err);
            }
        }
        result
    }

    async fn balance(&self, address: &str) -> Result<Decimal> {
        if !self.coordinator.may_read_balance() {
            return Err(IndexerError::Busy("Rollback in progress".into()));
        }
        let db = self
            .manager
            .connection()
            .ok_or_else(|| IndexerError::Unavailable("database not connected".into()))?;
        let mut conn = db.pool().acquire().await?;
        BalanceRepository::get(&mut conn, address).await
    }

    async fn unspent_outputs(&self, address: &str) -> Result<Vec<Utxo>> {
        if !self.coordinator.may_read_balance() {
            return Err(IndexerError::Busy("Rollback in progress".into()));
        }
        let db = self
            .manager
            .connection()
            .ok_or_else(|| IndexerError::Unavailable("database not connected".into()))?;
        let mut conn = db.pool().acquire().await?;
        UtxoRepository::list_unspent(&mut conn, address).await
    }

    async fn rollback_to_height(&self, target: u64) -> Result<u64> {
        let manager = self.manager.clone();
        let errors = self.errors.clone();

        let result = self
            .coordinator
            .run_rollback(async move {
                let log = errors.clone();
                execute_with_retry(
                    &RetryPolicy::rollback(),
                    "processor:rollback",
                    &log,
                    || rollback::rollback_once(manager.clone(), errors.clone(), target),
                    is_connection_class,
                )
                .await
            })
            .await;

        match &result {
            Ok(new_height) => info!(target, new_height, "rollback completed"),
            Err(err) => {
                warn!(target, error = %err, "rollback failed");
                self.report_if_connection_error(err);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManagerConfig;
    use crate::repository::BlockRepository;
    use ledger_core::{hashing, Transaction, TxInput, TxOutput};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn test_processor(dir: &tempfile::TempDir) -> BlockProcessor {
        let manager = DatabaseManager::new(DatabaseManagerConfig {
            database_path: dir.path().join("processor.db"),
            burst_delay: Duration::from_millis(10),
            backoff_base: Duration::from_millis(10),
            health_check_interval: Duration::from_secs(30),
            ..Default::default()
        });
        manager.initialize();
        manager.connection_with_retry().await.unwrap();
        BlockProcessor::new(manager, Coordinator::new(), Arc::new(ErrorLog::new()))
    }

    fn tx(id: &str, inputs: Vec<(&str, u32)>, outputs: Vec<(&str, Decimal)>) -> Transaction {
        Transaction {
            id: id.into(),
            inputs: inputs
                .into_iter()
                .map(|(tx_id, index)| TxInput { tx_id: tx_id.into(), index })
                .collect(),
            outputs: outputs
                .into_iter()
                .map(|(address, value)| TxOutput { address: address.into(), value })
                .collect(),
        }
    }

    fn block(height: u64, transactions: Vec<Transaction>) -> Block {
        let id = hashing::block_id(height, transactions.iter().map(|t| t.id.as_str()));
        Block::new(height, id, transactions)
    }

    fn genesis() -> Block {
        block(
            1,
            vec![tx("genesis-tx", vec![], vec![("alice", dec!(1000)), ("bob", dec!(500))])],
        )
    }

    #[tokio::test]
    async fn genesis_block_credits_outputs() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;

        let height = processor.submit_block(genesis()).await.unwrap();
        assert_eq!(height, 1);

        assert_eq!(processor.balance("alice").await.unwrap(), dec!(1000));
        assert_eq!(processor.balance("bob").await.unwrap(), dec!(500));
        assert_eq!(processor.balance("nobody").await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn unspent_outputs_follow_spends() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        let utxos = processor.unspent_outputs("alice").await.unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].tx_id, "genesis-tx");
        assert_eq!(utxos[0].value, dec!(1000));

        let spend = block(
            2,
            vec![tx(
                "tx2",
                vec![("genesis-tx", 0)],
                vec![("charlie", dec!(600)), ("alice", dec!(400))],
            )],
        );
        processor.submit_block(spend).await.unwrap();

        let utxos = processor.unspent_outputs("alice").await.unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].tx_id, "tx2");
        assert_eq!(utxos[0].output_index, 1);
        assert_eq!(utxos[0].value, dec!(400));
    }

    #[tokio::test]
    async fn spend_with_change_moves_value() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        let spend = block(
            2,
            vec![tx(
                "tx2",
                vec![("genesis-tx", 0)],
                vec![("charlie", dec!(600)), ("alice", dec!(400))],
            )],
        );
        assert_eq!(processor.submit_block(spend).await.unwrap(), 2);

        assert_eq!(processor.balance("alice").await.unwrap(), dec!(400));
        assert_eq!(processor.balance("charlie").await.unwrap(), dec!(600));
        assert_eq!(processor.balance("bob").await.unwrap(), dec!(500));
    }

    #[tokio::test]
    async fn unbalanced_transaction_leaves_state_unchanged() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        let bad = block(2, vec![tx("tx2", vec![("genesis-tx", 0)], vec![("x", dec!(1500))])]);
        let err = processor.submit_block(bad).await.unwrap_err();
        assert!(matches!(err, IndexerError::BusinessLogic(_)));
        assert!(err.to_string().contains("does not conserve value"));

        // Nothing moved; height 2 can still be taken.
        assert_eq!(processor.balance("alice").await.unwrap(), dec!(1000));
        assert_eq!(processor.balance("x").await.unwrap(), dec!(0));
        let good = block(2, vec![tx("tx2", vec![("genesis-tx", 0)], vec![("x", dec!(1000))])]);
        assert_eq!(processor.submit_block(good).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_blocks_are_rejected() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        let err = processor.submit_block(genesis()).await.unwrap_err();
        assert!(matches!(err, IndexerError::Duplicate(_)));
        assert!(err.to_string().contains("already processed"));
    }

    #[tokio::test]
    async fn transaction_ids_are_globally_unique() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        // A fresh block reusing an already-indexed transaction id.
        let replay = block(2, vec![tx("genesis-tx", vec![], vec![("mallory", dec!(1))])]);
        let err = processor.submit_block(replay).await.unwrap_err();
        assert!(matches!(err, IndexerError::Duplicate(_)));
        assert!(err.to_string().contains("Transaction already processed"));
    }

    #[tokio::test]
    async fn non_sequential_heights_are_rejected() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;

        // From empty, only height 1 is acceptable.
        let wrong_start = block(2, vec![tx("t", vec![], vec![("a", dec!(1))])]);
        let err = processor.submit_block(wrong_start).await.unwrap_err();
        assert!(err.to_string().starts_with("Block height must be"));

        processor.submit_block(genesis()).await.unwrap();

        let gap = block(5, vec![tx("t5", vec![], vec![("a", dec!(1))])]);
        let err = processor.submit_block(gap).await.unwrap_err();
        assert!(err.to_string().starts_with("Block height must be"));
    }

    #[tokio::test]
    async fn wrong_content_hash_is_rejected() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;

        let mut bad = genesis();
        bad.id = "0".repeat(64);
        let err = processor.submit_block(bad).await.unwrap_err();
        assert!(err.to_string().contains("does not match block contents"));
    }

    #[tokio::test]
    async fn intra_block_spends_validate_and_commit() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        // tx-a spends the genesis output, tx-b spends tx-a's first
        // output within the same block.
        let chained = block(
            2,
            vec![
                tx("tx-a", vec![("genesis-tx", 0)], vec![("dave", dec!(700)), ("alice", dec!(300))]),
                tx("tx-b", vec![("tx-a", 0)], vec![("erin", dec!(700))]),
            ],
        );
        assert_eq!(processor.submit_block(chained).await.unwrap(), 2);

        assert_eq!(processor.balance("dave").await.unwrap(), dec!(0));
        assert_eq!(processor.balance("erin").await.unwrap(), dec!(700));
        assert_eq!(processor.balance("alice").await.unwrap(), dec!(300));
    }

    #[tokio::test]
    async fn double_spend_within_a_block_is_rejected() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        let double = block(
            2,
            vec![
                tx("tx-a", vec![("genesis-tx", 0)], vec![("x", dec!(1000))]),
                tx("tx-b", vec![("genesis-tx", 0)], vec![("y", dec!(1000))]),
            ],
        );
        let err = processor.submit_block(double).await.unwrap_err();
        assert!(err.to_string().contains("UTXO not found or already spent"));

        // The whole block aborted: tx-a's effects are gone too.
        assert_eq!(processor.balance("x").await.unwrap(), dec!(0));
        assert_eq!(processor.balance("alice").await.unwrap(), dec!(1000));
    }

    #[tokio::test]
    async fn rollback_to_genesis_restores_balances() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();
        let spend = block(
            2,
            vec![tx(
                "tx2",
                vec![("genesis-tx", 0)],
                vec![("charlie", dec!(600)), ("alice", dec!(400))],
            )],
        );
        processor.submit_block(spend).await.unwrap();

        assert_eq!(processor.rollback_to_height(1).await.unwrap(), 1);

        assert_eq!(processor.balance("alice").await.unwrap(), dec!(1000));
        assert_eq!(processor.balance("bob").await.unwrap(), dec!(500));
        assert_eq!(processor.balance("charlie").await.unwrap(), dec!(0));

        // Height 2 is free again.
        let spend = block(2, vec![tx("tx2b", vec![("genesis-tx", 0)], vec![("x", dec!(1000))])]);
        assert_eq!(processor.submit_block(spend).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rollback_to_zero_resets_everything() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        assert_eq!(processor.rollback_to_height(0).await.unwrap(), 0);

        assert_eq!(processor.balance("alice").await.unwrap(), dec!(0));
        assert_eq!(processor.balance("bob").await.unwrap(), dec!(0));

        let db = processor.manager.connection().unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        assert_eq!(BlockRepository::max_height(&mut conn).await.unwrap(), 0);
        let balances: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM balances")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(balances, 0);
    }

    #[tokio::test]
    async fn rollback_replay_restores_original_state() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        let blocks = vec![
            genesis(),
            block(
                2,
                vec![tx(
                    "tx2",
                    vec![("genesis-tx", 0)],
                    vec![("charlie", dec!(600)), ("alice", dec!(400))],
                )],
            ),
        ];
        for b in &blocks {
            processor.submit_block(b.clone()).await.unwrap();
        }

        processor.rollback_to_height(0).await.unwrap();
        for b in &blocks {
            processor.submit_block(b.clone()).await.unwrap();
        }

        assert_eq!(processor.balance("alice").await.unwrap(), dec!(400));
        assert_eq!(processor.balance("bob").await.unwrap(), dec!(500));
        assert_eq!(processor.balance("charlie").await.unwrap(), dec!(600));
    }

    #[tokio::test]
    async fn rollback_to_current_height_is_a_no_op() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        assert_eq!(processor.rollback_to_height(1).await.unwrap(), 1);
        assert_eq!(processor.balance("alice").await.unwrap(), dec!(1000));
    }

    #[tokio::test]
    async fn rollback_above_current_height_is_rejected() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        let err = processor.rollback_to_height(5).await.unwrap_err();
        assert!(err.to_string().contains("greater than current height"));
    }

    #[tokio::test]
    async fn rollback_window_is_exactly_2000_blocks() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;

        // Seed 2500 bare block rows; the window check only needs the tip.
        let db = processor.manager.connection().unwrap();
        let mut tx = db.begin().await.unwrap();
        for height in 1..=2500i64 {
            BlockRepository::insert_block(&mut tx, height, &format!("{height:064x}"), 0)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let err = processor.rollback_to_height(400).await.unwrap_err();
        assert!(matches!(err, IndexerError::RollbackLimited(_)));
        assert_eq!(err.to_string(), "rollback limited to 2000 blocks");

        // Exactly 2000 back is allowed.
        assert_eq!(processor.rollback_to_height(500).await.unwrap(), 500);
        let mut conn = db.pool().acquire().await.unwrap();
        assert_eq!(BlockRepository::max_height(&mut conn).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn transactions_without_outputs_are_accepted() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();

        // A coinbase carrying no outputs mints nothing but is valid.
        let empty = block(2, vec![tx("burn-marker", vec![], vec![])]);
        assert_eq!(processor.submit_block(empty).await.unwrap(), 2);
        assert_eq!(processor.balance("alice").await.unwrap(), dec!(1000));
    }

    /// (address, value) balance rows plus full output rows, ordered,
    /// for state comparison between databases.
    async fn state_snapshot(processor: &BlockProcessor) -> (Vec<(String, String)>, Vec<(String, i64, String, String, bool)>, i64) {
        let db = processor.manager.connection().unwrap();
        let balances: Vec<(String, String)> =
            sqlx::query_as("SELECT address, value FROM balances ORDER BY address")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let outputs: Vec<(String, i64, String, String, bool)> = sqlx::query_as(
            "SELECT transaction_id, output_index, address, value, is_spent \
             FROM transaction_outputs ORDER BY transaction_id, output_index",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let tip: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(height), 0) FROM blocks")
            .fetch_one(db.pool())
            .await
            .unwrap();
        (balances, outputs, tip)
    }

    #[tokio::test]
    async fn rolled_back_state_equals_reprocessing_surviving_blocks() {
        let spend_1 = || {
            block(
                2,
                vec![tx(
                    "tx2",
                    vec![("genesis-tx", 0)],
                    vec![("charlie", dec!(600)), ("alice", dec!(400))],
                )],
            )
        };
        let spend_2 =
            || block(3, vec![tx("tx3", vec![("tx2", 0)], vec![("dave", dec!(600))])]);

        // Chain A processes three blocks and rolls back to height 1.
        let dir_a = tempdir().unwrap();
        let a = test_processor(&dir_a).await;
        a.submit_block(genesis()).await.unwrap();
        a.submit_block(spend_1()).await.unwrap();
        a.submit_block(spend_2()).await.unwrap();
        a.rollback_to_height(1).await.unwrap();

        // Chain B only ever sees the surviving block.
        let dir_b = tempdir().unwrap();
        let b = test_processor(&dir_b).await;
        b.submit_block(genesis()).await.unwrap();

        assert_eq!(state_snapshot(&a).await, state_snapshot(&b).await);
    }

    #[tokio::test]
    async fn conservation_of_total_value_holds() {
        let dir = tempdir().unwrap();
        let processor = test_processor(&dir).await;
        processor.submit_block(genesis()).await.unwrap();
        let spend = block(
            2,
            vec![tx(
                "tx2",
                vec![("genesis-tx", 1)],
                vec![("dave", dec!(0.1)), ("erin", dec!(499.9))],
            )],
        );
        processor.submit_block(spend).await.unwrap();

        let db = processor.manager.connection().unwrap();
        let balances: Vec<String> = sqlx::query_scalar("SELECT value FROM balances")
            .fetch_all(db.pool())
            .await
            .unwrap();
        let balance_sum: Decimal =
            balances.iter().map(|v| v.parse::<Decimal>().unwrap()).sum();

        let unspent: Vec<String> =
            sqlx::query_scalar("SELECT value FROM transaction_outputs WHERE is_spent = 0")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let unspent_sum: Decimal = unspent.iter().map(|v| v.parse::<Decimal>().unwrap()).sum();

        assert_eq!(balance_sum, unspent_sum);
        assert_eq!(balance_sum, dec!(1500));
    }

    #[tokio::test]
    async fn balance_read_is_busy_during_rollback() {
        let dir = tempdir().unwrap();
        let processor = Arc::new(test_processor(&dir).await);
        processor.submit_block(genesis()).await.unwrap();

        let coordinator = processor.coordinator().clone();
        let guard = tokio::spawn(async move {
            coordinator
                .run_rollback(async {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = processor.balance("alice").await.unwrap_err();
        assert!(matches!(err, IndexerError::Busy(_)));

        guard.await.unwrap().unwrap();
        assert_eq!(processor.balance("alice").await.unwrap(), dec!(1000));
    }
}
