//! Error classification and the in-process error log.
//!
//! Every failure the processor catches is turned into a
//! [`StructuredError`]: a tagged record carrying kind, severity and the
//! recoverable/retryable flags that drive retry decisions. Recent
//! entries are kept in a bounded ring buffer for the status endpoint.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::Sqlite;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

use crate::error::IndexerError;

/// Retained entries; older ones fall off the ring buffer.
const ERROR_LOG_CAPACITY: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Database,
    Concurrency,
    BusinessLogic,
    Network,
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Database => "database",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::BusinessLogic => "business_logic",
            ErrorKind::Network => "network",
            ErrorKind::System => "system",
        }
    }

    /// Transient infrastructure failures retry; rule violations do not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Database | ErrorKind::Network | ErrorKind::Concurrency
        )
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::System)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Debug, Serialize)]
pub struct StructuredError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub recoverable: bool,
    pub retryable: bool,
    pub message: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
    /// Set when a scoped-transaction rollback attempted for this error
    /// itself failed.
    pub rollback_failed: bool,
}

/// Derives the kind from the error variant, refined by message
/// patterns, then overridden by an explicit context hint
/// (`"db:..."`/`"net:..."` prefixes on the context string).
pub fn classify(err: &IndexerError, context: &str) -> StructuredError {
    let message = err.to_string();
    let kind = override_by_context(kind_of(err, &message), context);
    let severity = severity_of(kind, &message);
    StructuredError {
        kind,
        severity,
        recoverable: kind.is_recoverable(),
        retryable: kind.is_retryable(),
        message,
        context: context.to_string(),
        timestamp: Utc::now(),
        rollback_failed: false,
    }
}

fn kind_of(err: &IndexerError, message: &str) -> ErrorKind {
    match err {
        IndexerError::Validation(_) => ErrorKind::Validation,
        IndexerError::BusinessLogic(_)
        | IndexerError::Duplicate(_)
        | IndexerError::RollbackLimited(_) => ErrorKind::BusinessLogic,
        IndexerError::Database(_) | IndexerError::Unavailable(_) => ErrorKind::Database,
        IndexerError::Concurrency(_) | IndexerError::Busy(_) => ErrorKind::Concurrency,
        IndexerError::Network(_) => ErrorKind::Network,
        IndexerError::ShuttingDown => ErrorKind::System,
        IndexerError::Internal(_) => kind_from_message(message),
    }
}

/// Pattern classification for errors that arrive untyped.
fn kind_from_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if ["connection", "timed out", "timeout", "refused", "reset", "unreachable"]
        .iter()
        .any(|p| lower.contains(p))
    {
        ErrorKind::Network
    } else if ["database", "sqlite", "pool", "locked", "constraint", "no such table"]
        .iter()
        .any(|p| lower.contains(p))
    {
        ErrorKind::Database
    } else if lower.contains("queue") || lower.contains("mutex") {
        ErrorKind::Concurrency
    } else {
        ErrorKind::System
    }
}

fn override_by_context(kind: ErrorKind, context: &str) -> ErrorKind {
    if kind != ErrorKind::System {
        return kind;
    }
    if context.starts_with("db:") {
        ErrorKind::Database
    } else if context.starts_with("net:") {
        ErrorKind::Network
    } else {
        kind
    }
}

fn severity_of(kind: ErrorKind, message: &str) -> Severity {
    match kind {
        ErrorKind::Validation | ErrorKind::BusinessLogic => Severity::Low,
        ErrorKind::Concurrency => Severity::Medium,
        ErrorKind::Network => Severity::Medium,
        ErrorKind::Database => {
            if message.to_lowercase().contains("corrupt") {
                Severity::Critical
            } else {
                Severity::High
            }
        }
        ErrorKind::System => Severity::High,
    }
}

/// True when the failure looks like a lost or refused connection, as
/// opposed to a query-level database error.
pub fn is_connection_class(err: &StructuredError) -> bool {
    if err.kind == ErrorKind::Network {
        return true;
    }
    if err.kind != ErrorKind::Database {
        return false;
    }
    let lower = err.message.to_lowercase();
    ["connection", "pool timed out", "closed", "unavailable", "not connected"]
        .iter()
        .any(|p| lower.contains(p))
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ErrorStats {
    pub total: usize,
    pub last_hour: usize,
    pub last_day: usize,
    pub by_kind: HashMap<&'static str, usize>,
    pub by_severity: HashMap<String, usize>,
}

/// Process-wide ring buffer of recent structured errors.
pub struct ErrorLog {
    entries: Mutex<VecDeque<StructuredError>>,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorLog {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(ERROR_LOG_CAPACITY)) }
    }

    pub fn record(&self, entry: StructuredError) {
        let mut entries = self.entries.lock().expect("error log poisoned");
        if entries.len() == ERROR_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Classifies, records and returns the structured form in one step.
    pub fn capture(&self, err: &IndexerError, context: &str) -> StructuredError {
        let entry = classify(err, context);
        self.record(entry.clone());
        entry
    }

    pub fn recent(&self, n: usize) -> Vec<StructuredError> {
        let entries = self.entries.lock().expect("error log poisoned");
        entries.iter().rev().take(n).cloned().collect()
    }

    /// Drops entries older than 24 hours.
    pub fn prune(&self) {
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let mut entries = self.entries.lock().expect("error log poisoned");
        entries.retain(|e| e.timestamp >= cutoff);
    }

    pub fn stats(&self) -> ErrorStats {
        let now = Utc::now();
        let hour_ago = now - ChronoDuration::hours(1);
        let day_ago = now - ChronoDuration::hours(24);

        let entries = self.entries.lock().expect("error log poisoned");
        let mut stats = ErrorStats { total: entries.len(), ..Default::default() };
        for entry in entries.iter() {
            if entry.timestamp >= hour_ago {
                stats.last_hour += 1;
            }
            if entry.timestamp >= day_ago {
                stats.last_day += 1;
            }
            *stats.by_kind.entry(entry.kind.as_str()).or_insert(0) += 1;
            *stats
                .by_severity
                .entry(format!("{:?}", entry.severity).to_lowercase())
                .or_insert(0) += 1;
        }
        stats
    }
}

/// Rolls back a scoped transaction after a failure and records the
/// outcome. A rollback failure is noted on the structured error and
/// logged, never propagated; the original error always wins.
pub async fn handle_database_error(
    err: IndexerError,
    tx: sqlx::Transaction<'static, Sqlite>,
    log: &ErrorLog,
    context: &str,
) -> IndexerError {
    let mut entry = classify(&err, context);
    if let Err(rollback_err) = tx.rollback().await {
        entry.rollback_failed = true;
        warn!(context, error = %rollback_err, "transaction rollback failed");
    }
    log.record(entry);
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_variants_classify_by_kind() {
        let err = IndexerError::Validation("bad block".into());
        let entry = classify(&err, "processor:submit_block");
        assert_eq!(entry.kind, ErrorKind::Validation);
        assert!(!entry.retryable);

        let err = IndexerError::Network("connection refused".into());
        let entry = classify(&err, "db:connect");
        assert_eq!(entry.kind, ErrorKind::Network);
        assert!(entry.retryable);
        assert!(entry.recoverable);
    }

    #[test]
    fn untyped_errors_classify_by_message_pattern() {
        let err = IndexerError::Internal("pool timed out while waiting".into());
        assert_eq!(classify(&err, "").kind, ErrorKind::Network);

        let err = IndexerError::Internal("no such table: balances".into());
        assert_eq!(classify(&err, "").kind, ErrorKind::Database);

        let err = IndexerError::Internal("something odd".into());
        assert_eq!(classify(&err, "").kind, ErrorKind::System);
    }

    #[test]
    fn context_overrides_unclassified_errors() {
        let err = IndexerError::Internal("something odd".into());
        assert_eq!(classify(&err, "db:migrate").kind, ErrorKind::Database);
        assert_eq!(classify(&err, "net:probe").kind, ErrorKind::Network);
    }

    #[test]
    fn business_logic_never_retries() {
        let err = IndexerError::Duplicate("Block already processed: height 2".into());
        let entry = classify(&err, "");
        assert_eq!(entry.kind, ErrorKind::BusinessLogic);
        assert!(!entry.retryable);
        assert_eq!(entry.severity, Severity::Low);
    }

    #[test]
    fn connection_class_detection() {
        let err = IndexerError::Unavailable("database not connected".into());
        assert!(is_connection_class(&classify(&err, "")));

        let err = IndexerError::BusinessLogic("UTXO not found or already spent".into());
        assert!(!is_connection_class(&classify(&err, "")));
    }

    #[test]
    fn prune_drops_entries_older_than_a_day() {
        let log = ErrorLog::new();
        let mut stale = classify(&IndexerError::Internal("old".into()), "test");
        stale.timestamp = Utc::now() - ChronoDuration::hours(25);
        log.record(stale);
        log.capture(&IndexerError::Internal("fresh".into()), "test");

        log.prune();
        let stats = log.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.last_day, 1);
    }

    #[tokio::test]
    async fn handle_database_error_rolls_back_the_scoped_transaction() {
        use crate::database::Database;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&dir.path().join("classify.db"), 5, Duration::from_secs(2))
            .await
            .unwrap();
        db.migrate().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        sqlx::query("INSERT INTO blocks (height, id, transaction_count) VALUES (1, 'abc', 0)")
            .execute(&mut *tx)
            .await
            .unwrap();

        let log = ErrorLog::new();
        let err = IndexerError::Internal("boom".into());
        let returned = handle_database_error(err, tx, &log, "db:apply").await;
        assert!(matches!(returned, IndexerError::Internal(_)));
        assert_eq!(log.stats().total, 1);

        // The uncommitted insert is gone.
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn ring_buffer_caps_at_capacity() {
        let log = ErrorLog::new();
        for i in 0..(ERROR_LOG_CAPACITY + 10) {
            log.capture(&IndexerError::Internal(format!("err {i}")), "test");
        }
        let stats = log.stats();
        assert_eq!(stats.total, ERROR_LOG_CAPACITY);
        // The oldest entries were evicted.
        let recent = log.recent(ERROR_LOG_CAPACITY);
        assert!(recent.iter().all(|e| e.message != "Internal error: err 0"));
    }

    #[test]
    fn stats_count_by_kind_and_severity() {
        let log = ErrorLog::new();
        log.capture(&IndexerError::Validation("v".into()), "");
        log.capture(&IndexerError::Network("connection reset".into()), "");
        log.capture(&IndexerError::Network("connection reset".into()), "");

        let stats = log.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.last_hour, 3);
        assert_eq!(stats.by_kind.get("network"), Some(&2));
        assert_eq!(stats.by_kind.get("validation"), Some(&1));
        assert_eq!(stats.by_severity.get("medium"), Some(&2));
    }
}
