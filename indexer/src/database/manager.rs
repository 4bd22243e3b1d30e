//! Database lifecycle management.
//!
//! The manager owns the pool and keeps the service usable across
//! database outages: startup is non-blocking, connect attempts retry
//! in the background with exponential backoff, and a periodic health
//! check flips the published status when the database disappears or
//! comes back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval, timeout};
use tracing::{error, info, warn};

use crate::database::Database;
use crate::error::{IndexerError, Result};

#[derive(Clone, Debug)]
pub struct DatabaseManagerConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
    /// Pool acquire timeout.
    pub acquire_timeout: Duration,
    /// Applies to pool creation and the liveness probe of each attempt.
    pub connect_timeout: Duration,
    /// Immediate tries within one connect attempt.
    pub burst_attempts: u32,
    pub burst_delay: Duration,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub backoff_cap: Duration,
    /// Total attempt cap; `None` retries forever.
    pub max_attempts: Option<u64>,
    pub health_check_interval: Duration,
}

impl Default for DatabaseManagerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("ledger_indexer.db"),
            max_connections: 20,
            acquire_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            burst_attempts: 3,
            burst_delay: Duration::from_secs(2),
            backoff_base: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            backoff_cap: Duration::from_secs(30),
            max_attempts: None,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub attempts: u64,
    pub migration_state: MigrationState,
}

struct StatusInner {
    last_attempt: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    attempts: u64,
    migration_state: MigrationState,
}

struct ManagerInner {
    config: DatabaseManagerConfig,
    database: RwLock<Option<Arc<Database>>>,
    status: Mutex<StatusInner>,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    reconnect_pending: AtomicBool,
    health_started: AtomicBool,
    attempt_finished: Notify,
}

#[derive(Clone)]
pub struct DatabaseManager {
    inner: Arc<ManagerInner>,
}

impl DatabaseManager {
    pub fn new(config: DatabaseManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                database: RwLock::new(None),
                status: Mutex::new(StatusInner {
                    last_attempt: None,
                    last_success: None,
                    last_error: None,
                    attempts: 0,
                    migration_state: MigrationState::Pending,
                }),
                connected: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                reconnect_pending: AtomicBool::new(false),
                health_started: AtomicBool::new(false),
                attempt_finished: Notify::new(),
            }),
        }
    }

    /// Kicks off the background connect attempt and the periodic
    /// health check. Returns immediately.
    pub fn initialize(&self) {
        self.ensure_reconnect();
        if !self.inner.health_started.swap(true, Ordering::SeqCst) {
            let inner = self.inner.clone();
            tokio::spawn(async move { health_loop(inner).await });
        }
    }

    /// Cheap accessor; `None` while offline.
    pub fn connection(&self) -> Option<Arc<Database>> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return None;
        }
        self.inner.database.read().expect("database lock poisoned").clone()
    }

    /// Waits for a healthy pool, triggering a reconnect if none is in
    /// flight. Fails only when shutting down or when the configured
    /// attempt cap is exhausted.
    pub async fn connection_with_retry(&self) -> Result<Arc<Database>> {
        loop {
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                return Err(IndexerError::ShuttingDown);
            }
            if let Some(db) = self.connection() {
                return Ok(db);
            }
            if self.attempts_exhausted() {
                let last_error = self
                    .inner
                    .status
                    .lock()
                    .expect("status lock poisoned")
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "connect attempts exhausted".to_string());
                return Err(IndexerError::Unavailable(last_error));
            }
            self.ensure_reconnect();

            let notified = self.inner.attempt_finished.notified();
            if let Some(db) = self.connection() {
                return Ok(db);
            }
            // Bounded wait: a notification can slip past between the
            // checks above and registration, so fall through to
            // re-check on a backoff-sized tick.
            let _ = timeout(self.inner.config.backoff_base, notified).await;
        }
    }

    pub fn status(&self) -> DatabaseStatus {
        let status = self.inner.status.lock().expect("status lock poisoned");
        DatabaseStatus {
            connected: self.inner.connected.load(Ordering::SeqCst),
            last_attempt: status.last_attempt,
            last_success: status.last_success,
            last_error: status.last_error.clone(),
            attempts: status.attempts,
            migration_state: status.migration_state,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Called when a caller observes a connection-class failure on a
    /// pooled connection: flips the status and schedules a reconnect.
    pub fn report_pool_error(&self, err: &sqlx::Error) {
        warn!(error = %err, "pool error reported; scheduling reconnect");
        self.inner.connected.store(false, Ordering::SeqCst);
        {
            let mut status = self.inner.status.lock().expect("status lock poisoned");
            status.last_error = Some(err.to_string());
        }
        self.ensure_reconnect();
    }

    /// Cancels timers, closes the pool and suppresses further
    /// reconnects.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.attempt_finished.notify_waiters();
        let db = self.inner.database.write().expect("database lock poisoned").take();
        if let Some(db) = db {
            db.close().await;
        }
        info!("database manager shut down");
    }

    fn attempts_exhausted(&self) -> bool {
        match self.inner.config.max_attempts {
            Some(cap) => {
                let status = self.inner.status.lock().expect("status lock poisoned");
                status.attempts >= cap
            }
            None => false,
        }
    }

    fn ensure_reconnect(&self) {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if !self.inner.reconnect_pending.swap(true, Ordering::SeqCst) {
            let inner = self.inner.clone();
            tokio::spawn(async move { reconnect_loop(inner).await });
        }
    }
}

/// Backoff loop around connect bursts. Runs until connected, shut
/// down, or the attempt cap is exhausted.
async fn reconnect_loop(inner: Arc<ManagerInner>) {
    let mut delay = inner.config.backoff_base;
    loop {
        if inner.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        match connect_burst(&inner).await {
            Ok(()) => {
                inner.attempt_finished.notify_waiters();
                break;
            }
            Err(err) => {
                inner.attempt_finished.notify_waiters();
                if let Some(cap) = inner.config.max_attempts {
                    let attempts = inner.status.lock().expect("status lock poisoned").attempts;
                    if attempts >= cap {
                        error!(attempts, "connect attempt cap exhausted");
                        break;
                    }
                }
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "database connect failed; backing off"
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * inner.config.backoff_multiplier)
                        .min(inner.config.backoff_cap.as_secs_f64()),
                );
            }
        }
    }
    inner.reconnect_pending.store(false, Ordering::SeqCst);
    inner.attempt_finished.notify_waiters();
}

/// One bounded burst of immediate connect tries.
async fn connect_burst(inner: &Arc<ManagerInner>) -> Result<()> {
    let mut last_err = IndexerError::Unavailable("no connect attempt made".into());
    for try_index in 0..inner.config.burst_attempts {
        if inner.shutting_down.load(Ordering::SeqCst) {
            return Err(IndexerError::ShuttingDown);
        }
        match try_connect_once(inner).await {
            Ok(db) => {
                *inner.database.write().expect("database lock poisoned") = Some(db);
                inner.connected.store(true, Ordering::SeqCst);
                let mut status = inner.status.lock().expect("status lock poisoned");
                status.last_success = Some(Utc::now());
                status.last_error = None;
                info!("database connected");
                return Ok(());
            }
            Err(err) => {
                {
                    let mut status = inner.status.lock().expect("status lock poisoned");
                    status.last_error = Some(err.to_string());
                }
                last_err = err;
                if try_index + 1 < inner.config.burst_attempts {
                    tokio::time::sleep(inner.config.burst_delay).await;
                }
            }
        }
    }
    Err(last_err)
}

/// A single try: create the pool, probe it, migrate, validate.
async fn try_connect_once(inner: &Arc<ManagerInner>) -> Result<Arc<Database>> {
    {
        let mut status = inner.status.lock().expect("status lock poisoned");
        status.attempts += 1;
        status.last_attempt = Some(Utc::now());
    }

    let db = timeout(
        inner.config.connect_timeout,
        Database::connect(
            &inner.config.database_path,
            inner.config.max_connections,
            inner.config.acquire_timeout,
        ),
    )
    .await
    .map_err(|_| IndexerError::Unavailable("database connect timed out".into()))??;

    timeout(inner.config.connect_timeout, db.ping())
        .await
        .map_err(|_| IndexerError::Unavailable("liveness probe timed out".into()))??;

    {
        let mut status = inner.status.lock().expect("status lock poisoned");
        status.migration_state = MigrationState::Running;
    }
    if let Err(err) = db.migrate().await {
        let mut status = inner.status.lock().expect("status lock poisoned");
        status.migration_state = MigrationState::Failed;
        return Err(err);
    }
    if !db.required_tables_present().await? {
        let mut status = inner.status.lock().expect("status lock poisoned");
        status.migration_state = MigrationState::Failed;
        return Err(IndexerError::Unavailable(
            "schema validation failed: required tables missing".into(),
        ));
    }
    {
        let mut status = inner.status.lock().expect("status lock poisoned");
        status.migration_state = MigrationState::Completed;
    }

    Ok(Arc::new(db))
}

/// Periodic liveness check; toggles the connected flag and schedules a
/// reconnect on failure.
async fn health_loop(inner: Arc<ManagerInner>) {
    let mut ticker = interval(inner.config.health_check_interval);
    ticker.tick().await; // first tick fires immediately
    loop {
        ticker.tick().await;
        if inner.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        let db = inner.database.read().expect("database lock poisoned").clone();
        let Some(db) = db else { continue };
        match db.ping().await {
            Ok(()) => {
                if !inner.connected.swap(true, Ordering::SeqCst) {
                    info!("database health restored");
                }
            }
            Err(err) => {
                if inner.connected.swap(false, Ordering::SeqCst) {
                    warn!(error = %err, "database health check failed");
                }
                {
                    let mut status = inner.status.lock().expect("status lock poisoned");
                    status.last_error = Some(err.to_string());
                }
                let manager = DatabaseManager { inner: inner.clone() };
                manager.ensure_reconnect();
            }
        }
    }
}
