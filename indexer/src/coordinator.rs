//! Concurrency coordination.
//!
//! Mutations (block submissions) are queued and drained strictly one
//! at a time in FIFO order. Rollbacks take the ledger exclusively:
//! they wait for the in-flight mutation to finish, block the drain
//! loop while they run, and exclude balance reads. Rollbacks
//! themselves are serialized.

use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info};

use crate::error::{IndexerError, Result};

/// Message rejected mutations carry when the queue is cleared.
pub const QUEUE_CLEARED: &str = "Queue cleared - operation cancelled";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Disposition {
    Run,
    Cancel,
}

/// A queued mutation. Invoked exactly once: either run to completion
/// or told to report cancellation to its submitter.
type Job = Box<dyn FnOnce(Disposition) -> BoxFuture<'static, ()> + Send>;

struct CoordinatorInner {
    queue: Mutex<VecDeque<Job>>,
    mutating: AtomicBool,
    rollback_active: AtomicBool,
    /// A rollback is waiting for quiescence; the drain loop must not
    /// start new work.
    rollback_waiting: AtomicBool,
    shutting_down: AtomicBool,
    work_available: Notify,
    drained: Notify,
    rollback_gate: tokio::sync::Mutex<()>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub queue_length: usize,
    pub mutating: bool,
    pub rollback_active: bool,
    pub shutting_down: bool,
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    /// Creates the coordinator and spawns its drain loop.
    pub fn new() -> Self {
        let inner = Arc::new(CoordinatorInner {
            queue: Mutex::new(VecDeque::new()),
            mutating: AtomicBool::new(false),
            rollback_active: AtomicBool::new(false),
            rollback_waiting: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            work_available: Notify::new(),
            drained: Notify::new(),
            rollback_gate: tokio::sync::Mutex::new(()),
        });
        tokio::spawn(drain_loop(inner.clone()));
        Self { inner }
    }

    /// Enqueues a mutation and waits for its result. FIFO order is
    /// the commit order.
    pub async fn submit<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(IndexerError::ShuttingDown);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::new(move |disposition| {
            Box::pin(async move {
                let result = match disposition {
                    Disposition::Run => work.await,
                    Disposition::Cancel => Err(IndexerError::Concurrency(QUEUE_CLEARED.into())),
                };
                let _ = result_tx.send(result);
            })
        });

        self.inner.queue.lock().expect("queue poisoned").push_back(job);
        self.inner.work_available.notify_one();

        result_rx
            .await
            .unwrap_or_else(|_| Err(IndexerError::Concurrency("mutation was dropped".into())))
    }

    /// Runs `work` with exclusive access: waits until the in-flight
    /// mutation (if any) drains, keeps the queue paused and readers
    /// excluded for the duration. Concurrent rollbacks run serially.
    pub async fn run_rollback<T, F>(&self, work: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let _gate = self.inner.rollback_gate.lock().await;
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(IndexerError::ShuttingDown);
        }

        self.inner.rollback_waiting.store(true, Ordering::SeqCst);
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            // Register before checking the flag so a notify between
            // the check and the await is not lost.
            drained.as_mut().enable();
            if !self.inner.mutating.load(Ordering::SeqCst) {
                break;
            }
            drained.await;
        }

        self.inner.rollback_active.store(true, Ordering::SeqCst);
        self.inner.rollback_waiting.store(false, Ordering::SeqCst);
        debug!("rollback holds the ledger");

        let result = work.await;

        self.inner.rollback_active.store(false, Ordering::SeqCst);
        self.inner.work_available.notify_one();
        debug!("rollback released the ledger");
        result
    }

    /// Balance reads are admitted unless a rollback holds the ledger.
    pub fn may_read_balance(&self) -> bool {
        !self.inner.rollback_active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            queue_length: self.inner.queue.lock().expect("queue poisoned").len(),
            mutating: self.inner.mutating.load(Ordering::SeqCst),
            rollback_active: self.inner.rollback_active.load(Ordering::SeqCst),
            shutting_down: self.inner.shutting_down.load(Ordering::SeqCst),
        }
    }

    /// Rejects every pending mutation. The in-flight one (if any)
    /// runs to completion.
    pub async fn clear_queue(&self) -> usize {
        let jobs: Vec<Job> = {
            let mut queue = self.inner.queue.lock().expect("queue poisoned");
            queue.drain(..).collect()
        };
        let cleared = jobs.len();
        for job in jobs {
            job(Disposition::Cancel).await;
        }
        if cleared > 0 {
            info!(cleared, "pending mutations rejected");
        }
        cleared
    }

    /// Refuses new work; queued mutations still drain.
    pub fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.work_available.notify_one();
    }
}

async fn drain_loop(inner: Arc<CoordinatorInner>) {
    loop {
        let notified = inner.work_available.notified();

        let blocked = inner.rollback_active.load(Ordering::SeqCst)
            || inner.rollback_waiting.load(Ordering::SeqCst);
        let job = if blocked {
            None
        } else {
            inner.queue.lock().expect("queue poisoned").pop_front()
        };

        match job {
            Some(job) => {
                inner.mutating.store(true, Ordering::SeqCst);
                job(Disposition::Run).await;
                inner.mutating.store(false, Ordering::SeqCst);
                inner.drained.notify_waiters();
            }
            None => {
                if inner.shutting_down.load(Ordering::SeqCst)
                    && inner.queue.lock().expect("queue poisoned").is_empty()
                {
                    break;
                }
                // Bounded wait so a pause flag flip or missed notify
                // cannot stall the queue.
                let _ = tokio::time::timeout(std::time::Duration::from_millis(50), notified).await;
            }
        }
    }
    debug!("coordinator drain loop stopped");
}
