//! Worker pool draining the task-meta queue.
//!
//! Each pool thread claims one pending row at a time, runs its handler
//! under the single-instance lock and records the outcome. Chains advance
//! only on success; any other outcome revokes the remaining links.
//!
//! While a handler runs, a companion thread refreshes the row's claim and
//! the lock's expiry, so neither the stale-row sweep nor a second worker
//! takes over a task that is still running.

use crate::context::TaskContext;
use crate::error::{Result, TaskError};
use crate::lock::{SingleInstanceGuard, claim_holder};
use crate::queue::{DEFAULT_QUEUE, insert_link};
use crate::registry::TaskRegistry;
use backon::{BlockingRetryable, ExponentialBuilder};
use chrono::Utc;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vcsmirror_core::{ErrorCode, TaskStatus};
use vcsmirror_store::{LockRepo, StoreError, TaskMetaRepo, TaskRecord};

const SLEEP_SLICE: Duration = Duration::from_millis(100);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Queue to drain.
    pub queue: String,
    /// Pool threads.
    pub concurrency: usize,
    /// Idle wait between empty polls.
    pub poll_interval: Duration,
    /// Runs longer than this are logged.
    pub soft_time_limit: Duration,
    /// Rows whose last heartbeat is older than this are handed out again.
    pub hard_time_limit: Duration,
    /// Lifetime of single-instance locks.
    pub lock_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            concurrency: num_cpus::get(),
            poll_interval: Duration::from_millis(500),
            soft_time_limit: Duration::from_secs(20 * 60),
            hard_time_limit: Duration::from_secs(30 * 60),
            lock_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// One finished task as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    /// Record id.
    pub task_id: Uuid,
    /// Task name.
    pub name: String,
    /// Final state.
    pub status: TaskStatus,
    /// Error code of a run that did not succeed.
    pub error_code: Option<ErrorCode>,
}

enum Outcome {
    Done(Value),
    Failed(TaskError),
    Expired,
}

/// Runs registered tasks from the queue.
#[derive(Debug)]
pub struct Worker {
    ctx: TaskContext,
    registry: Arc<TaskRegistry>,
    config: WorkerConfig,
    name: String,
}

impl Worker {
    /// Create a worker.
    #[must_use]
    pub fn new(ctx: TaskContext, registry: Arc<TaskRegistry>, config: WorkerConfig) -> Self {
        Self {
            ctx,
            registry,
            config,
            name: format!("worker-{}", std::process::id()),
        }
    }

    /// The worker's settings.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim and run one pending task on the calling thread.
    ///
    /// Returns `None` when the queue is empty.
    ///
    /// # Errors
    /// Returns a store error if the claim or the result write fails after
    /// retries. Handler failures are recorded, not returned.
    pub fn run_once(&self) -> Result<Option<Completed>> {
        let store = self.ctx.store();
        let claimed = self.with_retry("claim", || {
            store.write(|tx| TaskMetaRepo::new(tx).claim_next(&self.config.queue, Utc::now()))
        })?;
        match claimed {
            Some(record) => self.execute(&record).map(Some),
            None => Ok(None),
        }
    }

    /// Run the pool until `stop` is set.
    ///
    /// # Errors
    /// Returns error if the pool cannot be built.
    pub fn run(&self, stop: &AtomicBool) -> Result<()> {
        let threads = self.config.concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("vcsmirror-worker-{i}"))
            .build()?;

        info!(
            queue = %self.config.queue,
            concurrency = threads,
            tasks = self.registry.len(),
            "worker started"
        );
        pool.scope(|scope| {
            for slot in 0..threads {
                scope.spawn(move |_| self.poll_loop(slot, stop));
            }
        });
        info!("worker stopped");
        Ok(())
    }

    /// Hand rows stuck in `STARTED` past the hard time limit back to the queue.
    ///
    /// # Errors
    /// Returns error if the store write fails after retries.
    pub fn requeue_stale(&self) -> Result<usize> {
        let limit = chrono::Duration::from_std(self.config.hard_time_limit)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let store = self.ctx.store();
        let requeued = self.with_retry("requeue", || {
            store.write(|tx| TaskMetaRepo::new(tx).requeue_stale(Utc::now() - limit))
        })?;
        if requeued > 0 {
            warn!(requeued, "returned stale tasks to the queue");
        }
        Ok(requeued)
    }

    fn poll_loop(&self, slot: usize, stop: &AtomicBool) {
        let mut last_maintenance: Option<Instant> = None;
        while !stop.load(Ordering::Relaxed) {
            if slot == 0 && last_maintenance.is_none_or(|at| at.elapsed() >= MAINTENANCE_INTERVAL) {
                if let Err(e) = self.requeue_stale() {
                    error!(error = %e, "stale task check failed");
                }
                last_maintenance = Some(Instant::now());
            }
            match self.run_once() {
                Ok(Some(_)) => {}
                Ok(None) => sleep_until_stopped(self.config.poll_interval, stop),
                Err(e) => {
                    error!(slot, error = %e, "worker poll failed");
                    sleep_until_stopped(self.config.poll_interval, stop);
                }
            }
        }
        debug!(slot, "poll loop finished");
    }

    fn execute(&self, record: &TaskRecord) -> Result<Completed> {
        let signature = &record.signature;
        if record.is_expired(Utc::now()) {
            return self.complete(record, Outcome::Expired);
        }
        let Some(definition) = self.registry.get(&signature.name) else {
            return self.complete(record, Outcome::Failed(TaskError::UnknownTask(signature.name.clone())));
        };

        let ttl = chrono::Duration::from_std(self.config.lock_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let guard = match SingleInstanceGuard::acquire(
            self.ctx.store(),
            signature,
            definition.lock,
            claim_holder(record.task_id),
            ttl,
        ) {
            Ok(guard) => guard,
            Err(e) => return self.complete(record, Outcome::Failed(e)),
        };

        info!(task = %signature, task_id = %record.task_id, attempt = record.attempts, "task started");
        let started = Instant::now();
        let outcome = match self.with_heartbeat(record, &guard, ttl, || definition.call(&self.ctx, signature)) {
            Ok(value) => Outcome::Done(value),
            Err(e) => Outcome::Failed(e),
        };
        let elapsed = started.elapsed();
        if elapsed > self.config.soft_time_limit {
            warn!(
                task = %signature.name,
                task_id = %record.task_id,
                elapsed = ?elapsed,
                limit = ?self.config.soft_time_limit,
                "task exceeded soft time limit"
            );
        }

        let completed = self.complete(record, outcome);
        drop(guard);
        completed
    }

    /// Run `handler` while another thread keeps the claim and the lock fresh.
    fn with_heartbeat<T>(
        &self,
        record: &TaskRecord,
        guard: &SingleInstanceGuard<'_>,
        ttl: chrono::Duration,
        handler: impl FnOnce() -> T,
    ) -> T {
        let every = (self.config.lock_timeout.min(self.config.hard_time_limit) / 3).max(MIN_HEARTBEAT);
        let (finished, wait) = mpsc::channel::<()>();
        std::thread::scope(|scope| {
            scope.spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = wait.recv_timeout(every) {
                    self.heartbeat(record, guard, ttl);
                }
            });
            let value = handler();
            drop(finished);
            value
        })
    }

    fn heartbeat(&self, record: &TaskRecord, guard: &SingleInstanceGuard<'_>, ttl: chrono::Duration) {
        let now = Utc::now();
        let beat = self.ctx.store().write(|tx| {
            TaskMetaRepo::new(tx).heartbeat(record.task_id, now)?;
            LockRepo::new(tx).refresh(guard.key(), guard.holder(), now, ttl)
        });
        match beat {
            Ok(true) => {}
            Ok(false) => warn!(task = %record.signature.name, task_id = %record.task_id, "lock lost while task running"),
            Err(e) => warn!(task = %record.signature.name, task_id = %record.task_id, error = %e, "heartbeat failed"),
        }
    }

    fn complete(&self, record: &TaskRecord, outcome: Outcome) -> Result<Completed> {
        let name = &record.signature.name;
        let (status, result, traceback, code) = match outcome {
            Outcome::Done(value) => {
                info!(task = %name, task_id = %record.task_id, "task succeeded");
                (TaskStatus::Success, Some(value.to_string()), None, None)
            }
            Outcome::Failed(err @ TaskError::AlreadyRunning { .. }) => {
                info!(task = %name, task_id = %record.task_id, "task ignored, already running");
                (TaskStatus::Ignored, None, Some(err.to_string()), Some(err.code()))
            }
            Outcome::Failed(err) => {
                error!(task = %name, task_id = %record.task_id, code = %err.code(), error = %err, "task failed");
                let traceback = format!("{err}\n\n{}", Backtrace::capture());
                (TaskStatus::Failure, None, Some(traceback), Some(err.code()))
            }
            Outcome::Expired => {
                warn!(task = %name, task_id = %record.task_id, "task expired before it started");
                let expires = record.expires.map(|at| at.to_rfc3339()).unwrap_or_default();
                (
                    TaskStatus::Revoked,
                    None,
                    Some(format!("expired at {expires}")),
                    Some(ErrorCode::E0505),
                )
            }
        };

        let store = self.ctx.store();
        self.with_retry("record result", || {
            store.write(|tx| {
                let repo = TaskMetaRepo::new(tx);
                repo.mark_finished(
                    record.task_id,
                    status,
                    result.as_deref(),
                    traceback.as_deref(),
                    code.map(|c| c.as_str()),
                )?;
                if status == TaskStatus::Success {
                    if let Some((next, rest)) = record.chain_next.split_first() {
                        insert_link(&repo, next, &record.queue, Some(record.task_id), rest)?;
                    }
                } else {
                    let reason = format!("chain aborted: {name} finished as {status}");
                    let mut parent = record.task_id;
                    for link in &record.chain_next {
                        let handle = insert_link(&repo, link, &record.queue, Some(parent), &[])?;
                        repo.revoke(handle.id, &reason)?;
                        parent = handle.id;
                    }
                }
                Ok(())
            })
        })?;

        Ok(Completed {
            task_id: record.task_id,
            name: name.clone(),
            status,
            error_code: code,
        })
    }

    fn with_retry<T>(
        &self,
        what: &str,
        op: impl FnMut() -> vcsmirror_store::Result<T>,
    ) -> vcsmirror_store::Result<T> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(5)
            .with_jitter();
        op.retry(backoff)
            .sleep(std::thread::sleep)
            .when(StoreError::is_transient)
            .notify(|e: &StoreError, delay: Duration| {
                warn!(worker = %self.name, what, error = %e, delay = ?delay, "store busy, retrying");
            })
            .call()
    }
}

fn sleep_until_stopped(total: Duration, stop: &AtomicBool) {
    let mut slept = Duration::ZERO;
    while slept < total && !stop.load(Ordering::Relaxed) {
        let slice = SLEEP_SLICE.min(total - slept);
        std::thread::sleep(slice);
        slept += slice;
    }
}
