//! Worker Pool
//!
//! Bounded task pool on the tokio runtime, shared by the per-event batch
//! tasks and analysis dispatch.
//!
//! - At most `max_workers` tasks run at once.
//! - Up to `queue_capacity` more are admitted and wait for a slot.
//! - When both are full the submitter runs the task itself (caller-runs),
//!   which slows the consumer down instead of dropping work.
//! - Detached submissions never run on the caller; when the pool is full
//!   they queue past `queue_capacity` and still wait for a worker slot.
//!
//! Shutdown closes the pool to new work, waits `termination_grace` for
//! admitted tasks to finish and aborts whatever is still running.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::infrastructure::metrics::{record_caller_runs, record_pool_overflow};

/// Pool sizing.
#[derive(Debug, Clone)]
pub struct WorkerPoolSettings {
    /// Runtime worker threads.
    pub core_workers: usize,
    /// Tasks allowed to run concurrently.
    pub max_workers: usize,
    /// Admitted tasks allowed to wait for a slot.
    pub queue_capacity: usize,
    /// How long shutdown waits before aborting.
    pub termination_grace: Duration,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            core_workers: 10,
            max_workers: 50,
            queue_capacity: 100,
            termination_grace: Duration::from_secs(60),
        }
    }
}

/// Pool task errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was aborted at shutdown.
    #[error("task aborted at shutdown")]
    Aborted,

    /// The pool no longer accepts work.
    #[error("worker pool is shut down")]
    ShutDown,
}

/// Handle to submitted work.
///
/// Dropping the handle detaches the task; it keeps running.
#[must_use = "join the task or drop it to detach"]
pub struct PoolTask<T> {
    inner: TaskInner<T>,
}

enum TaskInner<T> {
    Spawned(JoinHandle<Option<T>>),
    Ran(Result<T, PoolError>),
}

impl<T> PoolTask<T> {
    /// Whether the submitter ran the task itself.
    #[must_use]
    pub const fn ran_inline(&self) -> bool {
        matches!(self.inner, TaskInner::Ran(_))
    }

    /// Wait for the task's output.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] if the task panicked, was aborted, or was
    /// rejected because the pool is shut down.
    pub async fn join(self) -> Result<T, PoolError> {
        match self.inner {
            TaskInner::Ran(result) => result,
            TaskInner::Spawned(handle) => match handle.await {
                Ok(Some(output)) => Ok(output),
                Ok(None) => Err(PoolError::Aborted),
                Err(e) if e.is_panic() => Err(PoolError::Panicked(panic_message(&*e.into_panic()))),
                Err(_) => Err(PoolError::Aborted),
            },
        }
    }
}

/// Bounded pool with caller-runs saturation.
pub struct WorkerPool {
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
    abort: CancellationToken,
    settings: WorkerPoolSettings,
}

impl WorkerPool {
    /// Create a pool. Zero `max_workers` is treated as one.
    #[must_use]
    pub fn new(settings: WorkerPoolSettings) -> Self {
        let max_workers = settings.max_workers.max(1);
        Self {
            admission: Arc::new(Semaphore::new(max_workers + settings.queue_capacity)),
            workers: Arc::new(Semaphore::new(max_workers)),
            tracker: TaskTracker::new(),
            abort: CancellationToken::new(),
            settings,
        }
    }

    /// Sizing this pool was built with.
    #[must_use]
    pub const fn settings(&self) -> &WorkerPoolSettings {
        &self.settings
    }

    /// Tasks admitted and not yet finished (running or waiting).
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Submit `task`.
    ///
    /// Returns once the task is admitted, or once it has run on the caller
    /// if the pool is saturated.
    pub async fn submit<F>(&self, task: F) -> PoolTask<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.tracker.is_closed() {
            return PoolTask {
                inner: TaskInner::Ran(Err(PoolError::ShutDown)),
            };
        }

        let Ok(admitted) = Arc::clone(&self.admission).try_acquire_owned() else {
            record_caller_runs();
            tracing::debug!(
                max_workers = self.settings.max_workers,
                queue_capacity = self.settings.queue_capacity,
                "Worker pool saturated, running task on caller"
            );
            let result = AssertUnwindSafe(task)
                .catch_unwind()
                .await
                .map_err(|payload| PoolError::Panicked(panic_message(&*payload)));
            return PoolTask {
                inner: TaskInner::Ran(result),
            };
        };

        PoolTask {
            inner: TaskInner::Spawned(self.spawn_tracked(Some(admitted), task)),
        }
    }

    /// Submit `task` without ever running it on the caller.
    ///
    /// A full pool queues the task past `queue_capacity`; it still waits for
    /// a worker slot and is still drained or aborted by shutdown.
    pub fn submit_detached<F>(&self, task: F) -> PoolTask<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.tracker.is_closed() {
            return PoolTask {
                inner: TaskInner::Ran(Err(PoolError::ShutDown)),
            };
        }

        let admitted = Arc::clone(&self.admission).try_acquire_owned().ok();
        if admitted.is_none() {
            record_pool_overflow();
            tracing::debug!(
                queue_capacity = self.settings.queue_capacity,
                "Worker pool saturated, queueing detached task past capacity"
            );
        }

        PoolTask {
            inner: TaskInner::Spawned(self.spawn_tracked(admitted, task)),
        }
    }

    fn spawn_tracked<F>(
        &self,
        admitted: Option<OwnedSemaphorePermit>,
        task: F,
    ) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let workers = Arc::clone(&self.workers);
        let abort = self.abort.clone();
        self.tracker.spawn(async move {
            let _admitted = admitted;
            tokio::select! {
                biased;
                () = abort.cancelled() => None,
                output = async move {
                    let _slot = workers.acquire_owned().await;
                    task.await
                } => Some(output),
            }
        })
    }

    /// Stop accepting work and wait for admitted tasks.
    ///
    /// Tasks still running after the grace period are aborted. Returns
    /// `true` if everything finished within the grace period.
    pub async fn shutdown(&self) -> bool {
        self.shutdown_within(self.settings.termination_grace).await
    }

    /// [`Self::shutdown`] with an explicit grace period.
    pub async fn shutdown_within(&self, grace: Duration) -> bool {
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            tracing::info!("Worker pool drained");
            return true;
        }

        tracing::warn!(
            remaining = self.tracker.len(),
            grace_secs = grace.as_secs(),
            "Worker pool did not drain in time, aborting remaining tasks"
        );
        self.abort.cancel();
        self.tracker.wait().await;
        false
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
