//! Bounded worker pool for message handlers.
//!
//! Pollers hand records to the pool and move on; handlers run on their own
//! tasks so a slow AI call never stalls a polling lane.
//!
//! # Admission
//!
//! ```text
//!   try_reserve ──▶ admission permits (workers + queue_capacity)
//!                      │ none left ──▶ PoolError::Saturated (caller logs and keeps the record)
//!                      ▼
//!   spawn ──────▶ concurrency permits (workers) ──▶ run handler
//! ```
//!
//! Saturation is reported to the caller instead of back-pressuring it.
//! Shutdown stops admission and waits, up to a timeout, for every admitted
//! task to finish.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{info, warn};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every worker is busy and the waiting room is full.
    #[error("Worker pool '{0}' is saturated")]
    Saturated(String),

    /// The pool no longer admits tasks.
    #[error("Worker pool '{0}' is shutting down")]
    ShuttingDown(String),

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Name used in logs and errors.
    pub name: String,
    /// Number of tasks running concurrently.
    pub num_workers: usize,
    /// Admitted tasks allowed to wait for a worker.
    pub queue_capacity: usize,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "ai-processor".to_string(),
            num_workers: 5,
            queue_capacity: 20,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(name: impl Into<String>, num_workers: usize) -> Self {
        Self {
            name: name.into(),
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    fn admission_limit(&self) -> usize {
        self.num_workers.max(1) + self.queue_capacity
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    /// Tasks currently running a handler.
    pub active_workers: usize,
    /// Tasks admitted but not yet finished (running or waiting).
    pub admitted: usize,
    pub tasks_completed: u64,
    pub tasks_rejected: u64,
    pub average_task_duration: Duration,
}

struct SharedPoolStats {
    tasks_completed: AtomicU64,
    tasks_rejected: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            tasks_completed: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

/// Decrements the active count even if the task panics.
struct ActiveGuard(Arc<SharedPoolStats>);

impl ActiveGuard {
    fn enter(stats: Arc<SharedPoolStats>) -> Self {
        stats.active_workers.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A reserved place in the pool. Dropping it without spawning frees it.
pub struct PoolSlot {
    admission: OwnedSemaphorePermit,
    concurrency: Arc<Semaphore>,
    stats: Arc<SharedPoolStats>,
}

impl PoolSlot {
    /// Runs `task` on its own tokio task once a worker is free.
    pub fn spawn<F>(self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let PoolSlot {
            admission,
            concurrency,
            stats,
        } = self;

        tokio::spawn(async move {
            // Held until the task finishes so shutdown can wait for it.
            let _admission = admission;
            let Ok(_worker) = concurrency.acquire_owned().await else {
                return;
            };
            let _active = ActiveGuard::enter(Arc::clone(&stats));
            let started = Instant::now();
            task.await;
            stats.record_completion(started.elapsed());
        });
    }
}

/// Bounded pool of handler tasks.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    admission: Arc<Semaphore>,
    concurrency: Arc<Semaphore>,
    stats: Arc<SharedPoolStats>,
    is_closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let admission = Arc::new(Semaphore::new(config.admission_limit()));
        let concurrency = Arc::new(Semaphore::new(config.num_workers.max(1)));

        Self {
            config,
            admission,
            concurrency,
            stats: Arc::new(SharedPoolStats::new()),
            is_closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Reserves a place for one task without waiting.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Saturated` when no place is free and
    /// `PoolError::ShuttingDown` after [`shutdown`](Self::shutdown).
    pub fn try_reserve(&self) -> Result<PoolSlot, PoolError> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown(self.config.name.clone()));
        }

        match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(admission) => Ok(PoolSlot {
                admission,
                concurrency: Arc::clone(&self.concurrency),
                stats: Arc::clone(&self.stats),
            }),
            Err(TryAcquireError::NoPermits) => {
                self.stats.tasks_rejected.fetch_add(1, Ordering::SeqCst);
                Err(PoolError::Saturated(self.config.name.clone()))
            }
            Err(TryAcquireError::Closed) => Err(PoolError::ShuttingDown(self.config.name.clone())),
        }
    }

    /// Stops admitting tasks and waits for admitted ones to finish.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if tasks are still running when
    /// the configured timeout expires.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let in_flight = self.config.admission_limit() - self.admission.available_permits();
        info!(pool = %self.config.name, in_flight, "Draining worker pool");

        let limit = self.config.admission_limit() as u32;
        let drained =
            tokio::time::timeout(self.config.shutdown_timeout, self.admission.acquire_many(limit))
                .await;
        self.admission.close();

        match drained {
            Ok(_) => {
                info!(pool = %self.config.name, "Worker pool drained");
                Ok(())
            }
            Err(_) => {
                warn!(
                    pool = %self.config.name,
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Worker pool did not drain in time"
                );
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let completed = self.stats.tasks_completed.load(Ordering::SeqCst);
        let total_duration_ms = self.stats.total_duration_ms.load(Ordering::SeqCst);
        let average_task_duration = if completed > 0 {
            Duration::from_millis(total_duration_ms / completed)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers: self.config.num_workers,
            active_workers: self.stats.active_workers.load(Ordering::SeqCst) as usize,
            admitted: self
                .config
                .admission_limit()
                .saturating_sub(self.admission.available_permits()),
            tasks_completed: completed,
            tasks_rejected: self.stats.tasks_rejected.load(Ordering::SeqCst),
            average_task_duration,
        }
    }
}
