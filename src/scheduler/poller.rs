//! Priority-lane polling over one stream and consumer group.
//!
//! Three lanes (high, medium, low) poll the same consumer group on their own
//! cadence and batch size. Every record ends up with the lane matching its
//! priority tag and is handed to the [`WorkerPool`]; the handler outcome is
//! settled by the [`AckRetryManager`].
//!
//! Priority is best-effort: lanes share one cursor, so a busy high lane can
//! read low records before the low lane does. Those are parked in the
//! [`Handoff`] rather than processed out of lane.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::lane::{Handoff, Lane};
use super::worker_pool::{PoolError, PoolStats, WorkerPool};
use crate::config::LanesConfig;
use crate::error::{ProcessingError, StoreError};
use crate::metrics::{MetricsCollector, Outcome};
use crate::queue::{record_priority, AckRetryManager, Disposition, Envelope, Priority};
use crate::stream::{GroupStart, LogStore, StreamRecord};

/// Handles one decoded envelope.
///
/// Errors are settled by the scheduler: unroutable errors drop the record,
/// anything else goes through the retry policy.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: &Envelope) -> Result<(), ProcessingError>;
}

/// Errors raised while starting or stopping a scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Failed to prepare consumer group: {0}")]
    Store(#[from] StoreError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Where and how a scheduler reads.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub group_start: GroupStart,
    pub block_timeout: Duration,
    pub lanes: LanesConfig,
}

struct Shared {
    config: SchedulerConfig,
    store: Arc<dyn LogStore>,
    handler: Arc<dyn MessageHandler>,
    acks: AckRetryManager,
    pool: Arc<WorkerPool>,
    handoff: Handoff,
    metrics: MetricsCollector,
}

/// Three polling lanes feeding a bounded worker pool.
pub struct PriorityScheduler {
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
    lane_handles: Mutex<Vec<JoinHandle<()>>>,
    is_running: AtomicBool,
}

impl PriorityScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn LogStore>,
        handler: Arc<dyn MessageHandler>,
        acks: AckRetryManager,
        pool: Arc<WorkerPool>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let handoff = Handoff::new(config.lanes.max_parked);
        Self {
            shared: Arc::new(Shared {
                config,
                store,
                handler,
                acks,
                pool,
                handoff,
                metrics: MetricsCollector::new(),
            }),
            shutdown_tx,
            lane_handles: Mutex::new(Vec::new()),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn stream(&self) -> &str {
        &self.shared.config.stream
    }

    pub fn group(&self) -> &str {
        &self.shared.config.group
    }

    /// Creates the consumer group if needed and starts the three lanes.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Store` if the group cannot be created.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        if let Err(e) = self.shared.ensure_group().await {
            self.is_running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let mut handles = Vec::with_capacity(3);
        for lane in Lane::all(&self.shared.config.lanes) {
            let shared = Arc::clone(&self.shared);
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                shared.run_lane(lane, shutdown_rx).await;
            }));
        }
        self.lanes_lock().extend(handles);

        info!(
            stream = %self.shared.config.stream,
            group = %self.shared.config.group,
            pool = %self.shared.pool.name(),
            "Priority scheduler started"
        );
        Ok(())
    }

    /// Runs one polling cycle of a lane and returns how many records were
    /// handed to the pool.
    pub async fn poll_once(&self, priority: Priority) -> Result<usize, StoreError> {
        let lane = Lane::new(priority, self.shared.config.lanes.get(priority));
        self.shared.poll(lane).await
    }

    /// Stops the lanes, then drains the worker pool.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Pool` if in-flight handlers outlive the
    /// pool's shutdown timeout. Their records stay pending in the log.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // Lanes may already have exited
        let _ = self.shutdown_tx.send(());

        let handles = std::mem::take(&mut *self.lanes_lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Polling lane panicked during shutdown");
            }
        }

        let parked: usize = Priority::ALL
            .iter()
            .map(|p| self.shared.handoff.len(*p))
            .sum();
        if parked > 0 {
            warn!(
                stream = %self.shared.config.stream,
                parked,
                "Parked records left pending at shutdown"
            );
        }

        self.shared.pool.shutdown().await?;
        info!(stream = %self.shared.config.stream, "Priority scheduler stopped");
        Ok(())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Records parked for `priority` and not yet dispatched.
    pub fn parked(&self, priority: Priority) -> usize {
        self.shared.handoff.len(priority)
    }

    fn lanes_lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.lane_handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Shared {
    async fn ensure_group(&self) -> Result<(), StoreError> {
        let created = self
            .store
            .create_group(
                &self.config.stream,
                &self.config.group,
                self.config.group_start,
            )
            .await?;
        if created {
            info!(
                stream = %self.config.stream,
                group = %self.config.group,
                start = self.config.group_start.as_offset(),
                "Created consumer group"
            );
        }
        Ok(())
    }

    async fn run_lane(self: Arc<Self>, lane: Lane, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(
            stream = %self.config.stream,
            priority = %lane.priority,
            interval_ms = lane.interval.as_millis() as u64,
            batch_size = lane.batch_size,
            "Polling lane started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(lane.interval) => {}
            }

            if let Err(e) = self.poll(lane).await {
                if e.is_missing_group() {
                    warn!(
                        stream = %self.config.stream,
                        group = %self.config.group,
                        priority = %lane.priority,
                        "Consumer group missing, waiting for health check"
                    );
                } else {
                    error!(
                        stream = %self.config.stream,
                        priority = %lane.priority,
                        error = %e,
                        "Polling lane read failed"
                    );
                }
            }
        }

        debug!(stream = %self.config.stream, priority = %lane.priority, "Polling lane stopped");
    }

    async fn poll(self: &Arc<Self>, lane: Lane) -> Result<usize, StoreError> {
        // Records parked by other lanes come first.
        let mut saturated = false;
        let mut dispatched = self.handoff.drain_with(lane.priority, lane.batch_size, |record| {
            let result = self.dispatch(lane.priority, record);
            saturated = result.is_err();
            result
        });
        if saturated {
            return Ok(dispatched);
        }

        let wanted = lane.batch_size.saturating_sub(dispatched);
        if wanted == 0 {
            return Ok(dispatched);
        }
        let reservation = self.handoff.reserve(wanted);
        if reservation.granted() == 0 {
            debug!(
                stream = %self.config.stream,
                priority = %lane.priority,
                max_parked = self.handoff.max_parked(),
                "Handoff full, skipping read"
            );
            return Ok(dispatched);
        }

        let records = self
            .store
            .read_new(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                reservation.granted(),
                self.config.block_timeout,
            )
            .await?;

        if !records.is_empty() {
            debug!(
                stream = %self.config.stream,
                priority = %lane.priority,
                count = records.len(),
                "Read records"
            );
        }

        for record in records {
            // Untagged records are handled where read; decoding drops them.
            let owner = record_priority(&record).unwrap_or(lane.priority);
            if owner != lane.priority {
                debug!(
                    stream = %self.config.stream,
                    record_id = %record.id,
                    lane = %lane.priority,
                    owner = %owner,
                    "Parking record for its own lane"
                );
                self.handoff.park(owner, record);
                continue;
            }

            if saturated {
                self.handoff.park(owner, record);
                continue;
            }
            match self.dispatch(lane.priority, record) {
                Ok(()) => dispatched += 1,
                Err(record) => {
                    saturated = true;
                    self.handoff.park(owner, record);
                }
            }
        }

        Ok(dispatched)
    }

    /// Hands a record to the pool, or gives it back if the pool is full.
    fn dispatch(self: &Arc<Self>, priority: Priority, record: StreamRecord) -> Result<(), StreamRecord> {
        match self.pool.try_reserve() {
            Ok(slot) => {
                let shared = Arc::clone(self);
                slot.spawn(async move { shared.process(record).await });
                Ok(())
            }
            Err(e) => {
                warn!(
                    stream = %self.config.stream,
                    record_id = %record.id,
                    priority = %priority,
                    error = %e,
                    "Dispatch rejected, record kept for the next cycle"
                );
                self.metrics.record_rejection(&self.config.stream, priority);
                Err(record)
            }
        }
    }

    /// Runs the handler for one record and settles it. Never fails.
    async fn process(&self, record: StreamRecord) {
        let stream = self.config.stream.as_str();
        let topic = record.field("topic").unwrap_or("unknown").to_string();
        self.metrics.task_started(stream);
        let started = Instant::now();

        let disposition = match Envelope::from_record(&record) {
            Err(e) => {
                self.acks
                    .drop_unroutable(record.id, &ProcessingError::from(e))
                    .await
            }
            Ok(envelope) => match self.handler.handle(&envelope).await {
                Ok(()) => {
                    info!(
                        stream,
                        topic = %envelope.topic,
                        message_id = %envelope.message_id,
                        retry_count = envelope.retry_count,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Message processed"
                    );
                    self.acks.on_success(record.id, &envelope).await
                }
                Err(e) if e.is_unroutable() => self.acks.drop_unroutable(record.id, &e).await,
                Err(e) => self.acks.on_failure(record.id, &envelope, &e).await,
            },
        };

        let outcome = match disposition {
            Disposition::Acked => Outcome::Acked,
            Disposition::Retried { .. } => Outcome::Retried,
            Disposition::Poisoned => Outcome::Poisoned,
            Disposition::Dropped => Outcome::Dropped,
            Disposition::Withheld => Outcome::Withheld,
        };
        self.metrics
            .record_message(stream, &topic, outcome, started.elapsed());
        self.metrics.task_finished(stream);
    }
}
