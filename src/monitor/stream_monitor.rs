//! Scheduled stream maintenance and operator recovery actions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::health::{GroupInfo, HealthSnapshot, RequeueReport, StreamInfo, TrimReport};
use crate::config::QueueConfig;
use crate::error::StoreError;
use crate::metrics::MetricsCollector;
use crate::queue::{AckRetryManager, Envelope, RetryPolicy};
use crate::stream::{GroupStart, LogStore, RecordId};

/// Pending entries fetched per round by bulk acknowledgment.
const PENDING_PAGE: usize = 100;

/// Most pending entries inspected by one requeue pass.
const REQUEUE_LIMIT: usize = 10_000;

/// Periodic depth sampling, trimming and group healing over both streams.
pub struct StreamMonitor {
    store: Arc<dyn LogStore>,
    config: QueueConfig,
    metrics: MetricsCollector,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    is_running: AtomicBool,
}

impl StreamMonitor {
    pub fn new(store: Arc<dyn LogStore>, config: QueueConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            config,
            metrics: MetricsCollector::new(),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// The groups this pipeline owns, as `(stream, group)` pairs.
    fn owned_groups(&self) -> Vec<(&str, &str)> {
        let mut groups = vec![(
            self.config.streams.requests.as_str(),
            self.config.consumer.group.as_str(),
        )];
        if self.config.responses.enabled {
            groups.push((
                self.config.streams.responses.as_str(),
                self.config.responses.group.as_str(),
            ));
        }
        groups
    }

    fn streams(&self) -> [(&str, u64); 2] {
        [
            (
                self.config.streams.requests.as_str(),
                self.config.monitor.request_max_len,
            ),
            (
                self.config.streams.responses.as_str(),
                self.config.monitor.response_max_len,
            ),
        ]
    }

    /// Samples stream lengths and pending counts into the gauges.
    ///
    /// Logs a warning for every stream deeper than the threshold; nothing
    /// is throttled.
    pub async fn sample_depths(&self) -> Result<Vec<StreamInfo>, StoreError> {
        let mut infos = Vec::with_capacity(2);
        for (stream, _) in self.streams() {
            let info = self.stream_info(stream).await?;
            self.metrics.set_queue_depth(stream, info.length);
            for group in &info.groups {
                self.metrics.set_pending(stream, &group.name, group.pending);
            }

            if info.length > self.config.monitor.depth_threshold {
                warn!(
                    stream,
                    depth = info.length,
                    pending = info.pending_total(),
                    threshold = self.config.monitor.depth_threshold,
                    "Stream backlog above threshold"
                );
            } else {
                debug!(stream, depth = info.length, "Sampled stream depth");
            }
            infos.push(info);
        }
        Ok(infos)
    }

    /// Trims both streams by age and retained count.
    pub async fn trim_streams(&self) -> Result<Vec<TrimReport>, StoreError> {
        let mut reports = Vec::with_capacity(2);
        for (stream, max_len) in self.streams() {
            reports.push(self.trim_stream(stream, max_len).await?);
        }
        Ok(reports)
    }

    /// Removes records older than the age limit or beyond `max_len`.
    ///
    /// The boundary never passes the oldest pending entry or the first
    /// undelivered record of any group on the stream, so no work is removed
    /// before a group has seen and acknowledged it. A stalled group therefore
    /// lets its stream grow past `max_len`; the depth warning reports it.
    pub async fn trim_stream(&self, stream: &str, max_len: u64) -> Result<TrimReport, StoreError> {
        let mut report = TrimReport {
            stream: stream.to_string(),
            boundary: None,
            removed: 0,
            clamped: false,
        };
        if !self.store.exists(stream).await? {
            return Ok(report);
        }

        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let max_age_ms = self.config.monitor.max_age_secs.saturating_mul(1000);
        let age_cutoff = RecordId::at_millis(now_ms.saturating_sub(max_age_ms));
        let count_cutoff = self.store.retention_boundary(stream, max_len).await?;

        let mut boundary = match count_cutoff {
            Some(id) => id.max(age_cutoff),
            None => age_cutoff,
        };

        for group in self.store.list_groups(stream).await? {
            if let Some(pending) = self.store.oldest_pending(stream, &group).await? {
                if pending < boundary {
                    warn!(
                        stream,
                        group = %group,
                        boundary = %boundary,
                        oldest_pending = %pending,
                        "Trim boundary held back by pending entry"
                    );
                    boundary = pending;
                    report.clamped = true;
                }
            }

            // Records after the cursor have not reached this group yet.
            let unread = self.store.last_delivered(stream, &group).await?.successor();
            if unread < boundary {
                warn!(
                    stream,
                    group = %group,
                    boundary = %boundary,
                    first_unread = %unread,
                    "Trim boundary held back by undelivered records"
                );
                boundary = unread;
                report.clamped = true;
            }
        }

        let removed = self.store.trim_before(stream, boundary).await?;
        report.boundary = Some(boundary.to_string());
        report.removed = removed;
        if removed > 0 {
            self.metrics.record_trim(stream, removed);
            info!(stream, removed, boundary = %boundary, "Trimmed stream");
        }
        Ok(report)
    }

    /// Recreates any missing consumer group owned by this pipeline.
    ///
    /// Returns the `(stream, group)` pairs that had to be recreated.
    pub async fn ensure_groups(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut recreated = Vec::new();
        for (stream, group) in self.owned_groups() {
            if self.store.group_exists(stream, group).await? {
                continue;
            }
            let start = self.config.consumer.group_start;
            if self.store.create_group(stream, group, start).await? {
                warn!(stream, group, start = start.as_offset(), "Recreated missing consumer group");
                self.metrics.record_group_recreated(stream, group);
                recreated.push((stream.to_string(), group.to_string()));
            }
        }
        Ok(recreated)
    }

    /// Length and group state of one stream.
    pub async fn stream_info(&self, stream: &str) -> Result<StreamInfo, StoreError> {
        let exists = self.store.exists(stream).await?;
        if !exists {
            return Ok(StreamInfo {
                stream: stream.to_string(),
                exists,
                length: 0,
                groups: Vec::new(),
            });
        }

        let length = self.store.len(stream).await?;
        let names = self.store.list_groups(stream).await?;
        let mut groups = try_join_all(names.into_iter().map(|name| async move {
            let pending = self.store.pending_count(stream, &name).await?;
            let oldest_pending = self
                .store
                .oldest_pending(stream, &name)
                .await?
                .map(|id| id.to_string());
            Ok::<_, StoreError>(GroupInfo {
                name,
                pending,
                oldest_pending,
            })
        }))
        .await?;
        groups.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(StreamInfo {
            stream: stream.to_string(),
            exists,
            length,
            groups,
        })
    }

    pub async fn health_snapshot(&self) -> Result<HealthSnapshot, StoreError> {
        Ok(HealthSnapshot {
            enabled: self.config.enabled,
            response_delivery_enabled: self.config.responses.enabled,
            monitor_enabled: self.config.monitor.enabled,
            topics: self.config.topics.clone(),
            request_group: self.config.consumer.group.clone(),
            response_group: self.config.responses.group.clone(),
            requests: self.stream_info(&self.config.streams.requests).await?,
            responses: self.stream_info(&self.config.streams.responses).await?,
            sampled_at: Utc::now(),
        })
    }

    /// Heals groups and samples depths right away, then reports.
    pub async fn trigger_manual_check(&self) -> Result<HealthSnapshot, StoreError> {
        info!("Manual stream check triggered");
        let recreated = self.ensure_groups().await?;
        if !recreated.is_empty() {
            info!(count = recreated.len(), "Manual check recreated consumer groups");
        }
        self.sample_depths().await?;
        self.health_snapshot().await
    }

    /// Acknowledges every pending entry of a group without processing it.
    ///
    /// The affected work is dropped. Returns how many entries were acked.
    pub async fn acknowledge_all_pending(&self, stream: &str, group: &str) -> Result<u64, StoreError> {
        let mut total = 0;
        loop {
            let entries = self.store.pending(stream, group, PENDING_PAGE).await?;
            if entries.is_empty() {
                break;
            }
            let ids: Vec<RecordId> = entries.iter().map(|e| e.id).collect();
            let acked = self.store.ack(stream, group, &ids).await?;
            total += acked;
            if acked == 0 {
                break;
            }
        }

        warn!(stream, group, acknowledged = total, "Acknowledged all pending entries");
        Ok(total)
    }

    /// Destroys and recreates a consumer group, resetting its cursor.
    ///
    /// Pending entries of the old group are lost. With
    /// [`GroupStart::Beginning`] every retained record is delivered again;
    /// with [`GroupStart::Latest`] the retained backlog is skipped.
    pub async fn reset_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<(), StoreError> {
        let pending = self.store.pending_count(stream, group).await.unwrap_or(0);
        let destroyed = self.store.destroy_group(stream, group).await?;
        self.store.create_group(stream, group, start).await?;
        warn!(
            stream,
            group,
            destroyed,
            dropped_pending = pending,
            start = start.as_offset(),
            "Consumer group reset"
        );
        Ok(())
    }

    /// Republishes pending entries idle for at least `min_idle` as a new
    /// attempt, acknowledging the originals.
    ///
    /// Entries that are no longer retained, cannot be decoded or have no
    /// retries left are acknowledged and counted as abandoned.
    pub async fn requeue_stale_pending(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
    ) -> Result<RequeueReport, StoreError> {
        let acks = AckRetryManager::new(
            Arc::clone(&self.store),
            stream,
            group,
            RetryPolicy::from_config(&self.config),
        );
        let mut report = RequeueReport::default();

        let entries = self.store.pending(stream, group, REQUEUE_LIMIT).await?;
        for entry in entries {
            if entry.idle < min_idle {
                report.skipped += 1;
                continue;
            }

            let Some(record) = self.store.get(stream, entry.id).await? else {
                warn!(stream, group, record_id = %entry.id, "Pending record no longer retained, abandoning");
                acks.ack(entry.id).await;
                report.abandoned += 1;
                continue;
            };

            let envelope = match Envelope::from_record(&record) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(stream, group, record_id = %entry.id, error = %e, "Undecodable pending record, abandoning");
                    acks.ack(entry.id).await;
                    report.abandoned += 1;
                    continue;
                }
            };

            if acks.policy().is_exhausted(envelope.retry_count) {
                error!(
                    stream,
                    group,
                    record_id = %entry.id,
                    message_id = %envelope.message_id,
                    retry_count = envelope.retry_count,
                    "Pending message out of retries, dropping"
                );
                acks.ack(entry.id).await;
                report.abandoned += 1;
                continue;
            }

            match acks.republish(entry.id, &envelope).await {
                Ok(_) => report.requeued += 1,
                Err(e) => {
                    error!(stream, group, record_id = %entry.id, error = %e, "Failed to requeue pending record");
                }
            }
        }

        info!(
            stream,
            group,
            requeued = report.requeued,
            abandoned = report.abandoned,
            skipped = report.skipped,
            "Requeued stale pending entries"
        );
        Ok(report)
    }

    /// Starts the scheduled duties. Does nothing when the monitor is
    /// disabled or already running.
    pub fn start(self: &Arc<Self>) {
        if !self.config.monitor.enabled {
            info!("Stream monitor disabled");
            return;
        }
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let monitor = &self.config.monitor;
        let duties = [
            (Duty::Depth, Duration::from_secs(monitor.depth_interval_secs)),
            (Duty::Trim, Duration::from_secs(monitor.trim_interval_secs)),
            (Duty::Groups, Duration::from_secs(monitor.group_check_interval_secs)),
        ];

        let mut handles = self.handles_lock();
        for (duty, period) in duties {
            let this = Arc::clone(self);
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                this.run_duty(duty, period, shutdown_rx).await;
            }));
        }
        info!("Stream monitor started");
    }

    /// Stops the scheduled duties and waits for them to exit.
    pub async fn shutdown(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        let handles = std::mem::take(&mut *self.handles_lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Monitor duty panicked during shutdown");
            }
        }
        info!("Stream monitor stopped");
    }

    async fn run_duty(&self, duty: Duty, period: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(period.max(Duration::from_millis(1)));
        tick.tick().await; // skip the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tick.tick() => {}
            }

            let result = match duty {
                Duty::Depth => self.sample_depths().await.map(|_| ()),
                Duty::Trim => self.trim_streams().await.map(|_| ()),
                Duty::Groups => self.ensure_groups().await.map(|_| ()),
            };
            if let Err(e) = result {
                error!(duty = duty.as_str(), error = %e, "Monitor duty failed");
            }
        }
    }

    fn handles_lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy)]
enum Duty {
    Depth,
    Trim,
    Groups,
}

impl Duty {
    fn as_str(&self) -> &'static str {
        match self {
            Duty::Depth => "depth",
            Duty::Trim => "trim",
            Duty::Groups => "groups",
        }
    }
}
