//! Acknowledgment and bounded retry.
//!
//! Every record read by a consumer ends in exactly one [`Disposition`]:
//!
//! ```text
//!   handler ok ───────────────────────────────▶ Acked
//!   unroutable (unknown topic, bad envelope) ──▶ Dropped   (ack + warn)
//!   handler failed, budget left ──────────────▶ Retried   (timer task started)
//!        timer: backoff ──▶ republish retryCount+1 ──▶ ack
//!                               └─ republish failed ──▶ Withheld
//!   handler failed, budget spent ──────────────▶ Poisoned  (ack + error log)
//! ```
//!
//! The backoff runs on its own task, so a failing message gives its worker
//! back at once. Until the timer fires the original record stays pending; if
//! the process stops first, or the republish fails, the monitor's requeue
//! action can pick it up again. A message is attempted at most `max_retries`
//! times.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::envelope::Envelope;
use super::producer::append_envelope;
use crate::config::QueueConfig;
use crate::error::{EnqueueError, ProcessingError};
use crate::metrics::{MetricsCollector, Outcome};
use crate::stream::{LogStore, RecordId};

/// Final state of one consumed record.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Acked,
    /// The next attempt is appended after `delay`.
    Retried { next_message_id: Uuid, delay: Duration },
    Poisoned,
    Dropped,
    Withheld,
}

/// Attempt budget and exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per message, first attempt included.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.processors.max_retries,
            base_delay: Duration::from_millis(config.processors.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.processors.retry_max_delay_ms),
        }
    }

    /// Whether the attempt that carried `retry_count` was the last one allowed.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count.saturating_add(1) >= self.max_retries
    }

    /// Delay before republishing after the attempt that carried `retry_count`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Acknowledges, retries or drops consumed records on one stream and group.
#[derive(Clone)]
pub struct AckRetryManager {
    store: Arc<dyn LogStore>,
    stream: String,
    group: String,
    policy: RetryPolicy,
    metrics: MetricsCollector,
}

impl AckRetryManager {
    pub fn new(
        store: Arc<dyn LogStore>,
        stream: impl Into<String>,
        group: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            stream: stream.into(),
            group: group.into(),
            policy,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Acknowledges a record. Repeating the call is harmless.
    ///
    /// Returns whether the record was still pending.
    pub async fn ack(&self, record_id: RecordId) -> bool {
        match self.store.ack(&self.stream, &self.group, &[record_id]).await {
            Ok(count) => count > 0,
            Err(e) => {
                error!(
                    stream = %self.stream,
                    group = %self.group,
                    record_id = %record_id,
                    error = %e,
                    "Failed to acknowledge record"
                );
                false
            }
        }
    }

    pub async fn on_success(&self, record_id: RecordId, envelope: &Envelope) -> Disposition {
        self.ack(record_id).await;
        tracing::debug!(
            stream = %self.stream,
            record_id = %record_id,
            message_id = %envelope.message_id,
            "Acknowledged record"
        );
        Disposition::Acked
    }

    /// Acknowledges a record that can never be handled.
    pub async fn drop_unroutable(&self, record_id: RecordId, reason: &ProcessingError) -> Disposition {
        warn!(
            stream = %self.stream,
            record_id = %record_id,
            error = %reason,
            "Dropping unroutable record"
        );
        self.ack(record_id).await;
        Disposition::Dropped
    }

    /// Settles a failed attempt: schedules a retry after backoff, or
    /// poison-drops once the budget is spent.
    ///
    /// Returns without waiting for the backoff.
    pub async fn on_failure(
        &self,
        record_id: RecordId,
        envelope: &Envelope,
        failure: &ProcessingError,
    ) -> Disposition {
        if self.policy.is_exhausted(envelope.retry_count) {
            error!(
                stream = %self.stream,
                record_id = %record_id,
                message_id = %envelope.message_id,
                origin_message_id = %envelope.origin(),
                topic = %envelope.topic,
                attempts = envelope.retry_count + 1,
                error = %failure,
                "Retry budget exhausted, dropping poison message"
            );
            self.ack(record_id).await;
            return Disposition::Poisoned;
        }

        let delay = self.policy.backoff(envelope.retry_count);
        let next = envelope.next_attempt();
        let next_message_id = next.message_id;
        warn!(
            stream = %self.stream,
            record_id = %record_id,
            message_id = %envelope.message_id,
            topic = %envelope.topic,
            retry_count = envelope.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Message failed, scheduling retry"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            manager.retry_after(record_id, next, delay).await;
        });

        Disposition::Retried {
            next_message_id,
            delay,
        }
    }

    /// Waits `delay`, then appends `next` and acknowledges the original.
    pub async fn retry_after(&self, record_id: RecordId, next: Envelope, delay: Duration) -> Disposition {
        tokio::time::sleep(delay).await;

        match self.publish_next(record_id, &next).await {
            Ok(()) => Disposition::Retried {
                next_message_id: next.message_id,
                delay,
            },
            Err(e) => {
                error!(
                    stream = %self.stream,
                    record_id = %record_id,
                    message_id = %next.message_id,
                    error = %e,
                    "Failed to republish retry, leaving record pending"
                );
                self.metrics.record_outcome(&self.stream, &next.topic, Outcome::Withheld);
                Disposition::Withheld
            }
        }
    }

    /// Appends the next attempt of `envelope`, then acknowledges the
    /// original record.
    ///
    /// The original is only acknowledged once the copy is durable, so a
    /// failed append leaves it pending.
    pub async fn republish(
        &self,
        record_id: RecordId,
        envelope: &Envelope,
    ) -> Result<Uuid, EnqueueError> {
        let next = envelope.next_attempt();
        self.publish_next(record_id, &next).await?;
        Ok(next.message_id)
    }

    async fn publish_next(&self, record_id: RecordId, next: &Envelope) -> Result<(), EnqueueError> {
        let new_record = append_envelope(self.store.as_ref(), &self.stream, next).await?;
        self.ack(record_id).await;

        info!(
            stream = %self.stream,
            record_id = %record_id,
            new_record_id = %new_record,
            message_id = %next.message_id,
            origin_message_id = %next.origin(),
            retry_count = next.retry_count,
            "Republished message for retry"
        );
        Ok(())
    }
}
