//! Recording facade over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library users that never export metrics pay nothing.

use std::time::Duration;

use super::prometheus::{
    DISPATCH_REJECTIONS, ENQUEUED_TOTAL, GROUPS_RECREATED, HANDLER_DURATION, IN_FLIGHT,
    MESSAGES_TOTAL, PENDING_ENTRIES, POISON_DROPS, QUEUE_DEPTH, TRIMMED_TOTAL,
};
use crate::queue::Priority;

/// How a consumer finished with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handled successfully and acknowledged.
    Acked,
    /// Another attempt scheduled after backoff.
    Retried,
    /// Retry budget exhausted; force-acknowledged.
    Poisoned,
    /// Unroutable; acknowledged without handling.
    Dropped,
    /// Left pending because the retry could not be republished.
    Withheld,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Acked => "acked",
            Outcome::Retried => "retried",
            Outcome::Poisoned => "poisoned",
            Outcome::Dropped => "dropped",
            Outcome::Withheld => "withheld",
        }
    }
}

/// Metrics collector for recording queue metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record how a message ended and how long its handler ran.
    pub fn record_message(&self, stream: &str, topic: &str, outcome: Outcome, elapsed: Duration) {
        if let Some(total) = MESSAGES_TOTAL.get() {
            total
                .with_label_values(&[stream, topic, outcome.as_str()])
                .inc();
        }
        if let Some(duration) = HANDLER_DURATION.get() {
            duration
                .with_label_values(&[stream, topic])
                .observe(elapsed.as_secs_f64());
        }
        if outcome == Outcome::Poisoned {
            if let Some(poison) = POISON_DROPS.get() {
                poison.with_label_values(&[stream, topic]).inc();
            }
        }

        tracing::trace!(
            stream = stream,
            topic = topic,
            outcome = outcome.as_str(),
            "Recorded message metric"
        );
    }

    /// Count an outcome settled away from the handler, such as a retry
    /// whose republish failed after the backoff.
    pub fn record_outcome(&self, stream: &str, topic: &str, outcome: Outcome) {
        if let Some(total) = MESSAGES_TOTAL.get() {
            total
                .with_label_values(&[stream, topic, outcome.as_str()])
                .inc();
        }
    }

    /// Poison drops recorded so far for a stream and topic.
    pub fn poison_drops(&self, stream: &str, topic: &str) -> u64 {
        POISON_DROPS
            .get()
            .map_or(0, |poison| poison.with_label_values(&[stream, topic]).get() as u64)
    }

    pub fn record_enqueue(&self, stream: &str, topic: &str, priority: Priority) {
        if let Some(total) = ENQUEUED_TOTAL.get() {
            total
                .with_label_values(&[stream, topic, priority.as_str()])
                .inc();
        }
    }

    pub fn record_rejection(&self, stream: &str, priority: Priority) {
        if let Some(rejections) = DISPATCH_REJECTIONS.get() {
            rejections
                .with_label_values(&[stream, priority.as_str()])
                .inc();
        }
    }

    pub fn set_queue_depth(&self, stream: &str, depth: u64) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.with_label_values(&[stream]).set(depth as f64);
        }
    }

    pub fn set_pending(&self, stream: &str, group: &str, pending: u64) {
        if let Some(gauge) = PENDING_ENTRIES.get() {
            gauge.with_label_values(&[stream, group]).set(pending as f64);
        }
    }

    pub fn task_started(&self, stream: &str) {
        if let Some(gauge) = IN_FLIGHT.get() {
            gauge.with_label_values(&[stream]).inc();
        }
    }

    pub fn task_finished(&self, stream: &str) {
        if let Some(gauge) = IN_FLIGHT.get() {
            gauge.with_label_values(&[stream]).dec();
        }
    }

    pub fn record_trim(&self, stream: &str, removed: u64) {
        if let Some(total) = TRIMMED_TOTAL.get() {
            total.with_label_values(&[stream]).inc_by(removed as f64);
        }
    }

    pub fn record_group_recreated(&self, stream: &str, group: &str) {
        if let Some(total) = GROUPS_RECREATED.get() {
            total.with_label_values(&[stream, group]).inc();
        }
    }
}
