//! Prometheus metrics registration and export.
//!
//! Defines every metric the queue pipeline records and the functions for
//! initializing and exporting them.

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all interview-queue metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Messages finished by a consumer, labeled by stream, topic and outcome
/// (`acked`, `retried`, `poisoned`, `dropped`, `withheld`).
pub static MESSAGES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Handler duration in seconds, labeled by stream and topic.
pub static HANDLER_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Records appended by the enqueuers, labeled by stream, topic and priority.
pub static ENQUEUED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Retained records per stream.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Pending entries per stream and group.
pub static PENDING_ENTRIES: OnceLock<GaugeVec> = OnceLock::new();

/// Messages force-acknowledged after exhausting their retry budget.
pub static POISON_DROPS: OnceLock<CounterVec> = OnceLock::new();

/// Dispatches rejected by a saturated worker pool, labeled by stream and priority.
pub static DISPATCH_REJECTIONS: OnceLock<CounterVec> = OnceLock::new();

/// Handler tasks currently running, labeled by stream.
pub static IN_FLIGHT: OnceLock<GaugeVec> = OnceLock::new();

/// Records removed by trimming, labeled by stream.
pub static TRIMMED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Consumer groups recreated by the health check.
pub static GROUPS_RECREATED: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless; the first registry wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let messages_total = CounterVec::new(
        Opts::new(
            "interview_queue_messages_total",
            "Messages finished by a consumer",
        ),
        &["stream", "topic", "outcome"],
    )?;

    let handler_duration = HistogramVec::new(
        HistogramOpts::new(
            "interview_queue_handler_duration_seconds",
            "Message handler duration in seconds",
        )
        .buckets(vec![0.05, 0.25, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["stream", "topic"],
    )?;

    let enqueued_total = CounterVec::new(
        Opts::new("interview_queue_enqueued_total", "Records appended by enqueuers"),
        &["stream", "topic", "priority"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("interview_queue_depth", "Records retained in a stream"),
        &["stream"],
    )?;

    let pending_entries = GaugeVec::new(
        Opts::new(
            "interview_queue_pending_entries",
            "Unacknowledged entries of a consumer group",
        ),
        &["stream", "group"],
    )?;

    let poison_drops = CounterVec::new(
        Opts::new(
            "interview_queue_poison_drops_total",
            "Messages dropped after exhausting their retry budget",
        ),
        &["stream", "topic"],
    )?;

    let dispatch_rejections = CounterVec::new(
        Opts::new(
            "interview_queue_dispatch_rejections_total",
            "Dispatches rejected by a saturated worker pool",
        ),
        &["stream", "priority"],
    )?;

    let in_flight = GaugeVec::new(
        Opts::new("interview_queue_in_flight", "Handler tasks currently running"),
        &["stream"],
    )?;

    let trimmed_total = CounterVec::new(
        Opts::new("interview_queue_trimmed_total", "Records removed by trimming"),
        &["stream"],
    )?;

    let groups_recreated = CounterVec::new(
        Opts::new(
            "interview_queue_groups_recreated_total",
            "Consumer groups recreated by the health check",
        ),
        &["stream", "group"],
    )?;

    registry.register(Box::new(messages_total.clone()))?;
    registry.register(Box::new(handler_duration.clone()))?;
    registry.register(Box::new(enqueued_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(pending_entries.clone()))?;
    registry.register(Box::new(poison_drops.clone()))?;
    registry.register(Box::new(dispatch_rejections.clone()))?;
    registry.register(Box::new(in_flight.clone()))?;
    registry.register(Box::new(trimmed_total.clone()))?;
    registry.register(Box::new(groups_recreated.clone()))?;

    // If any of these fail, metrics were already initialized
    let _ = REGISTRY.set(registry);
    let _ = MESSAGES_TOTAL.set(messages_total);
    let _ = HANDLER_DURATION.set(handler_duration);
    let _ = ENQUEUED_TOTAL.set(enqueued_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = PENDING_ENTRIES.set(pending_entries);
    let _ = POISON_DROPS.set(poison_drops);
    let _ = DISPATCH_REJECTIONS.set(dispatch_rejections);
    let _ = IN_FLIGHT.set(in_flight);
    let _ = TRIMMED_TOTAL.set(trimmed_total);
    let _ = GROUPS_RECREATED.set(groups_recreated);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
