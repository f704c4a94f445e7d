//! Metrics module for Prometheus-based monitoring.
//!
//! # Example
//!
//! ```ignore
//! use interview_queue::metrics::{init_metrics, export_metrics, MetricsCollector, Outcome};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.set_queue_depth("ai:requests", 12);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, Outcome};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    DISPATCH_REJECTIONS, ENQUEUED_TOTAL, GROUPS_RECREATED, HANDLER_DURATION, IN_FLIGHT,
    MESSAGES_TOTAL, PENDING_ENTRIES, POISON_DROPS, QUEUE_DEPTH, REGISTRY, TRIMMED_TOTAL,
};
