//! Serializable health views returned to operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TopicsConfig;

/// One consumer group as seen by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    pub pending: u64,
    /// Id of the oldest unacknowledged record, if any.
    pub oldest_pending: Option<String>,
}

/// Length and groups of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream: String,
    pub exists: bool,
    pub length: u64,
    pub groups: Vec<GroupInfo>,
}

impl StreamInfo {
    pub fn pending_total(&self) -> u64 {
        self.groups.iter().map(|g| g.pending).sum()
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }
}

/// Point-in-time status of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub enabled: bool,
    pub response_delivery_enabled: bool,
    pub monitor_enabled: bool,
    pub topics: TopicsConfig,
    pub request_group: String,
    pub response_group: String,
    pub requests: StreamInfo,
    pub responses: StreamInfo,
    pub sampled_at: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Whether both consumer groups exist.
    pub fn groups_present(&self) -> bool {
        self.requests.has_group(&self.request_group)
            && (!self.response_delivery_enabled || self.responses.has_group(&self.response_group))
    }
}

/// Result of trimming one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimReport {
    pub stream: String,
    /// Lowest id kept, or `None` if nothing needed trimming.
    pub boundary: Option<String>,
    pub removed: u64,
    /// Whether a pending entry held the boundary back.
    pub clamped: bool,
}

/// Result of requeueing stale pending entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequeueReport {
    pub requeued: u64,
    /// Entries acknowledged without a copy: trimmed, undecodable or out of
    /// retries.
    pub abandoned: u64,
    /// Entries younger than the idle threshold.
    pub skipped: u64,
}
