//! Append-only log store abstraction with consumer groups.
//!
//! The queue pipeline treats the log store as external infrastructure: an
//! append-only log with multiple independent streams, each carrying named
//! consumer groups (a read cursor plus a pending-entries list). This module
//! defines the [`LogStore`] trait the rest of the crate talks to and two
//! implementations:
//!
//! - [`RedisLogStore`]: Redis Streams (XADD / XREADGROUP / XACK / XPENDING ...)
//! - [`MemoryLogStore`]: in-process store with the same semantics, for tests
//!   and local runs
//!
//! # Delivery model
//!
//! ```text
//!   append ──▶ [ stream: r1 r2 r3 r4 ... ]
//!                          ▲
//!             group cursor ┘   PEL: { r1 → consumer-a, r2 → consumer-a }
//!
//!   read_new(group, consumer)  moves the cursor and adds entries to the PEL
//!   ack(group, ids)            removes entries from the PEL
//! ```
//!
//! Entries stay in the PEL until acknowledged, so unacknowledged work
//! survives process restarts.

#[cfg(test)]
pub(crate) mod flaky;
pub mod memory;
pub mod redis_streams;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::MemoryLogStore;
pub use redis_streams::RedisLogStore;

/// Log-assigned, monotonically ordered record identifier (`<ms>-<seq>`).
///
/// Distinct from an envelope's `messageId`; used for acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RecordId {
    pub ms: u64,
    pub seq: u64,
}

impl RecordId {
    pub const ZERO: RecordId = RecordId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The smallest id that could have been assigned at `ms`.
    pub fn at_millis(ms: u64) -> Self {
        Self { ms, seq: 0 }
    }

    /// The smallest id greater than this one.
    pub fn successor(&self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self { ms: self.ms, seq },
            None => Self {
                ms: self.ms.saturating_add(1),
                seq: 0,
            },
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for RecordId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidRecordId(s.to_string());
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        Ok(Self {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// A record read from a stream: the log-assigned id plus its field map.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub id: RecordId,
    pub fields: HashMap<String, String>,
}

impl StreamRecord {
    pub fn new(id: RecordId, fields: HashMap<String, String>) -> Self {
        Self { id, fields }
    }

    /// Returns a field value, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// An entry delivered to a consumer but not yet acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub id: RecordId,
    pub consumer: String,
    /// Time since the entry was last delivered.
    pub idle: Duration,
    /// How many times the log has delivered the entry.
    pub delivery_count: u64,
}

/// Where a newly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStart {
    /// Only records appended after creation (`$`).
    #[default]
    Latest,
    /// Every record still retained in the stream (`0`).
    Beginning,
}

impl GroupStart {
    pub fn as_offset(&self) -> &'static str {
        match self {
            GroupStart::Latest => "$",
            GroupStart::Beginning => "0",
        }
    }
}

/// Append-only log with consumer groups.
///
/// Implementations must be safe to share across tasks behind an `Arc`.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Appends a record and returns the log-assigned id.
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> Result<RecordId, StoreError>;

    /// Creates a consumer group, creating the stream if needed.
    ///
    /// Returns `Ok(false)` if the group already existed.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, StoreError>;

    /// Destroys a consumer group together with its pending-entries list.
    ///
    /// Returns `Ok(false)` if the group did not exist.
    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool, StoreError>;

    /// Lists the names of the consumer groups on a stream.
    async fn list_groups(&self, stream: &str) -> Result<Vec<String>, StoreError>;

    /// Returns whether the given consumer group exists.
    async fn group_exists(&self, stream: &str, group: &str) -> Result<bool, StoreError> {
        Ok(self
            .list_groups(stream)
            .await?
            .iter()
            .any(|name| name == group))
    }

    /// Returns the group's cursor: the id of the newest record delivered to
    /// it, or [`RecordId::ZERO`] if it has read nothing from the start.
    async fn last_delivered(&self, stream: &str, group: &str) -> Result<RecordId, StoreError>;

    /// Reads up to `count` records never delivered to the group, waiting at
    /// most `block` for new records to arrive.
    ///
    /// Returned records are added to the group's pending-entries list under
    /// `consumer`.
    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, StoreError>;

    /// Fetches a single record by id, if it is still retained.
    async fn get(&self, stream: &str, id: RecordId) -> Result<Option<StreamRecord>, StoreError>;

    /// Lists up to `count` pending entries of a group, oldest first.
    async fn pending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError>;

    /// Returns the number of pending entries of a group.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError>;

    /// Returns the id of the oldest pending entry of a group.
    async fn oldest_pending(&self, stream: &str, group: &str)
        -> Result<Option<RecordId>, StoreError>;

    /// Acknowledges records; returns how many were actually pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> Result<u64, StoreError>;

    /// Returns the number of records retained in a stream.
    async fn len(&self, stream: &str) -> Result<u64, StoreError>;

    /// Returns the id of the oldest record that would remain if only the
    /// newest `keep` records were retained, or `None` if the stream holds
    /// no more than `keep` records.
    async fn retention_boundary(
        &self,
        stream: &str,
        keep: u64,
    ) -> Result<Option<RecordId>, StoreError>;

    /// Removes every record with an id lower than `min_id`; returns the
    /// number of removed records.
    async fn trim_before(&self, stream: &str, min_id: RecordId) -> Result<u64, StoreError>;

    /// Returns whether the stream exists.
    async fn exists(&self, stream: &str) -> Result<bool, StoreError>;
}
