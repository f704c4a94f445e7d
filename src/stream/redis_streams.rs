//! Redis Streams log store.
//!
//! Maps the [`LogStore`] operations onto Redis stream commands:
//!
//! | Operation            | Command                                   |
//! |----------------------|-------------------------------------------|
//! | `append`             | `XADD <stream> * field value ...`         |
//! | `create_group`       | `XGROUP CREATE <stream> <group> $ MKSTREAM` |
//! | `destroy_group`      | `XGROUP DESTROY`                          |
//! | `list_groups`        | `XINFO GROUPS`                            |
//! | `last_delivered`     | `XINFO GROUPS` (`last-delivered-id`)      |
//! | `read_new`           | `XREADGROUP GROUP g c COUNT n BLOCK ms STREAMS s >` |
//! | `get`                | `XRANGE <stream> id id`                   |
//! | `pending`            | `XPENDING <stream> <group> - + n`         |
//! | `ack`                | `XACK`                                    |
//! | `retention_boundary` | `XREVRANGE <stream> + - COUNT n`          |
//! | `trim_before`        | `XTRIM <stream> MINID id`                 |
//!
//! Blocking reads run on a small rotation of dedicated connections. A
//! multiplexed connection answers commands in order, so a read parked in
//! `BLOCK` on the shared connection would stall every ack and append queued
//! behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamId, StreamInfoGroupsReply, StreamPendingCountReply, StreamPendingReply,
    StreamRangeReply, StreamReadReply,
};

use super::{GroupStart, LogStore, PendingEntry, RecordId, StreamRecord};
use crate::error::StoreError;

/// Default number of dedicated connections for blocking reads.
const DEFAULT_READER_CONNECTIONS: usize = 3;

/// Redis-backed [`LogStore`].
pub struct RedisLogStore {
    /// Shared connection for non-blocking commands (reconnects automatically).
    redis: ConnectionManager,
    /// Dedicated connections for blocking reads.
    readers: Vec<ConnectionManager>,
    next_reader: AtomicUsize,
}

impl RedisLogStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if any connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        Self::connect_with_readers(redis_url, DEFAULT_READER_CONNECTIONS).await
    }

    /// Connects to Redis with `readers` dedicated blocking-read connections.
    pub async fn connect_with_readers(redis_url: &str, readers: usize) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let mut reader_connections = Vec::with_capacity(readers.max(1));
        for _ in 0..readers.max(1) {
            let conn = ConnectionManager::new(client.clone())
                .await
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
            reader_connections.push(conn);
        }

        Ok(Self {
            redis,
            readers: reader_connections,
            next_reader: AtomicUsize::new(0),
        })
    }

    fn reader(&self) -> ConnectionManager {
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[index].clone()
    }

    fn convert(entry: StreamId) -> Result<StreamRecord, StoreError> {
        let id: RecordId = entry.id.parse()?;
        let mut fields = HashMap::with_capacity(entry.map.len());
        for (key, value) in entry.map {
            let value: String = redis::from_redis_value(&value)?;
            fields.insert(key, value);
        }
        Ok(StreamRecord::new(id, fields))
    }
}

#[async_trait]
impl LogStore for RedisLogStore {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> Result<RecordId, StoreError> {
        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }
        let id: String = cmd.query_async(&mut conn).await?;
        id.parse()
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start.as_offset())
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool, StoreError> {
        if !self.exists(stream).await? {
            return Ok(false);
        }
        let mut conn = self.redis.clone();
        let destroyed: u64 = redis::cmd("XGROUP")
            .arg("DESTROY")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;
        Ok(destroyed > 0)
    }

    async fn list_groups(&self, stream: &str) -> Result<Vec<String>, StoreError> {
        if !self.exists(stream).await? {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let reply: StreamInfoGroupsReply = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut conn)
            .await?;
        Ok(reply.groups.into_iter().map(|g| g.name).collect())
    }

    async fn last_delivered(&self, stream: &str, group: &str) -> Result<RecordId, StoreError> {
        let no_group = || StoreError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        if !self.exists(stream).await? {
            return Err(no_group());
        }
        let mut conn = self.redis.clone();
        let reply: StreamInfoGroupsReply = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut conn)
            .await?;
        let info = reply
            .groups
            .into_iter()
            .find(|g| g.name == group)
            .ok_or_else(no_group)?;
        info.last_delivered_id.parse()
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, StoreError> {
        let mut conn = self.reader();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count.max(1));
        // BLOCK 0 waits forever, so a zero timeout means a plain read.
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(stream).arg(">");

        let reply: Option<StreamReadReply> = match cmd.query_async(&mut conn).await {
            Ok(reply) => reply,
            Err(e) if e.code() == Some("NOGROUP") => {
                return Err(StoreError::NoGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                records.push(Self::convert(entry)?);
            }
        }
        Ok(records)
    }

    async fn get(&self, stream: &str, id: RecordId) -> Result<Option<StreamRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let id = id.to_string();
        let reply: StreamRangeReply = redis::cmd("XRANGE")
            .arg(stream)
            .arg(&id)
            .arg(&id)
            .query_async(&mut conn)
            .await?;
        reply.ids.into_iter().next().map(Self::convert).transpose()
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError> {
        let mut conn = self.redis.clone();
        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await?;

        reply
            .ids
            .into_iter()
            .map(|p| -> Result<PendingEntry, StoreError> {
                Ok(PendingEntry {
                    id: p.id.parse()?,
                    consumer: p.consumer,
                    idle: Duration::from_millis(p.last_delivered_ms as u64),
                    delivery_count: p.times_delivered as u64,
                })
            })
            .collect()
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let reply: StreamPendingReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;
        Ok(reply.count() as u64)
    }

    async fn oldest_pending(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Option<RecordId>, StoreError> {
        let mut conn = self.redis.clone();
        let reply: StreamPendingReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;
        match reply {
            StreamPendingReply::Data(data) => Ok(Some(data.start_id.parse()?)),
            StreamPendingReply::Empty => Ok(None),
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in ids {
            cmd.arg(id.to_string());
        }
        let acked: u64 = cmd.query_async(&mut conn).await?;
        Ok(acked)
    }

    async fn len(&self, stream: &str) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let len: u64 = redis::cmd("XLEN").arg(stream).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn retention_boundary(
        &self,
        stream: &str,
        keep: u64,
    ) -> Result<Option<RecordId>, StoreError> {
        if keep == 0 || self.len(stream).await? <= keep {
            return Ok(None);
        }
        let mut conn = self.redis.clone();
        let reply: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(keep)
            .query_async(&mut conn)
            .await?;
        reply
            .ids
            .last()
            .map(|entry| entry.id.parse())
            .transpose()
    }

    async fn trim_before(&self, stream: &str, min_id: RecordId) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let removed: u64 = redis::cmd("XTRIM")
            .arg(stream)
            .arg("MINID")
            .arg(min_id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn exists(&self, stream: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let exists: bool = redis::cmd("EXISTS").arg(stream).query_async(&mut conn).await?;
        Ok(exists)
    }
}
