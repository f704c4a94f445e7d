//! In-process log store with Redis Streams semantics.
//!
//! Used by tests and local runs. Record ids are `<ms>-<seq>` and strictly
//! increasing; each consumer group keeps a cursor and a pending-entries list;
//! blocking reads wait on a notification raised by every append.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{GroupStart, LogStore, PendingEntry, RecordId, StreamRecord};
use crate::error::StoreError;

#[derive(Debug)]
struct PendingState {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: RecordId,
    pending: BTreeMap<RecordId, PendingState>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<RecordId, HashMap<String, String>>,
    last_id: RecordId,
    groups: HashMap<String, GroupState>,
}

/// In-memory [`LogStore`].
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every retained record of a stream, oldest first.
    pub fn records(&self, stream: &str) -> Vec<StreamRecord> {
        let streams = self.lock();
        streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(id, fields)| StreamRecord::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the ids currently pending for a group.
    pub fn pending_ids(&self, stream: &str, group: &str) -> Vec<RecordId> {
        let streams = self.lock();
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StreamState>> {
        // A panic while holding the lock leaves plain data behind; keep serving.
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(last: RecordId) -> RecordId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        if now > last.ms {
            RecordId::new(now, 0)
        } else {
            RecordId::new(last.ms, last.seq + 1)
        }
    }

    fn no_group(stream: &str, group: &str) -> StoreError {
        StoreError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    }

    fn take_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamRecord>, StoreError> {
        let mut streams = self.lock();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| Self::no_group(stream, group))?;
        let StreamState { entries, groups, .. } = state;
        let group_state = groups
            .get_mut(group)
            .ok_or_else(|| Self::no_group(stream, group))?;

        let cursor = group_state.last_delivered;
        let batch: Vec<StreamRecord> = entries
            .range(cursor..)
            .filter(|(id, _)| **id > cursor)
            .take(count)
            .map(|(id, fields)| StreamRecord::new(*id, fields.clone()))
            .collect();

        let now = Instant::now();
        for record in &batch {
            group_state.last_delivered = record.id;
            let entry = group_state
                .pending
                .entry(record.id)
                .or_insert_with(|| PendingState {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 0,
                });
            entry.consumer = consumer.to_string();
            entry.delivered_at = now;
            entry.delivery_count += 1;
        }

        Ok(batch)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> Result<RecordId, StoreError> {
        let id = {
            let mut streams = self.lock();
            let state = streams.entry(stream.to_string()).or_default();
            let id = Self::next_id(state.last_id);
            state.last_id = id;
            state.entries.insert(id, fields.iter().cloned().collect());
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, StoreError> {
        let mut streams = self.lock();
        let state = streams.entry(stream.to_string()).or_default();
        if state.groups.contains_key(group) {
            return Ok(false);
        }
        let last_delivered = match start {
            GroupStart::Latest => state.last_id,
            GroupStart::Beginning => RecordId::ZERO,
        };
        state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool, StoreError> {
        let mut streams = self.lock();
        Ok(streams
            .get_mut(stream)
            .map(|s| s.groups.remove(group).is_some())
            .unwrap_or(false))
    }

    async fn list_groups(&self, stream: &str) -> Result<Vec<String>, StoreError> {
        let streams = self.lock();
        let mut names: Vec<String> = streams
            .get(stream)
            .map(|s| s.groups.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn last_delivered(&self, stream: &str, group: &str) -> Result<RecordId, StoreError> {
        let streams = self.lock();
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.last_delivered)
            .ok_or_else(|| Self::no_group(stream, group))
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, StoreError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // Register interest before checking so an append in between is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take_new(stream, group, consumer, count)?;
            if !batch.is_empty() || block.is_zero() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn get(&self, stream: &str, id: RecordId) -> Result<Option<StreamRecord>, StoreError> {
        let streams = self.lock();
        Ok(streams
            .get(stream)
            .and_then(|s| s.entries.get(&id))
            .map(|fields| StreamRecord::new(id, fields.clone())))
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError> {
        let streams = self.lock();
        let group_state = streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| Self::no_group(stream, group))?;
        Ok(group_state
            .pending
            .iter()
            .take(count)
            .map(|(id, p)| PendingEntry {
                id: *id,
                consumer: p.consumer.clone(),
                idle: p.delivered_at.elapsed(),
                delivery_count: p.delivery_count,
            })
            .collect())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError> {
        let streams = self.lock();
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .ok_or_else(|| Self::no_group(stream, group))
    }

    async fn oldest_pending(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Option<RecordId>, StoreError> {
        let streams = self.lock();
        let group_state = streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| Self::no_group(stream, group))?;
        Ok(group_state.pending.keys().next().copied())
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> Result<u64, StoreError> {
        let mut streams = self.lock();
        let Some(group_state) = streams.get_mut(stream).and_then(|s| s.groups.get_mut(group))
        else {
            // XACK on a missing group acknowledges nothing.
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| group_state.pending.remove(id).is_some())
            .count() as u64)
    }

    async fn len(&self, stream: &str) -> Result<u64, StoreError> {
        let streams = self.lock();
        Ok(streams.get(stream).map(|s| s.entries.len() as u64).unwrap_or(0))
    }

    async fn retention_boundary(
        &self,
        stream: &str,
        keep: u64,
    ) -> Result<Option<RecordId>, StoreError> {
        let streams = self.lock();
        let Some(state) = streams.get(stream) else {
            return Ok(None);
        };
        if (state.entries.len() as u64) <= keep || keep == 0 {
            return Ok(None);
        }
        Ok(state.entries.keys().rev().nth(keep as usize - 1).copied())
    }

    async fn trim_before(&self, stream: &str, min_id: RecordId) -> Result<u64, StoreError> {
        let mut streams = self.lock();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(0);
        };
        let kept = state.entries.split_off(&min_id);
        let removed = state.entries.len() as u64;
        state.entries = kept;
        Ok(removed)
    }

    async fn exists(&self, stream: &str) -> Result<bool, StoreError> {
        Ok(self.lock().contains_key(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(topic: &str) -> Vec<(String, String)> {
        vec![("topic".to_string(), topic.to_string())]
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = MemoryLogStore::new();
        let a = store.append("s", &fields("a")).await.unwrap();
        let b = store.append("s", &fields("b")).await.unwrap();
        let c = store.append("s", &fields("c")).await.unwrap();
        assert!(a < b && b < c);
        assert_eq!(store.len("s").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_group_create_is_idempotent() {
        let store = MemoryLogStore::new();
        assert!(store.create_group("s", "g", GroupStart::Latest).await.unwrap());
        assert!(!store.create_group("s", "g", GroupStart::Latest).await.unwrap());
        assert!(store.group_exists("s", "g").await.unwrap());
        assert!(store.destroy_group("s", "g").await.unwrap());
        assert!(!store.group_exists("s", "g").await.unwrap());
        assert!(!store.destroy_group("s", "g").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_new_moves_cursor_and_tracks_pending() {
        let store = MemoryLogStore::new();
        store.create_group("s", "g", GroupStart::Latest).await.unwrap();
        let id = store.append("s", &fields("a")).await.unwrap();

        let batch = store
            .read_new("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].field("topic"), Some("a"));
        assert_eq!(store.pending_ids("s", "g"), vec![id]);

        let again = store
            .read_new("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(again.is_empty());

        assert_eq!(store.ack("s", "g", &[id]).await.unwrap(), 1);
        assert_eq!(store.ack("s", "g", &[id]).await.unwrap(), 0);
        assert!(store.pending_ids("s", "g").is_empty());
    }

    #[tokio::test]
    async fn test_group_start_latest_skips_backlog() {
        let store = MemoryLogStore::new();
        store.append("s", &fields("old")).await.unwrap();
        store.create_group("s", "g", GroupStart::Latest).await.unwrap();
        store.create_group("s", "g0", GroupStart::Beginning).await.unwrap();

        let latest = store.read_new("s", "g", "c", 10, Duration::ZERO).await.unwrap();
        let beginning = store.read_new("s", "g0", "c", 10, Duration::ZERO).await.unwrap();
        assert!(latest.is_empty());
        assert_eq!(beginning.len(), 1);
    }

    #[tokio::test]
    async fn test_read_without_group_fails() {
        let store = MemoryLogStore::new();
        store.append("s", &fields("a")).await.unwrap();
        let err = store
            .read_new("s", "missing", "c", 1, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_missing_group());
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let store = std::sync::Arc::new(MemoryLogStore::new());
        store.create_group("s", "g", GroupStart::Latest).await.unwrap();

        let writer = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append("s", &fields("late")).await.unwrap();
        });

        let batch = store
            .read_new("s", "g", "c", 1, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_retention_boundary_and_trim() {
        let store = MemoryLogStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.append("s", &fields(&i.to_string())).await.unwrap());
        }

        assert_eq!(store.retention_boundary("s", 10).await.unwrap(), None);
        let boundary = store.retention_boundary("s", 2).await.unwrap();
        assert_eq!(boundary, Some(ids[3]));

        let removed = store.trim_before("s", ids[3]).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.len("s").await.unwrap(), 2);
        assert!(store.get("s", ids[0]).await.unwrap().is_none());
        assert!(store.get("s", ids[4]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_last_delivered_follows_reads() {
        let store = MemoryLogStore::new();
        store.create_group("s", "g", GroupStart::Beginning).await.unwrap();
        assert_eq!(store.last_delivered("s", "g").await.unwrap(), RecordId::ZERO);

        let a = store.append("s", &fields("a")).await.unwrap();
        store.append("s", &fields("b")).await.unwrap();
        store.read_new("s", "g", "c1", 1, Duration::ZERO).await.unwrap();
        assert_eq!(store.last_delivered("s", "g").await.unwrap(), a);

        let err = store.last_delivered("s", "missing").await.unwrap_err();
        assert!(err.is_missing_group());
    }

    #[tokio::test]
    async fn test_pending_listing_and_oldest() {
        let store = MemoryLogStore::new();
        store.create_group("s", "g", GroupStart::Latest).await.unwrap();
        let a = store.append("s", &fields("a")).await.unwrap();
        let b = store.append("s", &fields("b")).await.unwrap();
        store.read_new("s", "g", "c1", 10, Duration::ZERO).await.unwrap();

        let pending = store.pending("s", "g", 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, a);
        assert_eq!(pending[0].consumer, "c1");
        assert_eq!(pending[0].delivery_count, 1);
        assert_eq!(store.oldest_pending("s", "g").await.unwrap(), Some(a));
        assert_eq!(store.pending_count("s", "g").await.unwrap(), 2);

        store.ack("s", "g", &[a]).await.unwrap();
        assert_eq!(store.oldest_pending("s", "g").await.unwrap(), Some(b));
    }
}
