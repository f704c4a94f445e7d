//! Log store double whose appends can be switched to fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{GroupStart, LogStore, MemoryLogStore, PendingEntry, RecordId, StreamRecord};
use crate::error::StoreError;

/// A [`MemoryLogStore`] whose `append` fails while `refuse_appends` is set.
#[derive(Debug, Default)]
pub(crate) struct FlakyLogStore {
    pub inner: MemoryLogStore,
    refuse_appends: AtomicBool,
}

impl FlakyLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_appends(&self, refuse: bool) {
        self.refuse_appends.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl LogStore for FlakyLogStore {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> Result<RecordId, StoreError> {
        if self.refuse_appends.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionFailed("connection refused".into()));
        }
        self.inner.append(stream, fields).await
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<bool, StoreError> {
        self.inner.create_group(stream, group, start).await
    }

    async fn destroy_group(&self, stream: &str, group: &str) -> Result<bool, StoreError> {
        self.inner.destroy_group(stream, group).await
    }

    async fn list_groups(&self, stream: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list_groups(stream).await
    }

    async fn last_delivered(&self, stream: &str, group: &str) -> Result<RecordId, StoreError> {
        self.inner.last_delivered(stream, group).await
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamRecord>, StoreError> {
        self.inner.read_new(stream, group, consumer, count, block).await
    }

    async fn get(&self, stream: &str, id: RecordId) -> Result<Option<StreamRecord>, StoreError> {
        self.inner.get(stream, id).await
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError> {
        self.inner.pending(stream, group, count).await
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError> {
        self.inner.pending_count(stream, group).await
    }

    async fn oldest_pending(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Option<RecordId>, StoreError> {
        self.inner.oldest_pending(stream, group).await
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> Result<u64, StoreError> {
        self.inner.ack(stream, group, ids).await
    }

    async fn len(&self, stream: &str) -> Result<u64, StoreError> {
        self.inner.len(stream).await
    }

    async fn retention_boundary(
        &self,
        stream: &str,
        keep: u64,
    ) -> Result<Option<RecordId>, StoreError> {
        self.inner.retention_boundary(stream, keep).await
    }

    async fn trim_before(&self, stream: &str, min_id: RecordId) -> Result<u64, StoreError> {
        self.inner.trim_before(stream, min_id).await
    }

    async fn exists(&self, stream: &str) -> Result<bool, StoreError> {
        self.inner.exists(stream).await
    }
}
