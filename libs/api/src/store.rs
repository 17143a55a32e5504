//! Job-record store: where scheduled allocations and lifecycle state land.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use stride_id::JobKey;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::{Allocation, JobRecord, JobSpec, JobState, StoreError, WatchEvent};

/// Capacity of the in-memory store's watch channel.
const WATCH_CAPACITY: usize = 1024;

/// Writes against the external job-record store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Reads the current record.
    async fn get(&self, key: &JobKey) -> Result<JobRecord, StoreError>;

    /// Writes the policy-decided allocation.
    async fn update_allocation(
        &self,
        key: &JobKey,
        allocation: Allocation,
    ) -> Result<JobRecord, StoreError>;

    /// Moves the record to a new lifecycle state.
    async fn update_state(&self, key: &JobKey, state: JobState) -> Result<JobRecord, StoreError>;
}

/// In-memory job store with a watch channel.
///
/// Every write bumps the resource version and broadcasts a [`WatchEvent`].
/// Write counters and failure injection make it usable as a test double.
pub struct MemoryJobStore {
    records: RwLock<BTreeMap<JobKey, JobRecord>>,
    events: broadcast::Sender<WatchEvent<JobRecord>>,
    allocation_writes: AtomicU64,
    state_writes: AtomicU64,
    /// Number of upcoming writes that fail with `Unavailable`.
    fail_writes: AtomicU32,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            records: RwLock::new(BTreeMap::new()),
            events,
            allocation_writes: AtomicU64::new(0),
            state_writes: AtomicU64::new(0),
            fail_writes: AtomicU32::new(0),
        }
    }

    /// Subscribes to watch events for every record.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent<JobRecord>> {
        self.events.subscribe()
    }

    /// Inserts a new record.
    pub async fn create(&self, mut record: JobRecord) -> Result<JobRecord, StoreError> {
        let key = record
            .key()
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{key} already exists")));
        }

        record.meta.resource_version = 1;
        records.insert(key, record.clone());
        drop(records);

        let _ = self.events.send(WatchEvent::Added(record.clone()));
        Ok(record)
    }

    /// Removes a record.
    pub async fn delete(&self, key: &JobKey) -> Result<JobRecord, StoreError> {
        let removed = self
            .records
            .write()
            .await
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let _ = self.events.send(WatchEvent::Deleted(removed.clone()));
        Ok(removed)
    }

    /// Replaces a record's spec (user edit).
    pub async fn update_spec(
        &self,
        key: &JobKey,
        spec: JobSpec,
    ) -> Result<JobRecord, StoreError> {
        self.mutate(key, |record| record.spec = spec).await
    }

    /// Marks a record as being deleted.
    pub async fn mark_terminating(&self, key: &JobKey) -> Result<JobRecord, StoreError> {
        self.mutate(key, |record| {
            record.meta.deletion_timestamp = Some(Utc::now());
        })
        .await
    }

    pub async fn list(&self) -> Vec<JobRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Makes the next `n` allocation/state writes fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    pub fn allocation_writes(&self) -> u64 {
        self.allocation_writes.load(Ordering::SeqCst)
    }

    pub fn state_writes(&self) -> u64 {
        self.state_writes.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn mutate<F>(&self, key: &JobKey, f: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&mut JobRecord) + Send,
    {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let old = record.clone();
        f(record);
        record.meta.resource_version += 1;
        let new = record.clone();
        drop(records);

        let _ = self.events.send(WatchEvent::Modified {
            old,
            new: new.clone(),
        });
        Ok(new)
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, key: &JobKey) -> Result<JobRecord, StoreError> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn update_allocation(
        &self,
        key: &JobKey,
        allocation: Allocation,
    ) -> Result<JobRecord, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        self.allocation_writes.fetch_add(1, Ordering::SeqCst);
        debug!(job = %key, %allocation, "writing allocation");

        self.mutate(key, |record| record.status.scheduled = allocation)
            .await
    }

    async fn update_state(&self, key: &JobKey, state: JobState) -> Result<JobRecord, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        self.state_writes.fetch_add(1, Ordering::SeqCst);
        debug!(job = %key, %state, "writing state");

        self.mutate(key, |record| record.status.transition(state, Utc::now()))
            .await
    }
}
