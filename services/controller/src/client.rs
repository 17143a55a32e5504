//! Client for the batch-execution layer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use stride_api::{BatchJob, BatchPhase, WatchEvent};
use stride_id::JobKey;
use stride_reconcile::ReconcileError;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Capacity of the in-memory client's watch channel.
const WATCH_CAPACITY: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch job not found: {0}")]
    NotFound(String),

    #[error("batch job already exists: {0}")]
    AlreadyExists(String),

    #[error("batch job modified concurrently: {0}")]
    Conflict(String),

    #[error("batch API unavailable: {0}")]
    Unavailable(String),

    #[error("invalid batch job: {0}")]
    Invalid(String),
}

impl From<BatchError> for ReconcileError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::NotFound(msg) => ReconcileError::NotFound(msg),
            BatchError::AlreadyExists(msg) | BatchError::Conflict(msg) => {
                ReconcileError::Conflict(msg)
            }
            BatchError::Unavailable(msg) => ReconcileError::External(msg),
            BatchError::Invalid(msg) => ReconcileError::Internal(msg),
        }
    }
}

/// Create/update/delete of batch jobs keyed by namespace and name.
#[async_trait]
pub trait BatchJobClient: Send + Sync {
    async fn get(&self, key: &JobKey) -> Result<BatchJob, BatchError>;

    async fn create(&self, job: BatchJob) -> Result<BatchJob, BatchError>;

    /// Replaces the spec. Fails with `Conflict` if the job changed since it
    /// was read.
    async fn update(&self, job: BatchJob) -> Result<BatchJob, BatchError>;

    async fn delete(&self, key: &JobKey) -> Result<(), BatchError>;
}

fn batch_key(job: &BatchJob) -> Result<JobKey, BatchError> {
    JobKey::from_parts(&job.meta.namespace, &job.meta.name)
        .map_err(|e| BatchError::Invalid(e.to_string()))
}

/// In-memory batch API with a watch channel.
///
/// Write counters and failure injection make it usable as a test double.
pub struct MemoryBatchClient {
    jobs: RwLock<BTreeMap<JobKey, BatchJob>>,
    events: broadcast::Sender<WatchEvent<BatchJob>>,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    /// Number of upcoming writes that fail with `Unavailable`.
    fail_writes: AtomicU32,
}

impl MemoryBatchClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            events,
            creates: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            fail_writes: AtomicU32::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent<BatchJob>> {
        self.events.subscribe()
    }

    /// Stores a batch job as-is, as if created by someone else.
    pub async fn insert(&self, mut job: BatchJob) -> Result<BatchJob, BatchError> {
        let key = batch_key(&job)?;
        job.meta.resource_version = 1;
        self.jobs.write().await.insert(key, job.clone());
        let _ = self.events.send(WatchEvent::Added(job.clone()));
        Ok(job)
    }

    /// Reports a new phase, as the batch layer would.
    pub async fn set_phase(&self, key: &JobKey, phase: BatchPhase) -> Result<BatchJob, BatchError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(key)
            .ok_or_else(|| BatchError::NotFound(key.to_string()))?;

        let old = job.clone();
        job.status.phase = phase;
        job.meta.resource_version += 1;
        let new = job.clone();
        drop(jobs);

        let _ = self.events.send(WatchEvent::Modified {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    pub async fn list(&self) -> Vec<BatchJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Total create, update and delete calls.
    pub fn writes(&self) -> u64 {
        self.creates() + self.updates() + self.deletes()
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryBatchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchJobClient for MemoryBatchClient {
    async fn get(&self, key: &JobKey) -> Result<BatchJob, BatchError> {
        self.jobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BatchError::NotFound(key.to_string()))
    }

    async fn create(&self, mut job: BatchJob) -> Result<BatchJob, BatchError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err(BatchError::Unavailable("injected failure".to_string()));
        }

        let key = batch_key(&job)?;
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&key) {
            return Err(BatchError::AlreadyExists(key.to_string()));
        }
        job.meta.resource_version = 1;
        jobs.insert(key.clone(), job.clone());
        drop(jobs);

        debug!(job = %key, "created batch job");
        let _ = self.events.send(WatchEvent::Added(job.clone()));
        Ok(job)
    }

    async fn update(&self, mut job: BatchJob) -> Result<BatchJob, BatchError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err(BatchError::Unavailable("injected failure".to_string()));
        }

        let key = batch_key(&job)?;
        let mut jobs = self.jobs.write().await;
        let current = jobs
            .get_mut(&key)
            .ok_or_else(|| BatchError::NotFound(key.to_string()))?;
        if current.meta.resource_version != job.meta.resource_version {
            return Err(BatchError::Conflict(key.to_string()));
        }

        let old = current.clone();
        job.meta.resource_version += 1;
        job.status = old.status.clone();
        *current = job.clone();
        drop(jobs);

        debug!(job = %key, "updated batch job");
        let _ = self.events.send(WatchEvent::Modified {
            old,
            new: job.clone(),
        });
        Ok(job)
    }

    async fn delete(&self, key: &JobKey) -> Result<(), BatchError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err(BatchError::Unavailable("injected failure".to_string()));
        }

        let removed = self
            .jobs
            .write()
            .await
            .remove(key)
            .ok_or_else(|| BatchError::NotFound(key.to_string()))?;

        debug!(job = %key, "deleted batch job");
        let _ = self.events.send(WatchEvent::Deleted(removed));
        Ok(())
    }
}
