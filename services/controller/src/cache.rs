//! Controller-side view of job records, their batch jobs and the nodes.
//!
//! A deleted job record leaves its entry behind until the garbage-collection
//! worker has removed the batch job it owned.

use std::collections::BTreeMap;
use std::sync::Arc;

use stride_api::{BatchJob, JobRecord, NodeObject, NodeRegistry, NodeTypes, JOB_KIND};
use stride_id::JobKey;
use stride_reconcile::{
    BackoffPolicy, ReconcileError, WorkQueue, DEFAULT_BACKOFF_BASE, GC_BACKOFF_MAX,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::client::{BatchError, BatchJobClient};

/// A job record and the batch job created for it. Either may be missing
/// while events are in flight.
#[derive(Debug, Clone, Default)]
pub struct JobEntry {
    pub record: Option<JobRecord>,
    pub batch_job: Option<BatchJob>,
}

#[derive(Default)]
struct CacheState {
    jobs: BTreeMap<JobKey, JobEntry>,
    nodes: NodeRegistry,
}

pub struct ControllerCache {
    state: Mutex<CacheState>,
    client: Arc<dyn BatchJobClient>,
    deleted: WorkQueue<JobKey>,
}

impl ControllerCache {
    pub fn new(client: Arc<dyn BatchJobClient>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            client,
            deleted: WorkQueue::new(BackoffPolicy::new(DEFAULT_BACKOFF_BASE, GC_BACKOFF_MAX)),
        }
    }

    /// Returns the entry for a job whose record is present.
    pub async fn get(&self, key: &JobKey) -> Result<JobEntry, ReconcileError> {
        let state = self.state.lock().await;
        match state.jobs.get(key) {
            Some(entry) if entry.record.is_some() => Ok(entry.clone()),
            Some(_) => Err(ReconcileError::NotFound(format!("job {key} is not ready"))),
            None => Err(ReconcileError::NotFound(format!("job {key}"))),
        }
    }

    /// Records a job record, keeping only the newest version seen.
    pub async fn upsert_job(&self, key: JobKey, record: JobRecord) {
        let mut state = self.state.lock().await;
        let entry = state.jobs.entry(key).or_default();
        match &entry.record {
            Some(current) if current.meta.resource_version > record.meta.resource_version => {}
            _ => entry.record = Some(record),
        }
    }

    /// Forgets a job record and schedules collection of its entry.
    pub async fn delete_job(&self, key: &JobKey) {
        let mut state = self.state.lock().await;
        let Some(entry) = state.jobs.get_mut(key) else {
            return;
        };
        entry.record = None;
        drop(state);

        debug!(job = %key, "job record deleted, scheduling collection");
        self.deleted.add_rate_limited(key.clone());
    }

    pub async fn upsert_batch_job(&self, key: JobKey, batch_job: BatchJob) {
        let mut state = self.state.lock().await;
        let entry = state.jobs.entry(key).or_default();
        match &entry.batch_job {
            Some(current) if current.meta.resource_version > batch_job.meta.resource_version => {}
            _ => entry.batch_job = Some(batch_job),
        }
    }

    /// Forgets a batch job. Returns true if a live record is left without
    /// one.
    pub async fn delete_batch_job(&self, key: &JobKey) -> bool {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(key) {
            Some(entry) => {
                entry.batch_job = None;
                entry.record.is_some()
            }
            None => false,
        }
    }

    pub async fn upsert_node(&self, node: NodeObject) {
        let name = node.name.clone();
        if self.state.lock().await.nodes.add_or_update(node) {
            debug!(node = %name, "node types changed");
        }
    }

    pub async fn delete_node(&self, name: &str) {
        self.state.lock().await.nodes.delete(name);
    }

    /// A copy of the current node-type classes.
    pub async fn node_types(&self) -> NodeTypes {
        self.state.lock().await.nodes.node_types().clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stops the garbage-collection worker.
    pub fn shut_down_gc(&self) {
        self.deleted.shut_down();
    }

    /// Runs the garbage-collection worker until shutdown.
    pub async fn run_gc(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting deleted-job collector");

        loop {
            tokio::select! {
                key = self.deleted.get() => {
                    let Some(key) = key else { break };
                    self.collect(&key).await;
                    self.deleted.done(&key);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Deleted-job collector shutting down");
                        self.deleted.shut_down();
                        break;
                    }
                }
            }
        }
    }

    /// Collects one deleted entry, re-queueing it if the batch job could not
    /// be removed.
    ///
    /// A record recreated under the same key keeps its entry, but a batch job
    /// still controlled by the previous record is deleted.
    #[instrument(skip(self), fields(job = %key))]
    pub async fn collect(&self, key: &JobKey) {
        {
            let mut state = self.state.lock().await;
            let Some(entry) = state.jobs.get(key) else {
                self.deleted.forget(key);
                return;
            };
            let stale = is_stale(entry);
            match (entry.record.is_some(), entry.batch_job.is_some()) {
                (true, _) if stale => {
                    debug!("job recreated, deleting batch job of the previous record");
                }
                (true, _) => {
                    // recreated since deletion
                    self.deleted.forget(key);
                    return;
                }
                (false, false) => {
                    state.jobs.remove(key);
                    self.deleted.forget(key);
                    debug!("entry collected");
                    return;
                }
                (false, true) => {}
            }
        }

        match self.client.delete(key).await {
            Ok(()) | Err(BatchError::NotFound(_)) => {}
            Err(e) => {
                warn!(error = %e, "failed to delete batch job, will retry");
                self.deleted.add_rate_limited(key.clone());
                return;
            }
        }

        let mut state = self.state.lock().await;
        let recreated = state.jobs.get(key).is_some_and(|e| e.record.is_some());
        if !recreated {
            state.jobs.remove(key);
        } else if let Some(entry) = state.jobs.get_mut(key) {
            if is_stale(entry) {
                entry.batch_job = None;
            }
        }
        self.deleted.forget(key);
        info!("deleted job collected");
    }
}

/// True when the entry's batch job is controlled by a different record than
/// the one now cached.
fn is_stale(entry: &JobEntry) -> bool {
    match (&entry.record, &entry.batch_job) {
        (Some(record), Some(batch)) => batch
            .meta
            .controller_of_kind(JOB_KIND)
            .is_some_and(|owner| owner.uid != record.meta.uid),
        _ => false,
    }
}
