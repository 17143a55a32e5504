//! Partitioned job controller.
//!
//! Watch events update the cache and enqueue the affected job key. Keys are
//! hashed onto a fixed set of partitions, each drained by one worker, so a
//! job is never reconciled concurrently with itself.

use std::sync::Arc;

use stride_api::{BatchJob, ClusterEvent, JobRecord, JobStore, NodeObject, WatchEvent, JOB_KIND};
use stride_id::JobKey;
use stride_reconcile::{BackoffPolicy, PartitionedQueue, ReconcileError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::cache::ControllerCache;
use crate::client::BatchJobClient;
use crate::config::Config;
use crate::events::{Event, EventSink};
use crate::state::Lifecycle;
use crate::updater::{Context, Updater};

pub struct Controller {
    ctx: Context,
    queue: PartitionedQueue<JobKey>,
    events: Arc<dyn EventSink>,
    max_retries: u32,
}

impl Controller {
    pub fn new(
        config: &Config,
        store: Arc<dyn JobStore>,
        client: Arc<dyn BatchJobClient>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let backoff = BackoffPolicy::new(config.backoff_base, config.backoff_max);
        Self {
            ctx: Context {
                cache: Arc::new(ControllerCache::new(Arc::clone(&client))),
                client,
                store,
                scheduler_name: config.scheduler_name.clone(),
            },
            queue: PartitionedQueue::new(config.workers, backoff),
            events,
            max_retries: config.max_retries,
        }
    }

    pub fn cache(&self) -> &Arc<ControllerCache> {
        &self.ctx.cache
    }

    /// Keys waiting across all partitions.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Routes a watch event to the cache and, if relevant, the job's queue.
    pub async fn handle_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::Job(event) => self.on_job(event).await,
            ClusterEvent::BatchJob(event) => self.on_batch_job(event).await,
            ClusterEvent::Node(event) => self.on_node(event).await,
        }
    }

    async fn on_job(&self, event: WatchEvent<JobRecord>) {
        let record = event.object();
        let key = match record.key() {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, name = %record.meta.name, "ignoring job with invalid key");
                return;
            }
        };

        match event {
            WatchEvent::Added(record) => {
                self.ctx.cache.upsert_job(key.clone(), record).await;
                self.queue.add(key);
            }
            WatchEvent::Modified { old, new } => {
                if old.meta.resource_version == new.meta.resource_version {
                    return;
                }
                let unchanged = old.spec == new.spec && old.status == new.status;
                self.ctx.cache.upsert_job(key.clone(), new).await;
                if unchanged {
                    debug!(job = %key, "job update ignored, spec and status unchanged");
                    return;
                }
                self.queue.add(key);
            }
            WatchEvent::Deleted(_) => {
                self.ctx.cache.delete_job(&key).await;
            }
        }
    }

    async fn on_batch_job(&self, event: WatchEvent<BatchJob>) {
        let batch = event.object();
        if batch.meta.controller_of_kind(JOB_KIND).is_none() {
            return;
        }
        let key = match JobKey::from_parts(&batch.meta.namespace, &batch.meta.name) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, name = %batch.meta.name, "ignoring batch job with invalid key");
                return;
            }
        };
        if matches!(&event, WatchEvent::Modified { old, new }
            if old.meta.resource_version == new.meta.resource_version)
        {
            return;
        }

        match event {
            WatchEvent::Added(batch) | WatchEvent::Modified { new: batch, .. } => {
                if batch.meta.is_terminating() {
                    self.ctx.cache.delete_batch_job(&key).await;
                    return;
                }
                self.ctx.cache.upsert_batch_job(key.clone(), batch).await;
                self.queue.add(key);
            }
            WatchEvent::Deleted(_) => {
                if self.ctx.cache.delete_batch_job(&key).await {
                    // the record outlived its batch job
                    self.queue.add(key);
                }
            }
        }
    }

    async fn on_node(&self, event: WatchEvent<NodeObject>) {
        match event {
            WatchEvent::Added(node) | WatchEvent::Modified { new: node, .. } => {
                self.ctx.cache.upsert_node(node).await;
            }
            WatchEvent::Deleted(node) => {
                self.ctx.cache.delete_node(&node.name).await;
            }
        }
    }

    /// Runs one lifecycle step for a job.
    #[instrument(skip(self), fields(job = %key))]
    pub async fn reconcile(&self, key: &JobKey) -> Result<(), ReconcileError> {
        let entry = match self.ctx.cache.get(key).await {
            Ok(entry) => entry,
            Err(ReconcileError::NotFound(reason)) => {
                debug!(%reason, "job not in cache, nothing to do");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut updater = Updater::new(&self.ctx, key.clone(), entry)?;
        let lifecycle = Lifecycle::for_state(updater.state());
        lifecycle.execute(&mut updater).await
    }

    /// Takes one key from a partition and reconciles it.
    ///
    /// Returns false once the partition is shut down.
    pub async fn process_next(&self, partition: usize) -> bool {
        let Some(queue) = self.queue.queue(partition) else {
            return false;
        };
        let Some(key) = queue.get().await else {
            return false;
        };

        match self.reconcile(&key).await {
            Ok(()) => queue.forget(&key),
            Err(e) if !e.is_retryable() => {
                error!(job = %key, error = %e, "reconcile failed, not retrying");
                self.events
                    .record(Event::warning(key.clone(), event_reason(&e), e.to_string()))
                    .await;
                queue.forget(&key);
            }
            Err(e) => {
                let retries = queue.num_requeues(&key);
                if retries < self.max_retries {
                    debug!(job = %key, error = %e, retries, "reconcile failed, requeueing");
                    queue.add_rate_limited(key.clone());
                } else {
                    warn!(
                        job = %key,
                        error = %e,
                        retries,
                        "dropping job out of the queue, max retries reached"
                    );
                    queue.forget(&key);
                }
            }
        }

        queue.done(&key);
        true
    }

    async fn worker(&self, partition: usize) {
        info!(partition, "worker started");
        while self.process_next(partition).await {}
        info!(partition, "worker stopped");
    }

    /// Runs the partition workers and the collector, applying events until
    /// the channel closes or shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ClusterEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(partitions = self.queue.partitions(), "Starting controller");

        let workers: Vec<_> = (0..self.queue.partitions())
            .map(|partition| {
                let this = Arc::clone(&self);
                tokio::spawn(async move { this.worker(partition).await })
            })
            .collect();

        let gc = tokio::spawn({
            let cache = Arc::clone(&self.ctx.cache);
            let shutdown = shutdown.clone();
            async move { cache.run_gc(shutdown).await }
        });

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            info!("Event source closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Controller shutting down");
                        break;
                    }
                }
            }
        }

        self.queue.shut_down();
        self.ctx.cache.shut_down_gc();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task panicked");
            }
        }
        if let Err(e) = gc.await {
            error!(error = %e, "collector task panicked");
        }
    }
}

fn event_reason(e: &ReconcileError) -> &'static str {
    match e {
        ReconcileError::NotFound(_) => "NotFound",
        ReconcileError::Conflict(_) => "Conflict",
        ReconcileError::Ownership(_) => "OwnershipConflict",
        ReconcileError::InvalidState(_) => "InvalidState",
        ReconcileError::External(_) => "ExternalError",
        ReconcileError::Internal(_) => "InternalError",
    }
}
