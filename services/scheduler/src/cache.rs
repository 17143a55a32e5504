//! Cluster cache: event-fed job and node state with snapshot/commit.
//!
//! All mutation and snapshot construction happen under one coarse lock. A
//! snapshot is a deep copy, so policies never observe a cache mutated
//! mid-cycle. Commit writes back only the jobs a policy marked changed.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use stride_api::{
    Allocation, ClusterEvent, JobRecord, JobState, JobStore, NodeInfo, NodeRegistry, StoreError,
    WatchEvent,
};
use stride_id::JobKey;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::policy::Policy;
use crate::snapshot::{ClusterSnapshot, JobInfo};

/// Below this many jobs the snapshot decodes custom fields inline.
const PARALLEL_DECODE_THRESHOLD: usize = 64;

#[derive(Default)]
struct CacheState {
    jobs: BTreeMap<JobKey, JobRecord>,
    nodes: NodeRegistry,
}

/// Outcome of one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Jobs whose allocation or state was written.
    pub written: usize,
    /// Changed jobs that needed no write.
    pub skipped: usize,
    /// Jobs whose write failed.
    pub failed: usize,
}

/// Writes needed to bring one job record in line with a snapshot.
#[derive(Debug)]
struct CommitPlan {
    key: JobKey,
    allocation: Option<Allocation>,
    state: Option<JobState>,
}

/// Result of applying one plan: the last record written, if any, and the
/// error that stopped it.
#[derive(Debug, Default)]
struct Applied {
    record: Option<JobRecord>,
    error: Option<StoreError>,
}

pub struct ClusterCache {
    state: Mutex<CacheState>,
    store: Arc<dyn JobStore>,
    snapshot_workers: usize,
    commit_workers: usize,
}

impl ClusterCache {
    pub fn new(store: Arc<dyn JobStore>, snapshot_workers: usize, commit_workers: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            store,
            snapshot_workers: snapshot_workers.max(1),
            commit_workers: commit_workers.max(1),
        }
    }

    /// Applies events until the channel closes or shutdown is signalled.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ClusterEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting cluster cache");

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
                        info!("Cluster cache shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Applies one watch event.
    pub async fn handle_event(&self, event: ClusterEvent) {
        let mut state = self.state.lock().await;

        match event {
            ClusterEvent::Job(WatchEvent::Added(record))
            | ClusterEvent::Job(WatchEvent::Modified { new: record, .. }) => {
                let key = match record.key() {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(
                            error = %e,
                            name = %record.meta.name,
                            "ignoring job with invalid key"
                        );
                        return;
                    }
                };

                if record.state().is_some_and(|s| s.is_terminal()) {
                    if state.jobs.remove(&key).is_some() {
                        debug!(job = %key, "job finished, dropped from cache");
                    }
                    return;
                }

                if let Some(cached) = state.jobs.get(&key) {
                    if cached.meta.resource_version > record.meta.resource_version {
                        trace!(job = %key, "ignoring stale job event");
                        return;
                    }
                }
                state.jobs.insert(key, record);
            }
            ClusterEvent::Job(WatchEvent::Deleted(record)) => {
                if let Ok(key) = record.key() {
                    state.jobs.remove(&key);
                }
            }
            ClusterEvent::Node(WatchEvent::Added(node))
            | ClusterEvent::Node(WatchEvent::Modified { new: node, .. }) => {
                let name = node.name.clone();
                if state.nodes.add_or_update(node) {
                    debug!(node = %name, "node types changed");
                }
            }
            ClusterEvent::Node(WatchEvent::Deleted(node)) => {
                state.nodes.delete(&node.name);
            }
            ClusterEvent::BatchJob(_) => {}
        }
    }

    pub async fn job(&self, key: &JobKey) -> Option<JobRecord> {
        self.state.lock().await.jobs.get(key).cloned()
    }

    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn node(&self, name: &str) -> Option<NodeInfo> {
        self.state.lock().await.nodes.get(name).cloned()
    }

    /// Copies schedulable nodes and all jobs into an independent snapshot.
    ///
    /// Jobs whose custom fields the policy cannot decode are left out of this
    /// cycle.
    #[instrument(skip_all, fields(policy = policy.name()))]
    pub async fn snapshot(&self, policy: Arc<dyn Policy>) -> ClusterSnapshot {
        let (records, nodes) = {
            let state = self.state.lock().await;
            let nodes: Vec<NodeInfo> = state
                .nodes
                .nodes()
                .filter(|n| n.is_schedulable())
                .cloned()
                .collect();
            let records: Vec<JobRecord> = state.jobs.values().cloned().collect();
            (records, nodes)
        };

        let jobs = self.decode_jobs(policy, records).await;
        let snapshot = ClusterSnapshot::new(jobs, nodes);
        debug!(
            snapshot = %snapshot.id,
            jobs = snapshot.jobs.len(),
            nodes = snapshot.nodes.len(),
            "snapshot taken"
        );
        snapshot
    }

    async fn decode_jobs(&self, policy: Arc<dyn Policy>, records: Vec<JobRecord>) -> Vec<JobInfo> {
        if records.len() < PARALLEL_DECODE_THRESHOLD || self.snapshot_workers == 1 {
            return records
                .into_iter()
                .filter_map(|r| decode_job(policy.as_ref(), r))
                .collect();
        }

        let chunk_size = records.len().div_ceil(self.snapshot_workers);
        let mut records = records.into_iter().peekable();
        let mut set = JoinSet::new();
        while records.peek().is_some() {
            let chunk: Vec<JobRecord> = records.by_ref().take(chunk_size).collect();
            let policy = Arc::clone(&policy);
            set.spawn_blocking(move || {
                chunk
                    .into_iter()
                    .filter_map(|r| decode_job(policy.as_ref(), r))
                    .collect::<Vec<_>>()
            });
        }

        let mut jobs = Vec::new();
        while let Some(result) = set.join_next().await {
            match result {
                Ok(decoded) => jobs.extend(decoded),
                Err(e) => error!(error = %e, "job decode task failed"),
            }
        }
        jobs
    }

    /// Writes back every job the policy marked changed.
    ///
    /// Idle jobs given a nonzero allocation move to Scheduled; Scheduled jobs
    /// whose allocation drops to zero move back to Idle. Each job's write is
    /// independent and failures are logged, not propagated.
    #[instrument(skip_all, fields(snapshot = %snapshot.id))]
    pub async fn commit(&self, snapshot: &ClusterSnapshot) -> CommitStats {
        let mut stats = CommitStats::default();

        let plans: Vec<CommitPlan> = {
            let state = self.state.lock().await;
            let mut plans = Vec::new();
            for key in snapshot.changes() {
                let (Some(job), Some(cached)) = (snapshot.jobs.get(key), state.jobs.get(key)) else {
                    stats.skipped += 1;
                    continue;
                };

                let allocation = (cached.scheduled() != job.scheduled).then_some(job.scheduled);
                let next_state = match cached.state() {
                    Some(JobState::Idle) if !job.scheduled.is_zero() => Some(JobState::Scheduled),
                    Some(JobState::Scheduled) if job.scheduled.is_zero() => Some(JobState::Idle),
                    _ => None,
                };

                if allocation.is_none() && next_state.is_none() {
                    stats.skipped += 1;
                    continue;
                }
                plans.push(CommitPlan {
                    key: key.clone(),
                    allocation,
                    state: next_state,
                });
            }
            plans
        };

        let results: Vec<(JobKey, Applied)> = stream::iter(plans)
            .map(|plan| async move {
                let applied = self.apply(&plan).await;
                (plan.key, applied)
            })
            .buffer_unordered(self.commit_workers)
            .collect()
            .await;

        let mut state = self.state.lock().await;
        for (key, applied) in results {
            if let Some(record) = applied.record {
                if let Some(cached) = state.jobs.get_mut(&key) {
                    if record.meta.resource_version >= cached.meta.resource_version {
                        *cached = record;
                    }
                }
            }
            match applied.error {
                None => stats.written += 1,
                Some(e) => {
                    stats.failed += 1;
                    warn!(job = %key, error = %e, "failed to commit allocation");
                }
            }
        }

        stats
    }

    /// Writes the allocation, then the state.
    ///
    /// The two writes are not atomic. If the state write fails the record
    /// keeps the new allocation in its old state (Idle with replicas, or
    /// Scheduled with none). That record is still returned so the cache
    /// reflects it and the next commit only retries the state.
    async fn apply(&self, plan: &CommitPlan) -> Applied {
        let mut applied = Applied::default();
        if let Some(allocation) = plan.allocation {
            debug!(job = %plan.key, %allocation, "committing allocation");
            match self.store.update_allocation(&plan.key, allocation).await {
                Ok(record) => applied.record = Some(record),
                Err(e) => {
                    applied.error = Some(e);
                    return applied;
                }
            }
        }
        if let Some(state) = plan.state {
            debug!(job = %plan.key, %state, "committing state");
            match self.store.update_state(&plan.key, state).await {
                Ok(record) => applied.record = Some(record),
                Err(e) => applied.error = Some(e),
            }
        }
        applied
    }
}

fn decode_job(policy: &dyn Policy, record: JobRecord) -> Option<JobInfo> {
    let blob = record.custom_fields().map(str::to_owned);
    let info = match JobInfo::from_record(record) {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "skipping job with invalid key");
            return None;
        }
    };

    match policy.decode_custom_fields(blob.as_deref()) {
        Ok(fields) => Some(info.with_custom_fields(fields)),
        Err(e) => {
            warn!(job = %info.key, error = %e, "skipping job with undecodable custom fields");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use stride_api::{
        JobType, MemoryJobStore, NodeCondition, NodeObject, Quantity, Taint, TaintEffect,
        CUSTOM_FIELDS_ANNOTATION, NODE_READY_CONDITION,
    };

    use super::*;
    use crate::policy::{ElasticPolicy, NoopProbe, PassThroughPolicy};
    use crate::snapshot::testing::record;

    fn node(name: &str) -> NodeObject {
        NodeObject {
            name: name.to_string(),
            allocatable: [("cpu".to_string(), Quantity::from_value(4))].into(),
            conditions: vec![NodeCondition {
                condition_type: NODE_READY_CONDITION.to_string(),
                status: "True".to_string(),
                reason: None,
            }],
            ..Default::default()
        }
    }

    async fn seeded(store: Arc<MemoryJobStore>, records: Vec<JobRecord>) -> ClusterCache {
        let cache = ClusterCache::new(store.clone(), 4, 4);
        for r in records {
            let created = store.create(r).await.unwrap();
            cache.handle_event(ClusterEvent::Job(WatchEvent::Added(created))).await;
        }
        cache
    }

    fn key(name: &str) -> JobKey {
        format!("default/{name}").parse().unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_excludes_unschedulable_nodes() {
        let cache = ClusterCache::new(Arc::new(MemoryJobStore::new()), 4, 4);

        let mut cordoned = node("cordoned");
        cordoned.unschedulable = true;
        let mut tainted = node("tainted");
        tainted.taints.push(Taint {
            key: "dedicated".to_string(),
            value: "infra".to_string(),
            effect: TaintEffect::NoSchedule,
        });
        let mut soft = node("soft");
        soft.taints.push(Taint {
            key: "spot".to_string(),
            value: String::new(),
            effect: TaintEffect::PreferNoSchedule,
        });
        let mut not_ready = node("not-ready");
        not_ready.conditions[0].status = "False".to_string();

        for n in [node("ok"), cordoned, tainted, soft, not_ready] {
            cache.handle_event(ClusterEvent::Node(WatchEvent::Added(n))).await;
        }

        let snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        let names: Vec<_> = snapshot.nodes.keys().cloned().collect();
        assert_eq!(names, vec!["ok".to_string(), "soft".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_events() {
        let store = Arc::new(MemoryJobStore::new());
        let jobs = vec![record("a", JobType::Symmetric, Allocation::new(0, 1))];
        let cache = seeded(store, jobs).await;
        cache.handle_event(ClusterEvent::Node(WatchEvent::Added(node("n0")))).await;

        let snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        cache.handle_event(ClusterEvent::Node(WatchEvent::Added(node("n1")))).await;
        cache
            .handle_event(ClusterEvent::Job(WatchEvent::Added(
                record("b", JobType::Symmetric, Allocation::ZERO),
            )))
            .await;

        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(cache.job_count().await, 2);
    }

    #[tokio::test]
    async fn test_terminal_jobs_leave_cache() {
        let store = Arc::new(MemoryJobStore::new());
        let jobs = vec![record("a", JobType::Symmetric, Allocation::ZERO)];
        let cache = seeded(store.clone(), jobs).await;

        let done = store.update_state(&key("a"), JobState::Completed).await.unwrap();
        cache.handle_event(ClusterEvent::Job(WatchEvent::Added(done))).await;
        assert!(cache.job(&key("a")).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_event_ignored() {
        let store = Arc::new(MemoryJobStore::new());
        let jobs = vec![record("a", JobType::Symmetric, Allocation::ZERO)];
        let cache = seeded(store.clone(), jobs).await;
        let stale = store.get(&key("a")).await.unwrap();
        let fresh = store.update_state(&key("a"), JobState::Idle).await.unwrap();

        cache.handle_event(ClusterEvent::Job(WatchEvent::Added(fresh.clone()))).await;
        cache.handle_event(ClusterEvent::Job(WatchEvent::Added(stale))).await;
        assert_eq!(
            cache.job(&key("a")).await.unwrap().meta.resource_version,
            fresh.meta.resource_version
        );
    }

    #[tokio::test]
    async fn test_undecodable_job_skipped() {
        let store = Arc::new(MemoryJobStore::new());
        let mut bad = record("bad", JobType::Symmetric, Allocation::ZERO);
        bad.meta
            .annotations
            .insert(CUSTOM_FIELDS_ANNOTATION.to_string(), "batchSize: [".to_string());
        let cache = seeded(
            store,
            vec![bad, record("good", JobType::Symmetric, Allocation::ZERO)],
        )
        .await;

        let snapshot = cache.snapshot(Arc::new(ElasticPolicy::new(Arc::new(NoopProbe)))).await;
        assert_eq!(snapshot.jobs.keys().cloned().collect::<Vec<_>>(), vec![key("good")]);
    }

    #[tokio::test]
    async fn test_parallel_decode_keeps_every_job() {
        let store = Arc::new(MemoryJobStore::new());
        let records = (0..PARALLEL_DECODE_THRESHOLD * 2)
            .map(|i| record(&format!("job-{i}"), JobType::Symmetric, Allocation::ZERO))
            .collect();
        let cache = seeded(store, records).await;

        let snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        assert_eq!(snapshot.jobs.len(), PARALLEL_DECODE_THRESHOLD * 2);
    }

    #[tokio::test]
    async fn test_commit_writes_only_changed_jobs() {
        let store = Arc::new(MemoryJobStore::new());
        let cache = seeded(
            store.clone(),
            vec![
                record("a", JobType::Symmetric, Allocation::ZERO),
                record("b", JobType::Symmetric, Allocation::ZERO),
            ],
        )
        .await;

        let mut snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        snapshot.set_allocation(&key("a"), Allocation::new(0, 2));

        let stats = cache.commit(&snapshot).await;
        assert_eq!(stats, CommitStats { written: 1, skipped: 0, failed: 0 });
        assert_eq!(store.allocation_writes(), 1);
        assert_eq!(store.get(&key("b")).await.unwrap().scheduled(), Allocation::ZERO);
        assert_eq!(
            cache.job(&key("a")).await.unwrap().scheduled(),
            Allocation::new(0, 2)
        );
    }

    #[tokio::test]
    async fn test_commit_skips_unchanged_allocation() {
        let store = Arc::new(MemoryJobStore::new());
        let jobs = vec![record("a", JobType::Symmetric, Allocation::ZERO)];
        let cache = seeded(store.clone(), jobs).await;

        let mut snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        snapshot.set_allocation(&key("a"), Allocation::ZERO);

        let stats = cache.commit(&snapshot).await;
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.allocation_writes(), 0);
    }

    #[tokio::test]
    async fn test_commit_moves_idle_to_scheduled_and_back() {
        let store = Arc::new(MemoryJobStore::new());
        let jobs = vec![record("a", JobType::PsWorker, Allocation::ZERO)];
        let cache = seeded(store.clone(), jobs).await;
        let idle = store.update_state(&key("a"), JobState::Idle).await.unwrap();
        cache.handle_event(ClusterEvent::Job(WatchEvent::Added(idle))).await;

        let mut snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        snapshot.set_allocation(&key("a"), Allocation::new(1, 2));
        cache.commit(&snapshot).await;
        let record = store.get(&key("a")).await.unwrap();
        assert_eq!(record.state(), Some(JobState::Scheduled));
        assert_eq!(record.scheduled(), Allocation::new(1, 2));

        let mut snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        snapshot.set_allocation(&key("a"), Allocation::ZERO);
        cache.commit(&snapshot).await;
        assert_eq!(store.get(&key("a")).await.unwrap().state(), Some(JobState::Idle));
    }

    #[tokio::test]
    async fn test_commit_failure_does_not_abort_batch() {
        let store = Arc::new(MemoryJobStore::new());
        let cache = seeded(
            store.clone(),
            vec![
                record("a", JobType::Symmetric, Allocation::ZERO),
                record("b", JobType::Symmetric, Allocation::ZERO),
                record("c", JobType::Symmetric, Allocation::ZERO),
            ],
        )
        .await;

        let mut snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        for name in ["a", "b", "c"] {
            snapshot.set_allocation(&key(name), Allocation::new(0, 1));
        }
        store.fail_next_writes(1);

        let stats = cache.commit(&snapshot).await;
        assert_eq!(stats.written, 2);
        assert_eq!(stats.failed, 1);
    }

    /// Delegates to a memory store but fails state writes while `fail_state` is set.
    struct StateFailingStore {
        inner: Arc<MemoryJobStore>,
        fail_state: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl JobStore for StateFailingStore {
        async fn get(&self, key: &JobKey) -> Result<JobRecord, StoreError> {
            self.inner.get(key).await
        }

        async fn update_allocation(
            &self,
            key: &JobKey,
            allocation: Allocation,
        ) -> Result<JobRecord, StoreError> {
            self.inner.update_allocation(key, allocation).await
        }

        async fn update_state(
            &self,
            key: &JobKey,
            state: JobState,
        ) -> Result<JobRecord, StoreError> {
            if self.fail_state.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Unavailable("state writes disabled".to_string()));
            }
            self.inner.update_state(key, state).await
        }
    }

    #[tokio::test]
    async fn test_failed_state_write_keeps_allocation_and_retries_state() {
        let inner = Arc::new(MemoryJobStore::new());
        inner.create(record("a", JobType::PsWorker, Allocation::ZERO)).await.unwrap();
        let idle = inner.update_state(&key("a"), JobState::Idle).await.unwrap();

        let store = Arc::new(StateFailingStore {
            inner: inner.clone(),
            fail_state: std::sync::atomic::AtomicBool::new(true),
        });
        let cache = ClusterCache::new(store.clone(), 4, 4);
        cache.handle_event(ClusterEvent::Job(WatchEvent::Added(idle))).await;

        let mut snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        snapshot.set_allocation(&key("a"), Allocation::new(1, 2));
        let stats = cache.commit(&snapshot).await;
        assert_eq!(stats.failed, 1);

        let cached = cache.job(&key("a")).await.unwrap();
        assert_eq!(cached.scheduled(), Allocation::new(1, 2));
        assert_eq!(cached.state(), Some(JobState::Idle));

        store.fail_state.store(false, std::sync::atomic::Ordering::SeqCst);
        let allocation_writes = inner.allocation_writes();
        let mut snapshot = cache.snapshot(Arc::new(PassThroughPolicy)).await;
        snapshot.set_allocation(&key("a"), Allocation::new(1, 2));
        let stats = cache.commit(&snapshot).await;
        assert_eq!(stats.written, 1);
        assert_eq!(inner.allocation_writes(), allocation_writes);

        let record = inner.get(&key("a")).await.unwrap();
        assert_eq!(record.state(), Some(JobState::Scheduled));
        assert_eq!(record.scheduled(), Allocation::new(1, 2));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let cache = Arc::new(ClusterCache::new(Arc::new(MemoryJobStore::new()), 1, 1));
        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.run(rx, shutdown_rx).await }
        });

        tx.send(ClusterEvent::Node(WatchEvent::Added(node("n0")))).await.unwrap();
        while cache.node("n0").await.is_none() {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
