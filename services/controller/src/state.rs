//! Per-job lifecycle state machine.
//!
//! ```text
//! Empty -> Idle -> Scheduled -> Running <-> Preempted
//!                      \           \           \
//!                       +-----------+-----------+--> Completed | Failed
//! ```
//!
//! The action run for a job is chosen from its recorded state alone.

use stride_api::{BatchPhase, JobState};
use stride_reconcile::ReconcileError;
use tracing::debug;

use crate::updater::Updater;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No state recorded yet.
    Empty,
    Idle,
    Scheduled,
    Running,
    Preempted,
    /// Completed or Failed.
    Finished,
}

impl Lifecycle {
    pub fn for_state(state: Option<JobState>) -> Self {
        match state {
            None => Lifecycle::Empty,
            Some(JobState::Idle) => Lifecycle::Idle,
            Some(JobState::Scheduled) => Lifecycle::Scheduled,
            Some(JobState::Running) => Lifecycle::Running,
            Some(JobState::Preempted) => Lifecycle::Preempted,
            Some(JobState::Completed | JobState::Failed) => Lifecycle::Finished,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Empty => "empty",
            Lifecycle::Idle => "idle",
            Lifecycle::Scheduled => "scheduled",
            Lifecycle::Running => "running",
            Lifecycle::Preempted => "preempted",
            Lifecycle::Finished => "finished",
        }
    }

    pub async fn execute(self, updater: &mut Updater<'_>) -> Result<(), ReconcileError> {
        debug!(job = %updater.key(), state = self.name(), "executing state");

        match self {
            Lifecycle::Empty => updater.update_state(JobState::Idle).await,

            Lifecycle::Idle => {
                if updater.scheduled().is_zero() {
                    return Ok(());
                }
                updater.reconcile().await?;
                updater.update_state(JobState::Scheduled).await
            }

            Lifecycle::Scheduled => {
                let phase = updater.batch_phase();
                if let Some(done) = finished_state(phase) {
                    return updater.update_state(done).await;
                }
                updater.reconcile().await?;
                if phase == Some(BatchPhase::Running) {
                    return updater.update_state(JobState::Running).await;
                }
                Ok(())
            }

            Lifecycle::Running => {
                if let Some(done) = finished_state(updater.batch_phase()) {
                    return updater.update_state(done).await;
                }
                updater.reconcile().await?;
                if updater.scheduled().is_zero() {
                    return updater.update_state(JobState::Preempted).await;
                }
                Ok(())
            }

            Lifecycle::Preempted => {
                if let Some(done) = finished_state(updater.batch_phase()) {
                    return updater.update_state(done).await;
                }
                if updater.scheduled().is_zero() {
                    return Ok(());
                }
                updater.reconcile().await?;
                updater.update_state(JobState::Running).await
            }

            Lifecycle::Finished => Ok(()),
        }
    }
}

fn finished_state(phase: Option<BatchPhase>) -> Option<JobState> {
    match phase {
        Some(BatchPhase::Completed) => Some(JobState::Completed),
        Some(BatchPhase::Failed) => Some(JobState::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use rstest::rstest;
    use stride_api::{
        Allocation, Container, JobRecord, JobSpec, JobStore, JobType, MemoryJobStore, PodTemplate, RoleSpec,
    };
    use stride_id::JobKey;

    use super::*;
    use crate::cache::ControllerCache;
    use crate::client::MemoryBatchClient;
    use crate::updater::Context;

    struct Fixture {
        ctx: Context,
        store: Arc<MemoryJobStore>,
        client: Arc<MemoryBatchClient>,
        key: JobKey,
    }

    fn role() -> RoleSpec {
        RoleSpec {
            template: PodTemplate {
                containers: vec![Container {
                    name: "main".to_string(),
                    image: "trainer:latest".to_string(),
                    ..Default::default()
                }],
                node_selector: BTreeMap::new(),
            },
            ..Default::default()
        }
    }

    /// A ps-worker job in the given state with the given scheduled counts.
    async fn fixture(state: Option<JobState>, scheduled: Allocation) -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let client = Arc::new(MemoryBatchClient::new());
        let cache = Arc::new(ControllerCache::new(client.clone()));

        let record = JobRecord::new(
            "default",
            "train",
            JobSpec {
                job_type: JobType::PsWorker,
                master: role(),
                replica: role(),
                num_masters: scheduled.masters,
                num_replicas: scheduled.replicas,
                volumes: Vec::new(),
            },
        );
        let key = record.key().unwrap();
        store.create(record).await.unwrap();
        store.update_allocation(&key, scheduled).await.unwrap();
        let record = match state {
            Some(state) => store.update_state(&key, state).await.unwrap(),
            None => store.get(&key).await.unwrap(),
        };
        cache.upsert_job(key.clone(), record).await;

        Fixture {
            ctx: Context {
                cache,
                client: client.clone(),
                store: store.clone(),
                scheduler_name: "volcano".to_string(),
            },
            store,
            client,
            key,
        }
    }

    impl Fixture {
        async fn step(&self) -> Result<(), ReconcileError> {
            let entry = self.ctx.cache.get(&self.key).await?;
            let mut updater = Updater::new(&self.ctx, self.key.clone(), entry)?;
            Lifecycle::for_state(updater.state()).execute(&mut updater).await
        }

        async fn state(&self) -> Option<JobState> {
            self.store.get(&self.key).await.unwrap().state()
        }

        async fn batch_phase(&self, phase: BatchPhase) {
            let batch = self.client.set_phase(&self.key, phase).await.unwrap();
            self.ctx.cache.upsert_batch_job(self.key.clone(), batch).await;
        }
    }

    #[tokio::test]
    async fn test_empty_becomes_idle() {
        let f = fixture(None, Allocation::ZERO).await;
        f.step().await.unwrap();
        assert_eq!(f.state().await, Some(JobState::Idle));
        assert_eq!(f.client.writes(), 0);
    }

    #[tokio::test]
    async fn test_idle_without_allocation_stays_idle() {
        let f = fixture(Some(JobState::Idle), Allocation::ZERO).await;
        let writes = f.store.state_writes();
        f.step().await.unwrap();
        assert_eq!(f.state().await, Some(JobState::Idle));
        assert_eq!(f.client.writes(), 0);
        assert_eq!(f.store.state_writes(), writes);
    }

    #[tokio::test]
    async fn test_idle_with_allocation_creates_batch_job() {
        let f = fixture(Some(JobState::Idle), Allocation::new(1, 2)).await;
        f.step().await.unwrap();

        assert_eq!(f.state().await, Some(JobState::Scheduled));
        let jobs = f.client.list().await;
        assert_eq!(jobs.len(), 1);
        let tasks: Vec<(&str, u32)> = jobs[0]
            .spec
            .tasks
            .iter()
            .map(|t| (t.name.as_str(), t.replicas))
            .collect();
        assert_eq!(tasks, vec![("ps", 1), ("worker", 2)]);
        assert_eq!(jobs[0].spec.min_available, 3);
    }

    #[tokio::test]
    async fn test_scheduled_moves_to_running() {
        let f = fixture(Some(JobState::Idle), Allocation::new(1, 2)).await;
        f.step().await.unwrap();

        f.step().await.unwrap();
        assert_eq!(f.state().await, Some(JobState::Scheduled));

        f.batch_phase(BatchPhase::Running).await;
        f.step().await.unwrap();
        assert_eq!(f.state().await, Some(JobState::Running));
        assert_eq!(f.client.creates(), 1);
        assert_eq!(f.client.updates(), 0);
    }

    #[tokio::test]
    async fn test_running_preempted_and_resumed() {
        let f = fixture(Some(JobState::Idle), Allocation::new(1, 2)).await;
        f.step().await.unwrap();
        f.batch_phase(BatchPhase::Running).await;
        f.step().await.unwrap();

        let preempted = f.store.update_allocation(&f.key, Allocation::ZERO).await.unwrap();
        f.ctx.cache.upsert_job(f.key.clone(), preempted).await;
        f.step().await.unwrap();
        assert_eq!(f.state().await, Some(JobState::Preempted));
        let batch = &f.client.list().await[0];
        assert_eq!(batch.spec.min_available, 0);

        f.step().await.unwrap();
        assert_eq!(f.state().await, Some(JobState::Preempted));

        let resumed = f.store.update_allocation(&f.key, Allocation::new(1, 1)).await.unwrap();
        f.ctx.cache.upsert_job(f.key.clone(), resumed).await;
        f.step().await.unwrap();
        assert_eq!(f.state().await, Some(JobState::Running));
        assert_eq!(f.client.list().await[0].spec.min_available, 2);
    }

    #[rstest]
    #[case(JobState::Scheduled, BatchPhase::Completed, JobState::Completed)]
    #[case(JobState::Running, BatchPhase::Completed, JobState::Completed)]
    #[case(JobState::Preempted, BatchPhase::Completed, JobState::Completed)]
    #[case(JobState::Scheduled, BatchPhase::Failed, JobState::Failed)]
    #[case(JobState::Running, BatchPhase::Failed, JobState::Failed)]
    #[tokio::test]
    async fn test_batch_outcome_finishes_job(
        #[case] state: JobState,
        #[case] phase: BatchPhase,
        #[case] expected: JobState,
    ) {
        let f = fixture(Some(JobState::Idle), Allocation::new(1, 1)).await;
        f.step().await.unwrap();
        let moved = f.store.update_state(&f.key, state).await.unwrap();
        f.ctx.cache.upsert_job(f.key.clone(), moved).await;

        f.batch_phase(phase).await;
        f.step().await.unwrap();
        assert_eq!(f.state().await, Some(expected));
    }

    #[tokio::test]
    async fn test_finished_is_terminal() {
        let f = fixture(Some(JobState::Completed), Allocation::new(1, 1)).await;
        let writes = f.store.state_writes();
        f.step().await.unwrap();
        assert_eq!(f.client.writes(), 0);
        assert_eq!(f.store.state_writes(), writes);
    }

    #[tokio::test]
    async fn test_terminating_job_not_reconciled() {
        let f = fixture(Some(JobState::Scheduled), Allocation::new(1, 1)).await;
        let terminating = f.store.mark_terminating(&f.key).await.unwrap();
        f.ctx.cache.upsert_job(f.key.clone(), terminating).await;

        f.step().await.unwrap();
        assert_eq!(f.client.writes(), 0);
    }

    #[test]
    fn test_for_state() {
        assert_eq!(Lifecycle::for_state(None), Lifecycle::Empty);
        assert_eq!(Lifecycle::for_state(Some(JobState::Failed)), Lifecycle::Finished);
        assert_eq!(Lifecycle::for_state(Some(JobState::Preempted)).name(), "preempted");
    }
}
