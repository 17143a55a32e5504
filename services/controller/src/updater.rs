//! Applies one job's desired topology to the batch layer and records its
//! lifecycle state.

use std::sync::Arc;

use stride_api::{
    Allocation, BatchJob, BatchPhase, JobRecord, JobState, JobStore, StoreError, JOB_KIND,
};
use stride_id::JobKey;
use stride_reconcile::ReconcileError;
use tracing::{debug, info};

use crate::cache::{ControllerCache, JobEntry};
use crate::client::BatchJobClient;
use crate::topology::{build_batch_job, reconcile_batch_job};

/// Collaborators shared by every reconciliation.
pub struct Context {
    pub cache: Arc<ControllerCache>,
    pub client: Arc<dyn BatchJobClient>,
    pub store: Arc<dyn JobStore>,
    pub scheduler_name: String,
}

pub(crate) fn store_error(e: StoreError) -> ReconcileError {
    match e {
        StoreError::NotFound(msg) => ReconcileError::NotFound(msg),
        StoreError::Conflict(msg) => ReconcileError::Conflict(msg),
        StoreError::Unavailable(msg) => ReconcileError::External(msg),
    }
}

/// Per-reconciliation view of one job.
pub struct Updater<'a> {
    ctx: &'a Context,
    key: JobKey,
    record: JobRecord,
    batch_job: Option<BatchJob>,
}

impl<'a> Updater<'a> {
    pub fn new(ctx: &'a Context, key: JobKey, entry: JobEntry) -> Result<Self, ReconcileError> {
        let record = entry
            .record
            .ok_or_else(|| ReconcileError::NotFound(format!("job {key}")))?;
        Ok(Self {
            ctx,
            key,
            record,
            batch_job: entry.batch_job,
        })
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn state(&self) -> Option<JobState> {
        self.record.state()
    }

    pub fn scheduled(&self) -> Allocation {
        self.record.scheduled()
    }

    /// Phase of the batch job, if one exists.
    pub fn batch_phase(&self) -> Option<BatchPhase> {
        self.batch_job.as_ref().map(BatchJob::phase)
    }

    /// Writes a new lifecycle state, keeping the scheduled counts.
    pub async fn update_state(&mut self, state: JobState) -> Result<(), ReconcileError> {
        let from = self.record.state();
        let updated = self
            .ctx
            .store
            .update_state(&self.key, state)
            .await
            .map_err(store_error)?;

        info!(
            job = %self.key,
            from = from.map_or("none", |s| s.as_str()),
            to = %state,
            "job state changed"
        );
        self.ctx
            .cache
            .upsert_job(self.key.clone(), updated.clone())
            .await;
        self.record = updated;
        Ok(())
    }

    /// Creates or patches the batch job to match the scheduled allocation.
    ///
    /// Returns whether a write was issued.
    pub async fn reconcile(&mut self) -> Result<bool, ReconcileError> {
        if self.record.meta.is_terminating() {
            info!(job = %self.key, "job is terminating, skipping reconcile");
            return Ok(false);
        }

        let written = match &self.batch_job {
            None => {
                let node_types = self.ctx.cache.node_types().await;
                let batch = build_batch_job(&self.record, &node_types, &self.ctx.scheduler_name)?;
                let created = self.ctx.client.create(batch).await?;
                debug!(job = %self.key, allocation = %self.record.scheduled(), "created batch job");
                created
            }
            Some(existing) => {
                let owner = existing.meta.controller_of_kind(JOB_KIND);
                if owner.map(|o| o.uid.as_str()) != Some(self.record.meta.uid.as_str()) {
                    return Err(ReconcileError::Ownership(format!(
                        "batch job {} is not controlled by job uid {}",
                        self.key, self.record.meta.uid
                    )));
                }

                let mut patched = existing.clone();
                if !reconcile_batch_job(&mut patched, &self.record)? {
                    return Ok(false);
                }
                let updated = self.ctx.client.update(patched).await?;
                debug!(job = %self.key, allocation = %self.record.scheduled(), "patched batch job");
                updated
            }
        };

        self.ctx
            .cache
            .upsert_batch_job(self.key.clone(), written.clone())
            .await;
        self.batch_job = Some(written);
        Ok(true)
    }
}
