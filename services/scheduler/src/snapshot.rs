//! Point-in-time cluster snapshots handed to policies.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use stride_api::{Allocation, JobRecord, JobState, JobType, NodeInfo, NodeTypes};
use stride_id::{IdError, JobKey};
use uuid::Uuid;

/// Policy-specific fields decoded from a job's custom-field annotation.
pub type CustomFields = Arc<dyn Any + Send + Sync>;

/// A job as seen by a policy.
#[derive(Clone)]
pub struct JobInfo {
    pub key: JobKey,
    pub uid: String,
    pub job_type: JobType,
    /// User-requested counts.
    pub preset: Allocation,
    /// Policy-decided counts; the only field policies change.
    pub scheduled: Allocation,
    pub state: Option<JobState>,
    pub creation_timestamp: DateTime<Utc>,
    pub custom_fields: Option<CustomFields>,
    /// The record this job was built from.
    pub record: JobRecord,
}

impl JobInfo {
    pub fn from_record(record: JobRecord) -> Result<Self, IdError> {
        Ok(Self {
            key: record.key()?,
            uid: record.meta.uid.clone(),
            job_type: record.spec.job_type,
            preset: record.preset(),
            scheduled: record.scheduled(),
            state: record.state(),
            creation_timestamp: record.meta.creation_timestamp,
            custom_fields: None,
            record,
        })
    }

    #[must_use]
    pub fn with_custom_fields(mut self, fields: Option<CustomFields>) -> Self {
        self.custom_fields = fields;
        self
    }

    /// Typed view of the decoded custom fields.
    pub fn custom_fields<T: 'static>(&self) -> Option<&T> {
        self.custom_fields.as_ref()?.downcast_ref::<T>()
    }

    /// Orders by creation time, then key. Used to break ties.
    pub fn precedes(&self, other: &JobInfo) -> bool {
        (self.creation_timestamp, &self.key) < (other.creation_timestamp, &other.key)
    }
}

impl fmt::Debug for JobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobInfo")
            .field("key", &self.key)
            .field("job_type", &self.job_type)
            .field("preset", &self.preset)
            .field("scheduled", &self.scheduled)
            .field("state", &self.state)
            .field("creation_timestamp", &self.creation_timestamp)
            .field("has_custom_fields", &self.custom_fields.is_some())
            .finish()
    }
}

/// An isolated copy of cluster state for one scheduling cycle.
#[derive(Debug)]
pub struct ClusterSnapshot {
    pub id: Uuid,
    pub jobs: BTreeMap<JobKey, JobInfo>,
    pub nodes: BTreeMap<String, NodeInfo>,
    pub node_types: NodeTypes,
    changes: BTreeSet<JobKey>,
}

impl ClusterSnapshot {
    pub fn new(
        jobs: impl IntoIterator<Item = JobInfo>,
        nodes: impl IntoIterator<Item = NodeInfo>,
    ) -> Self {
        let nodes: BTreeMap<String, NodeInfo> =
            nodes.into_iter().map(|n| (n.name.clone(), n)).collect();
        let node_types = NodeTypes::build(nodes.values());

        Self {
            id: Uuid::new_v4(),
            jobs: jobs.into_iter().map(|j| (j.key.clone(), j)).collect(),
            nodes,
            node_types,
            changes: BTreeSet::new(),
        }
    }

    /// Number of schedulable nodes; the budget policies allocate from.
    pub fn node_count(&self) -> u32 {
        u32::try_from(self.nodes.len()).unwrap_or(u32::MAX)
    }

    /// Sets a job's scheduled counts and marks it for commit.
    ///
    /// Returns false if the job is not in the snapshot.
    pub fn set_allocation(&mut self, key: &JobKey, allocation: Allocation) -> bool {
        let Some(job) = self.jobs.get_mut(key) else {
            return false;
        };
        job.scheduled = allocation;
        self.changes.insert(key.clone());
        true
    }

    pub fn allocation(&self, key: &JobKey) -> Option<Allocation> {
        self.jobs.get(key).map(|j| j.scheduled)
    }

    /// Jobs touched by the policy, in key order.
    pub fn changes(&self) -> impl Iterator<Item = &JobKey> {
        self.changes.iter()
    }

    pub fn is_changed(&self, key: &JobKey) -> bool {
        self.changes.contains(key)
    }

    /// Sum of scheduled masters and replicas across all jobs.
    pub fn total_allocated(&self) -> u32 {
        self.jobs.values().map(|j| j.scheduled.total()).sum()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::TimeZone;
    use stride_api::{JobSpec, Quantity, RoleSpec};

    use super::*;

    pub fn record(name: &str, job_type: JobType, preset: Allocation) -> JobRecord {
        let mut record = JobRecord::new(
            "default",
            name,
            JobSpec {
                job_type,
                master: RoleSpec::default(),
                replica: RoleSpec::default(),
                num_masters: preset.masters,
                num_replicas: preset.replicas,
                volumes: Vec::new(),
            },
        );
        record.meta.creation_timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        record
    }

    pub fn job(name: &str, job_type: JobType, preset: Allocation) -> JobInfo {
        JobInfo::from_record(record(name, job_type, preset)).unwrap()
    }

    pub fn node(name: &str) -> NodeInfo {
        NodeInfo::new(stride_api::NodeObject {
            name: name.to_string(),
            allocatable: [("cpu".to_string(), Quantity::from_value(8))].into(),
            ..Default::default()
        })
    }

    pub fn nodes(n: usize) -> Vec<NodeInfo> {
        (0..n).map(|i| node(&format!("node-{i}"))).collect()
    }
}
