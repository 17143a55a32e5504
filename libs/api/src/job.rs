//! Job records: the user-facing description of a training job and its status.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stride_id::{IdError, JobKey};

use crate::{ObjectMeta, OwnerReference, ResourceList, CUSTOM_FIELDS_ANNOTATION, JOB_KIND};

/// Number of status transitions retained on a record.
pub const STATUS_HISTORY_LIMIT: usize = 16;

/// Workload shape of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Identical replicas; any replica finishing ends the job.
    Symmetric,
    /// Parameter servers plus workers.
    PsWorker,
    /// A launcher plus replicas.
    Mpi,
    /// A single image build.
    ImageBuilder,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Symmetric => "symmetric",
            JobType::PsWorker => "ps-worker",
            JobType::Mpi => "mpi",
            JobType::ImageBuilder => "image-builder",
        }
    }

    /// True for types that run exactly one master alongside replicas.
    pub fn has_master(&self) -> bool {
        matches!(self, JobType::PsWorker | JobType::Mpi)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Scheduled,
    Running,
    Preempted,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "Idle",
            JobState::Scheduled => "Scheduled",
            JobState::Running => "Running",
            JobState::Preempted => "Preempted",
            JobState::Completed => "Completed",
            JobState::Failed => "Failed",
        }
    }

    /// Completed and Failed jobs are never reconciled again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Idle" => Ok(JobState::Idle),
            "Scheduled" => Ok(JobState::Scheduled),
            "Running" => Ok(JobState::Running),
            "Preempted" => Ok(JobState::Preempted),
            "Completed" => Ok(JobState::Completed),
            "Failed" => Ok(JobState::Failed),
            _ => Err(format!("unknown job state: {s}")),
        }
    }
}

/// Master and replica counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Allocation {
    pub masters: u32,
    pub replicas: u32,
}

impl Allocation {
    pub const ZERO: Allocation = Allocation {
        masters: 0,
        replicas: 0,
    };

    pub const fn new(masters: u32, replicas: u32) -> Self {
        Self { masters, replicas }
    }

    pub fn is_zero(&self) -> bool {
        self.masters == 0 && self.replicas == 0
    }

    pub fn total(&self) -> u32 {
        self.masters.saturating_add(self.replicas)
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m/{}r", self.masters, self.replicas)
    }
}

/// Container resource requirements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: ResourceList,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

/// Pod template for one role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

/// A role (master or replica) of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    #[serde(default)]
    pub template: PodTemplate,
    /// Node-type affinity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    /// Requested resources; may use the symbolic one-node unit.
    #[serde(default)]
    pub resources: ResourceList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,
}

/// Desired shape of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_type: JobType,
    #[serde(default)]
    pub master: RoleSpec,
    #[serde(default)]
    pub replica: RoleSpec,
    /// Preset (user-requested) master count.
    #[serde(default)]
    pub num_masters: u32,
    /// Preset (user-requested) replica count.
    #[serde(default)]
    pub num_replicas: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// One recorded lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub state: JobState,
    pub at: DateTime<Utc>,
    pub allocation: Allocation,
}

/// Observed status of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// `None` until the controller first sees the job.
    #[serde(default)]
    pub state: Option<JobState>,
    /// Policy-decided allocation.
    #[serde(default)]
    pub scheduled: Allocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Newest first, bounded by [`STATUS_HISTORY_LIMIT`].
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub history: VecDeque<StatusTransition>,
}

impl JobStatus {
    /// Moves to `state`, recording the transition.
    pub fn transition(&mut self, state: JobState, at: DateTime<Utc>) {
        self.state = Some(state);
        self.last_transition_time = Some(at);
        self.history.push_front(StatusTransition {
            state,
            at,
            allocation: self.scheduled,
        });
        self.history.truncate(STATUS_HISTORY_LIMIT);
    }
}

/// A stored job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub meta: ObjectMeta,
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

impl JobRecord {
    pub fn new(namespace: &str, name: &str, spec: JobSpec) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec,
            status: JobStatus::default(),
        }
    }

    pub fn key(&self) -> Result<JobKey, IdError> {
        JobKey::from_parts(&self.meta.namespace, &self.meta.name)
    }

    pub fn state(&self) -> Option<JobState> {
        self.status.state
    }

    pub fn scheduled(&self) -> Allocation {
        self.status.scheduled
    }

    pub fn preset(&self) -> Allocation {
        Allocation::new(self.spec.num_masters, self.spec.num_replicas)
    }

    /// Raw custom-field document for the active policy.
    pub fn custom_fields(&self) -> Option<&str> {
        self.meta
            .annotations
            .get(CUSTOM_FIELDS_ANNOTATION)
            .map(String::as_str)
    }

    /// Controller reference pointing at this record.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: JOB_KIND.to_string(),
            name: self.meta.name.clone(),
            uid: self.meta.uid.clone(),
            controller: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(job_type: JobType) -> JobSpec {
        JobSpec {
            job_type,
            master: RoleSpec::default(),
            replica: RoleSpec::default(),
            num_masters: 0,
            num_replicas: 0,
            volumes: Vec::new(),
        }
    }

    #[test]
    fn test_job_type_serde() {
        let json = serde_json::to_string(&JobType::PsWorker).unwrap();
        assert_eq!(json, "\"ps-worker\"");
        let parsed: JobType = serde_json::from_str("\"image-builder\"").unwrap();
        assert_eq!(parsed, JobType::ImageBuilder);
    }

    #[test]
    fn test_job_state_roundtrip() {
        for state in [
            JobState::Idle,
            JobState::Scheduled,
            JobState::Running,
            JobState::Preempted,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("Pending".parse::<JobState>().is_err());
    }

    #[test]
    fn test_allocation_total_saturates() {
        assert_eq!(Allocation::new(1, 2).total(), 3);
        assert_eq!(Allocation::new(u32::MAX, 1).total(), u32::MAX);
    }

    #[test]
    fn test_transition_history_is_bounded() {
        let mut status = JobStatus::default();
        for _ in 0..STATUS_HISTORY_LIMIT + 5 {
            status.transition(JobState::Running, Utc::now());
        }
        status.scheduled = Allocation::new(1, 2);
        status.transition(JobState::Preempted, Utc::now());

        assert_eq!(status.history.len(), STATUS_HISTORY_LIMIT);
        assert_eq!(status.history[0].state, JobState::Preempted);
        assert_eq!(status.history[0].allocation, Allocation::new(1, 2));
        assert_eq!(status.state, Some(JobState::Preempted));
    }

    #[test]
    fn test_record_key_and_owner() {
        let record = JobRecord::new("team-a", "bert", spec(JobType::Mpi));
        assert_eq!(record.key().unwrap().to_string(), "team-a/bert");

        let owner = record.owner_reference();
        assert_eq!(owner.kind, JOB_KIND);
        assert_eq!(owner.uid, record.meta.uid);
        assert!(owner.controller);
    }

    #[test]
    fn test_custom_fields_annotation() {
        let mut record = JobRecord::new("default", "j", spec(JobType::Symmetric));
        assert!(record.custom_fields().is_none());
        record
            .meta
            .annotations
            .insert(CUSTOM_FIELDS_ANNOTATION.to_string(), "batchSize: 32".to_string());
        assert_eq!(record.custom_fields(), Some("batchSize: 32"));
    }
}
