//! The underlying batch job driven by the controller.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ObjectMeta, PodTemplate, Volume};

/// Event that triggers a lifecycle action on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    TaskCompleted,
}

/// Action taken when a lifecycle event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleAction {
    CompleteJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub event: LifecycleEvent,
    pub action: LifecycleAction,
}

impl LifecyclePolicy {
    /// Task completion completes the whole job.
    pub const COMPLETE_ON_TASK_COMPLETED: LifecyclePolicy = LifecyclePolicy {
        event: LifecycleEvent::TaskCompleted,
        action: LifecycleAction::CompleteJob,
    };
}

/// One named task of a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub replicas: u32,
    pub template: PodTemplate,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<LifecyclePolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJobSpec {
    pub scheduler_name: String,
    pub min_available: u32,
    pub tasks: Vec<TaskSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, Vec<String>>,
}

impl BatchJobSpec {
    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Phase reported by the batch-execution layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl BatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchPhase::Pending => "Pending",
            BatchPhase::Running => "Running",
            BatchPhase::Completed => "Completed",
            BatchPhase::Failed => "Failed",
        }
    }
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchJobStatus {
    #[serde(default)]
    pub phase: BatchPhase,
    /// Current replica counts per task name.
    #[serde(default)]
    pub task_replicas: BTreeMap<String, u32>,
}

/// A concrete multi-task job in the batch-execution layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub meta: ObjectMeta,
    pub spec: BatchJobSpec,
    #[serde(default)]
    pub status: BatchJobStatus,
}

impl BatchJob {
    pub fn phase(&self) -> BatchPhase {
        self.status.phase
    }
}
