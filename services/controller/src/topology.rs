//! Batch-job task layout per job type.
//!
//! | type          | tasks                  | task that completes the job |
//! |---------------|------------------------|-----------------------------|
//! | symmetric     | `replica`              | `replica`                   |
//! | ps-worker     | `ps`, `worker`         | `worker`                    |
//! | mpi           | `master`, `replica`    | `master`                    |
//! | image-builder | `image-builder` (x1)   | none                        |

use std::collections::BTreeMap;

use stride_api::{
    Allocation, BatchJob, BatchJobSpec, BatchJobStatus, JobRecord, JobType, LifecyclePolicy,
    NodeTypes, ObjectMeta, PodTemplate, RoleSpec, TaskSpec, NODE_TYPE_LABEL,
};
use stride_reconcile::ReconcileError;

pub const REPLICA_TASK: &str = "replica";
pub const PS_TASK: &str = "ps";
pub const WORKER_TASK: &str = "worker";
pub const MASTER_TASK: &str = "master";
pub const IMAGE_BUILDER_TASK: &str = "image-builder";

#[derive(Debug, Clone, Copy)]
enum Role {
    Master,
    Replica,
}

#[derive(Debug, Clone, Copy)]
enum Count {
    Masters,
    Replicas,
    One,
}

impl Count {
    fn resolve(self, allocation: Allocation) -> u32 {
        match self {
            Count::Masters => allocation.masters,
            Count::Replicas => allocation.replicas,
            Count::One => 1,
        }
    }
}

#[derive(Debug)]
struct TaskLayout {
    name: &'static str,
    role: Role,
    count: Count,
    completes_job: bool,
}

#[derive(Debug)]
struct Layout {
    tasks: &'static [TaskLayout],
    /// Whether role templates get node-type affinity and translated resources.
    patch_templates: bool,
    plugins: bool,
}

fn layout(job_type: JobType) -> Layout {
    match job_type {
        JobType::Symmetric => Layout {
            tasks: &[TaskLayout {
                name: REPLICA_TASK,
                role: Role::Replica,
                count: Count::Replicas,
                completes_job: true,
            }],
            patch_templates: true,
            plugins: true,
        },
        JobType::PsWorker => Layout {
            tasks: &[
                TaskLayout {
                    name: PS_TASK,
                    role: Role::Master,
                    count: Count::Masters,
                    completes_job: false,
                },
                TaskLayout {
                    name: WORKER_TASK,
                    role: Role::Replica,
                    count: Count::Replicas,
                    completes_job: true,
                },
            ],
            patch_templates: true,
            plugins: true,
        },
        JobType::Mpi => Layout {
            tasks: &[
                TaskLayout {
                    name: MASTER_TASK,
                    role: Role::Master,
                    count: Count::Masters,
                    completes_job: true,
                },
                TaskLayout {
                    name: REPLICA_TASK,
                    role: Role::Replica,
                    count: Count::Replicas,
                    completes_job: false,
                },
            ],
            patch_templates: true,
            plugins: true,
        },
        JobType::ImageBuilder => Layout {
            tasks: &[TaskLayout {
                name: IMAGE_BUILDER_TASK,
                role: Role::Replica,
                count: Count::One,
                completes_job: false,
            }],
            patch_templates: false,
            plugins: false,
        },
    }
}

/// Applies a role's node-type affinity and translated resource request to
/// its pod template.
fn patch_template(role: &RoleSpec, node_types: &NodeTypes) -> Result<PodTemplate, ReconcileError> {
    let mut template = role.template.clone();
    if template.containers.is_empty() {
        return Err(ReconcileError::InvalidState(
            "role template has no containers".to_string(),
        ));
    }

    let node_type = role.node_type.as_deref().filter(|t| !t.is_empty());
    if let Some(node_type) = node_type {
        template
            .node_selector
            .insert(NODE_TYPE_LABEL.to_string(), node_type.to_string());
    }

    let limits = node_types
        .translate_resources(&role.resources, node_type)
        .map_err(|e| ReconcileError::Internal(e.to_string()))?;
    if !limits.is_empty() {
        template.containers[0].resources.limits = limits;
    }
    Ok(template)
}

/// Builds the batch job for a job record's current allocation.
pub fn build_batch_job(
    record: &JobRecord,
    node_types: &NodeTypes,
    scheduler_name: &str,
) -> Result<BatchJob, ReconcileError> {
    let layout = layout(record.spec.job_type);
    let allocation = record.scheduled();

    let mut tasks = Vec::with_capacity(layout.tasks.len());
    for task in layout.tasks {
        let role = match task.role {
            Role::Master => &record.spec.master,
            Role::Replica => &record.spec.replica,
        };
        let template = if layout.patch_templates {
            patch_template(role, node_types)?
        } else {
            role.template.clone()
        };

        tasks.push(TaskSpec {
            name: task.name.to_string(),
            replicas: task.count.resolve(allocation),
            template,
            policies: if task.completes_job {
                vec![LifecyclePolicy::COMPLETE_ON_TASK_COMPLETED]
            } else {
                Vec::new()
            },
        });
    }

    let plugins = if layout.plugins {
        BTreeMap::from([
            ("env".to_string(), Vec::new()),
            ("svc".to_string(), Vec::new()),
        ])
    } else {
        BTreeMap::new()
    };

    let mut meta = ObjectMeta::new(&record.meta.namespace, &record.meta.name);
    meta.owner_references.push(record.owner_reference());

    Ok(BatchJob {
        meta,
        spec: BatchJobSpec {
            scheduler_name: scheduler_name.to_string(),
            min_available: min_available(&tasks),
            tasks,
            volumes: record.spec.volumes.clone(),
            plugins,
        },
        status: BatchJobStatus::default(),
    })
}

fn min_available(tasks: &[TaskSpec]) -> u32 {
    tasks.iter().fold(0, |total, t| total.saturating_add(t.replicas))
}

/// Patches an existing batch job's replica counts and minimum-available total.
///
/// Returns whether anything changed. Fails if the batch job's tasks do not
/// match the layout of the record's job type.
pub fn reconcile_batch_job(
    batch: &mut BatchJob,
    record: &JobRecord,
) -> Result<bool, ReconcileError> {
    let job_type = record.spec.job_type;
    let layout = layout(job_type);

    let found: Vec<&str> = batch.spec.tasks.iter().map(|t| t.name.as_str()).collect();
    let expected: Vec<&str> = layout.tasks.iter().map(|t| t.name).collect();
    if found != expected {
        return Err(ReconcileError::InvalidState(format!(
            "unexpected tasks {found:?} for {} job, expected {expected:?}",
            job_type.as_str()
        )));
    }

    let allocation = record.scheduled();
    let mut changed = false;
    for (task, shape) in batch.spec.tasks.iter_mut().zip(layout.tasks) {
        let replicas = shape.count.resolve(allocation);
        if task.replicas != replicas {
            task.replicas = replicas;
            changed = true;
        }
    }

    let min_available = min_available(&batch.spec.tasks);
    if batch.spec.min_available != min_available {
        batch.spec.min_available = min_available;
        changed = true;
    }
    Ok(changed)
}
