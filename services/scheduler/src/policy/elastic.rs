//! Efficiency-aware elastic allocator.
//!
//! Each job publishes a throughput curve indexed by replica count
//! (`throughput[0]` is the single-replica baseline). For `n = i + 1` replicas:
//!
//! - `speedup = throughput[i] / throughput[0]`
//! - `efficiency = speedup / n`
//! - `remaining_time[i] = remaining_examples / throughput[i]`
//! - `ratio[i] = remaining_time[i] / efficiency`
//!
//! Allocation runs in two phases over a budget of one node per instance:
//!
//! 1. **Schedule**: repeatedly pick the (job, replica count) pair with the
//!    globally smallest ratio among jobs not yet scheduled, give it that many
//!    replicas (plus one master for ps-worker and mpi), and take it out of
//!    consideration.
//! 2. **Fill**: repeatedly pick, among scheduled jobs, the one needing the
//!    fewest extra replicas to reach its smallest remaining time within the
//!    leftover budget, and give it those replicas.
//!
//! Ties go to the earlier creation timestamp, then the smaller job key.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use stride_api::{Allocation, JobType};
use stride_id::JobKey;
use tracing::{debug, warn};

use super::{IterationProbe, Policy, PolicyError};
use crate::snapshot::{ClusterSnapshot, CustomFields, JobInfo};

/// Custom fields the elastic allocator reads from a job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticFields {
    /// Examples per iteration.
    pub batch_size: u64,
    /// Total iterations the job runs.
    pub iterations: u64,
    /// Measured examples/second, indexed by replica count minus one.
    #[serde(default)]
    pub throughput: Vec<f64>,
}

/// Per-replica-count curves for one job.
struct Curves {
    ratios: Vec<f64>,
    remaining_time: Vec<f64>,
}

impl Curves {
    /// Returns `None` for curves that cannot be evaluated.
    fn compute(fields: &ElasticFields, completed: u64) -> Option<Self> {
        let throughput = &fields.throughput;
        let baseline = *throughput.first()?;
        if baseline <= 0.0 || throughput.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return None;
        }

        let remaining_examples =
            fields.iterations.saturating_sub(completed) as f64 * fields.batch_size as f64;

        let mut ratios = Vec::with_capacity(throughput.len());
        let mut remaining_time = Vec::with_capacity(throughput.len());
        for (i, t) in throughput.iter().enumerate() {
            let speedup = t / baseline;
            let efficiency = speedup / (i + 1) as f64;
            let time = remaining_examples / t;
            remaining_time.push(time);
            ratios.push(time / efficiency);
        }

        Some(Self {
            ratios,
            remaining_time,
        })
    }
}

struct Candidate<'a> {
    job: &'a JobInfo,
    masters: u32,
    curves: Curves,
}

/// Pod whose iteration counter represents the job's progress.
pub(crate) fn lead_pod(job: &JobInfo) -> Option<String> {
    let name = job.key.name();
    match job.job_type {
        JobType::Symmetric | JobType::Mpi => Some(format!("{name}-replica-0")),
        JobType::PsWorker => Some(format!("{name}-worker-0")),
        JobType::ImageBuilder => None,
    }
}

pub struct ElasticPolicy {
    probe: Arc<dyn IterationProbe>,
    /// Last known completed iterations per job; survives probe failures.
    completed: Mutex<HashMap<JobKey, u64>>,
}

impl ElasticPolicy {
    pub fn new(probe: Arc<dyn IterationProbe>) -> Self {
        Self {
            probe,
            completed: Mutex::new(HashMap::new()),
        }
    }

    /// Last known completed iterations for a job.
    pub fn completed_iterations(&self, key: &JobKey) -> u64 {
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn allocate(&self, snapshot: &ClusterSnapshot) -> BTreeMap<JobKey, Allocation> {
        let completed = self
            .completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut candidates: Vec<Candidate<'_>> = Vec::new();
        for job in snapshot.jobs.values() {
            let Some(fields) = job.custom_fields::<ElasticFields>() else {
                debug!(job = %job.key, "no elastic fields, not scheduling");
                continue;
            };
            let done = completed.get(&job.key).copied().unwrap_or(0);
            let Some(curves) = Curves::compute(fields, done) else {
                warn!(job = %job.key, "invalid throughput curve, not scheduling");
                continue;
            };
            candidates.push(Candidate {
                job,
                masters: u32::from(job.job_type.has_master()),
                curves,
            });
        }

        let mut allocations: BTreeMap<JobKey, Allocation> = BTreeMap::new();
        let mut budget = snapshot.node_count();

        // Phase 1: schedule by minimum ratio.
        let mut pending: Vec<&Candidate<'_>> = candidates.iter().collect();
        let mut scheduled: Vec<&Candidate<'_>> = Vec::new();
        while budget > 0 && !pending.is_empty() {
            let mut best: Option<(usize, u32, f64)> = None;
            for (idx, c) in pending.iter().enumerate() {
                if budget <= c.masters {
                    continue;
                }
                let limit = ((budget - c.masters) as usize).min(c.curves.ratios.len());
                for (i, ratio) in c.curves.ratios[..limit].iter().enumerate() {
                    let better = match best {
                        None => true,
                        Some((best_idx, _, best_ratio)) => {
                            *ratio < best_ratio
                                || (*ratio == best_ratio && c.job.precedes(pending[best_idx].job))
                        }
                    };
                    if better {
                        best = Some((idx, i as u32 + 1, *ratio));
                    }
                }
            }

            let Some((idx, replicas, _)) = best else {
                debug!(budget, "no job fits the remaining budget");
                break;
            };
            let c = pending.remove(idx);
            allocations.insert(c.job.key.clone(), Allocation::new(c.masters, replicas));
            budget -= c.masters + replicas;
            scheduled.push(c);
        }

        // Phase 2: fill towards minimum remaining time.
        scheduled.sort_by(|a, b| a.job.key.cmp(&b.job.key));
        while budget > 0 && !scheduled.is_empty() {
            let mut best: Option<(usize, u32)> = None;
            for (idx, c) in scheduled.iter().enumerate() {
                let current = allocations
                    .get(&c.job.key)
                    .map_or(0, |a| a.replicas);
                let additional =
                    fewest_additional_for_min_time(&c.curves.remaining_time, current, budget);

                let better = match best {
                    None => true,
                    Some((best_idx, best_add)) => {
                        additional < best_add
                            || (additional == best_add && c.job.precedes(scheduled[best_idx].job))
                    }
                };
                if better {
                    best = Some((idx, additional));
                }
            }

            let Some((idx, additional)) = best else {
                break;
            };
            let c = scheduled.remove(idx);
            if let Some(a) = allocations.get_mut(&c.job.key) {
                a.replicas += additional;
            }
            budget -= additional;
        }

        allocations
    }
}

/// Smallest number of extra replicas (up to `budget`) reaching the minimum
/// remaining time reachable from `current` replicas.
fn fewest_additional_for_min_time(remaining_time: &[f64], current: u32, budget: u32) -> u32 {
    let mut best_time = f64::INFINITY;
    let mut best_additional = 0;
    for additional in 0..=budget {
        let n = (current + additional) as usize;
        if n == 0 {
            continue;
        }
        let Some(time) = remaining_time.get(n - 1) else {
            break;
        };
        if *time < best_time {
            best_time = *time;
            best_additional = additional;
        }
    }
    best_additional
}

#[async_trait]
impl Policy for ElasticPolicy {
    fn name(&self) -> &'static str {
        "elastic"
    }

    fn decode_custom_fields(
        &self,
        blob: Option<&str>,
    ) -> Result<Option<CustomFields>, PolicyError> {
        let Some(blob) = blob else {
            return Ok(None);
        };
        let fields: ElasticFields =
            serde_yaml::from_str(blob).map_err(|e| PolicyError::CustomFields(e.to_string()))?;
        Ok(Some(Arc::new(fields)))
    }

    async fn refresh(&self, snapshot: &ClusterSnapshot) {
        let mut observed = Vec::new();
        for job in snapshot.jobs.values() {
            let Some(pod) = lead_pod(job) else {
                continue;
            };
            match self
                .probe
                .completed_iterations(job.key.namespace().as_str(), &pod)
                .await
            {
                Ok(n) => observed.push((job.key.clone(), n)),
                Err(e) => debug!(
                    job = %job.key,
                    error = %e,
                    "iteration probe failed, keeping last value"
                ),
            }
        }

        let mut completed = self.completed.lock().unwrap_or_else(|e| e.into_inner());
        completed.retain(|key, _| snapshot.jobs.contains_key(key));
        completed.extend(observed);
    }

    fn execute(&self, snapshot: &mut ClusterSnapshot) {
        let allocations = self.allocate(snapshot);

        let keys: Vec<JobKey> = snapshot.jobs.keys().cloned().collect();
        for key in keys {
            let allocation = allocations.get(&key).copied().unwrap_or(Allocation::ZERO);
            snapshot.set_allocation(&key, allocation);
        }

        debug!(
            snapshot = %snapshot.id,
            nodes = snapshot.node_count(),
            allocated = snapshot.total_allocated(),
            "elastic allocation complete"
        );
    }

    fn uninitialize(&self) {
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
