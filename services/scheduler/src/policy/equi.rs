//! Fair share: one replica at a time, round robin, until nodes run out.
//!
//! If the current replica counts already use every node and differ by at
//! most one, the allocation is left alone so jobs do not oscillate between
//! equally fair splits. Masters are not touched.

use std::collections::BTreeSet;

use stride_api::Allocation;
use tracing::debug;

use super::Policy;
use crate::snapshot::ClusterSnapshot;

pub struct EquiPolicy;

impl EquiPolicy {
    fn is_balanced(snapshot: &ClusterSnapshot, nodes: u32) -> bool {
        let counts: BTreeSet<u32> = snapshot.jobs.values().map(|j| j.scheduled.replicas).collect();
        let total: u32 = snapshot.jobs.values().map(|j| j.scheduled.replicas).sum();

        if total != nodes {
            return false;
        }
        match (counts.first(), counts.last()) {
            (Some(lo), Some(hi)) => counts.len() <= 2 && hi - lo <= 1,
            _ => false,
        }
    }
}

impl Policy for EquiPolicy {
    fn name(&self) -> &'static str {
        "equi"
    }

    fn execute(&self, snapshot: &mut ClusterSnapshot) {
        if snapshot.jobs.is_empty() {
            return;
        }

        let nodes = snapshot.node_count();
        if Self::is_balanced(snapshot, nodes) {
            debug!(snapshot = %snapshot.id, "equi allocation already balanced");
            return;
        }

        let jobs: Vec<_> = snapshot
            .jobs
            .values()
            .map(|j| (j.key.clone(), j.scheduled.masters))
            .collect();
        let mut replicas = vec![0u32; jobs.len()];

        let mut remaining = nodes;
        'outer: while remaining > 0 {
            for count in replicas.iter_mut() {
                *count += 1;
                remaining -= 1;
                if remaining == 0 {
                    break 'outer;
                }
            }
        }

        for ((key, masters), replicas) in jobs.into_iter().zip(replicas) {
            snapshot.set_allocation(&key, Allocation::new(masters, replicas));
        }
    }
}
