//! Scheduled counts equal preset counts, unconditionally.

use tracing::debug;

use super::Policy;
use crate::snapshot::ClusterSnapshot;

pub struct PassThroughPolicy;

impl Policy for PassThroughPolicy {
    fn name(&self) -> &'static str {
        super::PASS_THROUGH
    }

    fn execute(&self, snapshot: &mut ClusterSnapshot) {
        let presets: Vec<_> = snapshot
            .jobs
            .values()
            .map(|job| (job.key.clone(), job.preset))
            .collect();

        for (key, preset) in presets {
            snapshot.set_allocation(&key, preset);
        }
        debug!(snapshot = %snapshot.id, jobs = snapshot.jobs.len(), "pass-through applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::testing::{job, nodes};
    use stride_api::{Allocation, JobType};

    #[test]
    fn test_preset_is_not_clamped() {
        let mut snapshot = ClusterSnapshot::new(
            vec![job("a", JobType::Symmetric, Allocation::new(0, 5))],
            nodes(3),
        );
        PassThroughPolicy.execute(&mut snapshot);

        let key = "default/a".parse().unwrap();
        assert_eq!(snapshot.allocation(&key), Some(Allocation::new(0, 5)));
        assert!(snapshot.is_changed(&key));
    }

    #[test]
    fn test_every_job_marked() {
        let mut snapshot = ClusterSnapshot::new(
            vec![
                job("a", JobType::PsWorker, Allocation::new(1, 2)),
                job("b", JobType::Mpi, Allocation::ZERO),
            ],
            nodes(1),
        );
        PassThroughPolicy.execute(&mut snapshot);
        assert_eq!(snapshot.changes().count(), 2);
    }
}
