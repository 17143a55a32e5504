//! First-come-first-served. Currently leaves every allocation as it is.

use super::Policy;
use crate::snapshot::ClusterSnapshot;

/// Reserved for creation-ordered admission. `execute` makes no changes, so
/// every job keeps the allocation it already has.
pub struct FcfsPolicy;

impl Policy for FcfsPolicy {
    fn name(&self) -> &'static str {
        "fcfs"
    }

    fn execute(&self, _snapshot: &mut ClusterSnapshot) {}
}
