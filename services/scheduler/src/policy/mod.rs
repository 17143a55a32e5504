//! Allocation policies.
//!
//! A policy decides each job's master/replica counts inside a
//! [`ClusterSnapshot`]. Policies are looked up by name in a
//! [`PolicyRegistry`] built at startup; there is no process-wide registry.

mod elastic;
mod equi;
mod fcfs;
mod pass_through;
mod probe;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::snapshot::{ClusterSnapshot, CustomFields};

pub use elastic::{ElasticFields, ElasticPolicy};
pub use equi::EquiPolicy;
pub use fcfs::FcfsPolicy;
pub use pass_through::PassThroughPolicy;
pub use probe::{parse_iteration_output, IterationProbe, NoopProbe, ProbeError, StaticProbe};

/// Free-form arguments from the policy configuration document.
pub type PolicyArguments = BTreeMap<String, String>;

/// Policy errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),

    #[error("invalid argument {name}={value}: {reason}")]
    InvalidArgument {
        name: String,
        value: String,
        reason: String,
    },

    #[error("malformed custom fields: {0}")]
    CustomFields(String),
}

/// An allocation algorithm.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Called when the policy becomes active.
    fn initialize(&self, _arguments: &PolicyArguments) -> Result<(), PolicyError> {
        Ok(())
    }

    /// Decodes a job's custom-field document into this policy's schema.
    ///
    /// Runs once per job while the snapshot is built.
    fn decode_custom_fields(
        &self,
        _blob: Option<&str>,
    ) -> Result<Option<CustomFields>, PolicyError> {
        Ok(None)
    }

    /// Refreshes external inputs before [`Policy::execute`]. Best effort.
    async fn refresh(&self, _snapshot: &ClusterSnapshot) {}

    /// Decides allocations in place. Must not touch anything outside the
    /// snapshot's allocation fields and must be deterministic for a given
    /// snapshot.
    fn execute(&self, snapshot: &mut ClusterSnapshot);

    /// Called when the policy stops being active.
    fn uninitialize(&self) {}
}

/// Name of the policy used when configuration cannot be honoured.
pub const PASS_THROUGH: &str = "pass-through";

/// Named policies available to the scheduler.
pub struct PolicyRegistry {
    policies: BTreeMap<&'static str, Arc<dyn Policy>>,
    fallback: Arc<dyn Policy>,
}

impl PolicyRegistry {
    /// Registry holding only the pass-through policy.
    pub fn new() -> Self {
        let fallback: Arc<dyn Policy> = Arc::new(PassThroughPolicy);
        let mut policies = BTreeMap::new();
        policies.insert(fallback.name(), Arc::clone(&fallback));
        Self { policies, fallback }
    }

    /// Registry with every built-in policy.
    pub fn with_defaults(probe: Arc<dyn IterationProbe>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FcfsPolicy));
        registry.register(Arc::new(EquiPolicy));
        registry.register(Arc::new(ElasticPolicy::new(probe)));
        registry
    }

    /// Adds a policy, replacing any policy with the same name.
    pub fn register(&mut self, policy: Arc<dyn Policy>) {
        self.policies.insert(policy.name(), policy);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Policy>, PolicyError> {
        self.policies
            .get(name.trim())
            .cloned()
            .ok_or_else(|| PolicyError::UnknownPolicy(name.to_string()))
    }

    /// The pass-through policy.
    pub fn fallback(&self) -> Arc<dyn Policy> {
        Arc::clone(&self.fallback)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.policies.keys().copied()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake;

    impl Policy for Fake {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn execute(&self, _snapshot: &mut ClusterSnapshot) {}
    }

    #[test]
    fn test_defaults_registered() {
        let registry = PolicyRegistry::with_defaults(Arc::new(NoopProbe));
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["elastic", "equi", "fcfs", "pass-through"]);
    }

    #[test]
    fn test_get_trims_name() {
        let registry = PolicyRegistry::new();
        assert_eq!(registry.get(" pass-through\n").unwrap().name(), PASS_THROUGH);
    }

    #[test]
    fn test_unknown_policy() {
        let registry = PolicyRegistry::new();
        assert!(matches!(
            registry.get("drf"),
            Err(PolicyError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn test_register_fake() {
        let mut registry = PolicyRegistry::new();
        registry.register(Arc::new(Fake));
        assert_eq!(registry.get("fake").unwrap().name(), "fake");
        assert_eq!(registry.fallback().name(), PASS_THROUGH);
    }
}
