//! Typed name definitions for scheduler objects.
//!
//! Namespaces follow DNS label rules; job and node names follow DNS subdomain
//! rules (dots allowed).

use crate::define_name;
use crate::IdError;

define_name!(Namespace, "namespace", 63, false);
define_name!(JobName, "job name", 253, true);
define_name!(NodeName, "node name", 253, true);

// =============================================================================
// Job Key
// =============================================================================

/// Stable identity of a job record: `{namespace}/{name}`.
///
/// Ordering is by namespace, then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobKey {
    namespace: Namespace,
    name: JobName,
}

impl JobKey {
    /// Creates a key from already-validated parts.
    #[must_use]
    pub fn new(namespace: Namespace, name: JobName) -> Self {
        Self { namespace, name }
    }

    /// Parses a key from `{namespace}/{name}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty { kind: "job key" });
        }

        let Some((ns, name)) = s.split_once('/') else {
            return Err(IdError::MissingSeparator(s.to_string()));
        };

        Ok(Self {
            namespace: Namespace::parse(ns)?,
            name: JobName::parse(name)?,
        })
    }

    /// Builds a key from raw parts, validating both.
    pub fn from_parts(namespace: &str, name: &str) -> Result<Self, IdError> {
        Ok(Self {
            namespace: Namespace::parse(namespace)?,
            name: JobName::parse(name)?,
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[must_use]
    pub fn name(&self) -> &JobName {
        &self.name
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for JobKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for JobKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for JobKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_job_key_roundtrip() {
        let key = JobKey::parse("team-a/resnet.50").unwrap();
        assert_eq!(key.namespace().as_str(), "team-a");
        assert_eq!(key.name().as_str(), "resnet.50");
        assert_eq!(key.to_string(), "team-a/resnet.50");
    }

    #[test]
    fn test_job_key_missing_separator() {
        let result = JobKey::parse("default");
        assert!(matches!(result, Err(IdError::MissingSeparator(_))));
    }

    #[test]
    fn test_job_key_empty() {
        let err = JobKey::parse("").unwrap_err();
        assert!(err.is_empty());
    }

    #[test]
    fn test_namespace_rejects_dots() {
        let result = Namespace::parse("team.a");
        assert!(matches!(
            result,
            Err(IdError::InvalidCharacter { ch: '.', .. })
        ));
    }

    #[test]
    fn test_name_rejects_uppercase() {
        assert!(JobName::parse("ResNet").is_err());
    }

    #[test]
    fn test_name_boundaries() {
        assert!(matches!(
            NodeName::parse("-node"),
            Err(IdError::InvalidBoundary { .. })
        ));
        assert!(matches!(
            NodeName::parse("node."),
            Err(IdError::InvalidBoundary { .. })
        ));
        assert!(NodeName::parse("gpu-node-01.rack2").is_ok());
    }

    #[test]
    fn test_namespace_too_long() {
        let long = "a".repeat(64);
        assert!(matches!(
            Namespace::parse(&long),
            Err(IdError::TooLong { max: 63, .. })
        ));
    }

    #[test]
    fn test_job_key_json_roundtrip() {
        let key = JobKey::parse("default/bert").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"default/bert\"");
        let parsed: JobKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn test_job_key_json_rejects_invalid() {
        let result: Result<JobKey, _> = serde_json::from_str("\"Default/bert\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_job_key_ordering_is_fieldwise() {
        let a = JobKey::parse("a/z").unwrap();
        let b = JobKey::parse("a-b/a").unwrap();
        assert!(a < b);
    }

    proptest! {
        #[test]
        fn prop_valid_keys_roundtrip(
            ns in "[a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?",
            name in "[a-z0-9]([a-z0-9.-]{0,40}[a-z0-9])?",
        ) {
            let raw = format!("{ns}/{name}");
            let key = JobKey::parse(&raw).unwrap();
            prop_assert_eq!(key.to_string(), raw);
        }
    }
}
