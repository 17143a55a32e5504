//! Policy configuration document.
//!
//! ```yaml
//! policy: elastic
//! configuration:
//!   name: elastic
//!   arguments:
//!     key: value
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::policy::{PolicyArguments, PASS_THROUGH};

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed scheduler configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyConfiguration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: PolicyArguments,
}

/// Which policy to run and what to hand it on initialization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConf {
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default)]
    pub configuration: PolicyConfiguration,
}

fn default_policy() -> String {
    PASS_THROUGH.to_string()
}

impl Default for SchedulerConf {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            configuration: PolicyConfiguration::default(),
        }
    }
}

impl SchedulerConf {
    pub fn parse(document: &str) -> Result<Self, ConfError> {
        Ok(serde_yaml::from_str(document)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfError> {
        let document = std::fs::read_to_string(path).map_err(|source| ConfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&document)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_full_document() {
        let conf = SchedulerConf::parse(
            "policy: elastic\nconfiguration:\n  name: elastic\n  arguments:\n    probe: exec\n",
        )
        .unwrap();
        assert_eq!(conf.policy, "elastic");
        assert_eq!(conf.configuration.name, "elastic");
        assert_eq!(conf.configuration.arguments.get("probe").map(String::as_str), Some("exec"));
    }

    #[test]
    fn test_missing_policy_defaults_to_pass_through() {
        let conf = SchedulerConf::parse("configuration: {}\n").unwrap();
        assert_eq!(conf.policy, PASS_THROUGH);
        assert!(conf.configuration.arguments.is_empty());
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            SchedulerConf::parse("policy: [equi"),
            Err(ConfError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "policy: equi").unwrap();
        let conf = SchedulerConf::load(file.path()).unwrap();
        assert_eq!(conf.policy, "equi");

        let missing = file.path().with_extension("missing");
        assert!(matches!(SchedulerConf::load(&missing), Err(ConfError::Io { .. })));
    }
}
