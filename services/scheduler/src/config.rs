//! Configuration for the scheduler.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Time between scheduling cycles.
    pub schedule_period: Duration,

    /// Policy configuration document. Pass-through is used when unset.
    pub scheduler_conf: Option<PathBuf>,

    /// Upper bound on threads decoding jobs while a snapshot is built.
    pub snapshot_workers: usize,

    /// Upper bound on concurrent store writes during commit.
    pub commit_workers: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schedule_period: Duration::from_millis(1000),
            scheduler_conf: None,
            snapshot_workers: 16,
            commit_workers: 16,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let schedule_period = std::env::var("STRIDE_SCHEDULE_PERIOD_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.schedule_period);

        let scheduler_conf = std::env::var("STRIDE_SCHEDULER_CONF")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let snapshot_workers = std::env::var("STRIDE_SNAPSHOT_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.snapshot_workers);

        let commit_workers = std::env::var("STRIDE_COMMIT_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.commit_workers);

        let log_level = std::env::var("STRIDE_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            schedule_period,
            scheduler_conf,
            snapshot_workers,
            commit_workers,
            log_level,
        })
    }
}
