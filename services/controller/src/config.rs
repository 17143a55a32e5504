//! Configuration for the controller.

use std::time::Duration;

use anyhow::Result;
use stride_reconcile::{DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES, GC_BACKOFF_MAX};

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of worker partitions.
    pub workers: usize,

    /// Failed reconciliations of a job before it is dropped from its queue.
    pub max_retries: u32,

    /// First retry delay.
    pub backoff_base: Duration,

    /// Retry delay cap.
    pub backoff_max: Duration,

    /// Scheduler name stamped on created batch jobs.
    pub scheduler_name: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: GC_BACKOFF_MAX,
            scheduler_name: "volcano".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let workers = std::env::var("STRIDE_CONTROLLER_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.workers);

        let max_retries = std::env::var("STRIDE_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        let backoff_base = std::env::var("STRIDE_BACKOFF_BASE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_base);

        let backoff_max = std::env::var("STRIDE_BACKOFF_MAX_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_max);

        let scheduler_name =
            std::env::var("STRIDE_SCHEDULER_NAME").unwrap_or(defaults.scheduler_name);

        let log_level = std::env::var("STRIDE_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            workers,
            max_retries,
            backoff_base,
            backoff_max,
            scheduler_name,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        std::env::set_var("STRIDE_LOG_LEVEL", "warn");
        std::env::set_var("STRIDE_CONTROLLER_WORKERS", "8");
        std::env::set_var("STRIDE_BACKOFF_MAX_MS", "2000");

        let config = Config::from_env().unwrap();
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.workers, 8);
        assert_eq!(config.backoff_max, Duration::from_secs(2));

        std::env::remove_var("STRIDE_LOG_LEVEL");
        std::env::remove_var("STRIDE_CONTROLLER_WORKERS");
        std::env::remove_var("STRIDE_BACKOFF_MAX_MS");
        let config = Config::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.workers, 4);
    }
}
