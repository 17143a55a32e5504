//! Periodic scheduling loop.
//!
//! Every tick: load the policy configuration, snapshot the cache, run the
//! policy and commit its decisions. A tick never fails; configuration
//! problems fall back to pass-through and commit failures are per job.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{ClusterCache, CommitStats};
use crate::conf::SchedulerConf;
use crate::config::Config;
use crate::policy::{Policy, PolicyArguments, PolicyRegistry};

struct ActivePolicy {
    policy: Arc<dyn Policy>,
    arguments: PolicyArguments,
}

pub struct Scheduler {
    cache: Arc<ClusterCache>,
    registry: PolicyRegistry,
    conf_path: Option<PathBuf>,
    period: Duration,
    active: Mutex<ActivePolicy>,
}

impl Scheduler {
    pub fn new(config: &Config, cache: Arc<ClusterCache>, registry: PolicyRegistry) -> Self {
        let policy = registry.fallback();
        let arguments = PolicyArguments::new();
        if let Err(e) = policy.initialize(&arguments) {
            warn!(policy = policy.name(), error = %e, "failed to initialize fallback policy");
        }

        Self {
            cache,
            registry,
            conf_path: config.scheduler_conf.clone(),
            period: config.schedule_period,
            active: Mutex::new(ActivePolicy { policy, arguments }),
        }
    }

    /// Name of the policy used by the last cycle.
    pub fn active_policy(&self) -> &'static str {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .policy
            .name()
    }

    /// Run scheduling cycles until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(period_ms = self.period.as_millis() as u64, "Starting scheduler");

        let mut interval = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One scheduling cycle.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> CommitStats {
        let policy = self.load_policy();

        let mut snapshot = self.cache.snapshot(Arc::clone(&policy)).await;
        policy.refresh(&snapshot).await;
        policy.execute(&mut snapshot);

        let changed = snapshot.changes().count();
        let stats = self.cache.commit(&snapshot).await;

        if stats.written > 0 || stats.failed > 0 {
            info!(
                policy = policy.name(),
                snapshot = %snapshot.id,
                written = stats.written,
                failed = stats.failed,
                "scheduling cycle committed"
            );
        } else {
            debug!(
                policy = policy.name(),
                snapshot = %snapshot.id,
                jobs = snapshot.jobs.len(),
                nodes = snapshot.nodes.len(),
                changed,
                "scheduling cycle made no writes"
            );
        }
        stats
    }

    /// Resolves the configured policy, switching the active one if needed.
    fn load_policy(&self) -> Arc<dyn Policy> {
        let conf = match &self.conf_path {
            None => SchedulerConf::default(),
            Some(path) => SchedulerConf::load(path).unwrap_or_else(|e| {
                error!(error = %e, "failed to load scheduler configuration, using pass-through");
                SchedulerConf::default()
            }),
        };

        let (policy, arguments) = match self.registry.get(&conf.policy) {
            Ok(policy) => (policy, conf.configuration.arguments),
            Err(e) => {
                error!(error = %e, "using pass-through");
                (self.registry.fallback(), PolicyArguments::new())
            }
        };

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.policy.name() == policy.name() && active.arguments == arguments {
            return Arc::clone(&active.policy);
        }

        active.policy.uninitialize();
        match policy.initialize(&arguments) {
            Ok(()) => {
                info!(
                    from = active.policy.name(),
                    to = policy.name(),
                    "switched scheduling policy"
                );
                *active = ActivePolicy { policy, arguments };
            }
            Err(e) => {
                warn!(
                    policy = policy.name(),
                    error = %e,
                    "policy initialization failed, using pass-through"
                );
                let fallback = self.registry.fallback();
                let arguments = PolicyArguments::new();
                if let Err(e) = fallback.initialize(&arguments) {
                    warn!(error = %e, "failed to initialize fallback policy");
                }
                *active = ActivePolicy {
                    policy: fallback,
                    arguments,
                };
            }
        }
        Arc::clone(&active.policy)
    }
}
