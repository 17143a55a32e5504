//! stride scheduler
//!
//! Periodically decides how many masters and replicas each training job
//! should run and writes the decision back to the job store.
//!
//! ## Architecture
//!
//! - **Event pump**: forwards job and node watch events into the cache
//! - **Cluster cache**: holds the current jobs and schedulable nodes
//! - **Scheduler**: snapshot, policy, commit on a fixed period

use std::sync::Arc;

use anyhow::Result;
use stride_api::{ClusterEvent, JobStore, MemoryJobStore};
use stride_scheduler::cache::ClusterCache;
use stride_scheduler::config::Config;
use stride_scheduler::policy::{NoopProbe, PolicyRegistry};
use stride_scheduler::worker::Scheduler;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Capacity of the channel between the watch pump and the cache.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to STRIDE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting stride scheduler");
    info!(
        schedule_period_ms = config.schedule_period.as_millis() as u64,
        scheduler_conf = ?config.scheduler_conf,
        snapshot_workers = config.snapshot_workers,
        commit_workers = config.commit_workers,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The job store is in-process until an external store client is wired in.
    let store = Arc::new(MemoryJobStore::new());
    let job_store: Arc<dyn JobStore> = store.clone();

    let cache = Arc::new(ClusterCache::new(
        job_store,
        config.snapshot_workers,
        config.commit_workers,
    ));
    let registry = PolicyRegistry::with_defaults(Arc::new(NoopProbe));
    let scheduler = Scheduler::new(&config, Arc::clone(&cache), registry);

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    // Forward job watch events into the cache
    let pump_handle = tokio::spawn({
        let mut watch = store.subscribe();
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            loop {
                tokio::select! {
                    event = watch.recv() => match event {
                        Ok(event) => {
                            if event_tx.send(ClusterEvent::Job(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "job watch lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    });

    let cache_handle = tokio::spawn({
        let cache = Arc::clone(&cache);
        let shutdown_rx = shutdown_rx.clone();
        async move { cache.run(event_rx, shutdown_rx).await }
    });

    let scheduler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { scheduler.run(shutdown_rx).await }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = cache_handle => {
            if let Err(e) = result {
                error!(error = %e, "Cluster cache task panicked");
            }
        }
        result = scheduler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Scheduler task panicked");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = pump_handle.await {
        error!(error = %e, "Event pump task panicked");
    }

    info!("Scheduler shutdown complete");
    Ok(())
}
