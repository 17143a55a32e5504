//! stride controller
//!
//! Turns the allocations written by the scheduler into batch jobs and walks
//! each training job through its lifecycle.
//!
//! ## Architecture
//!
//! - **Event pumps**: forward job and batch-job watch events
//! - **Controller**: caches events, hashes job keys onto worker partitions
//! - **Collector**: deletes batch jobs left behind by removed jobs

use std::sync::Arc;

use anyhow::Result;
use stride_api::{ClusterEvent, JobStore, MemoryJobStore, WatchEvent};
use stride_controller::client::{BatchJobClient, MemoryBatchClient};
use stride_controller::config::Config;
use stride_controller::controller::Controller;
use stride_controller::events::TracingEventSink;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Capacity of the channel between the watch pumps and the controller.
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

    info!("Starting stride controller");
    info!(
        workers = config.workers,
        max_retries = config.max_retries,
        backoff_base_ms = config.backoff_base.as_millis() as u64,
        backoff_max_ms = config.backoff_max.as_millis() as u64,
        scheduler_name = %config.scheduler_name,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Both stores are in-process until external clients are wired in.
    let store = Arc::new(MemoryJobStore::new());
    let batch = Arc::new(MemoryBatchClient::new());
    let job_store: Arc<dyn JobStore> = store.clone();
    let batch_client: Arc<dyn BatchJobClient> = batch.clone();

    let controller = Arc::new(Controller::new(
        &config,
        job_store,
        batch_client,
        Arc::new(TracingEventSink),
    ));

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let job_pump = spawn_pump(
        "job",
        store.subscribe(),
        ClusterEvent::Job,
        event_tx.clone(),
        shutdown_rx.clone(),
    );
    let batch_pump = spawn_pump(
        "batch job",
        batch.subscribe(),
        ClusterEvent::BatchJob,
        event_tx,
        shutdown_rx.clone(),
    );

    let mut controller_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { controller.run(event_rx, shutdown_rx).await }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    for (name, handle) in [("job", job_pump), ("batch job", batch_pump)] {
        if let Err(e) = handle.await {
            error!(error = %e, pump = name, "Event pump task panicked");
        }
    }
    if !controller_handle.is_finished() {
        if let Err(e) = controller_handle.await {
            error!(error = %e, "Controller task panicked");
        }
    }

    info!("Controller shutdown complete");
    Ok(())
}

/// Forwards one watch stream into the controller's event channel.
fn spawn_pump<T>(
    name: &'static str,
    mut stream: broadcast::Receiver<WatchEvent<T>>,
    wrap: fn(WatchEvent<T>) -> ClusterEvent,
    events: mpsc::Sender<ClusterEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = stream.recv() => match event {
                    Ok(event) => {
                        if events.send(wrap(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(pump = name, skipped = n, "watch lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
