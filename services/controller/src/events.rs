//! Job events surfaced to operators.

use std::sync::Mutex;

use async_trait::async_trait;
use stride_id::JobKey;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// An event recorded against a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub job: JobKey,
    pub event_type: EventType,
    /// Short machine-readable cause, e.g. `OwnershipConflict`.
    pub reason: String,
    pub message: String,
}

impl Event {
    pub fn warning(job: JobKey, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job,
            event_type: EventType::Warning,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: Event);
}

/// Writes events to the log.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => {
                info!(job = %event.job, reason = %event.reason, "{}", event.message)
            }
            EventType::Warning => {
                warn!(job = %event.job, reason = %event.reason, "{}", event.message)
            }
        }
    }
}

/// Keeps events in memory.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
