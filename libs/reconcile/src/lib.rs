//! Reconciliation loop primitives.
//!
//! This library provides the plumbing for loops that converge desired state
//! to current state one key at a time. Key concepts:
//!
//! - **Work queue**: a de-duplicating queue of keys. A key is never handed to
//!   two consumers at once; re-adding a key while it is being processed
//!   queues it again after [`WorkQueue::done`].
//! - **Rate limiting**: failed keys are re-added after an exponential delay
//!   given by a [`BackoffPolicy`]; callers drop a key once
//!   [`WorkQueue::num_requeues`] reaches their retry bound.
//! - **Partitioning**: [`PartitionedQueue`] routes each key to one of N
//!   queues by hash, so each key is owned by exactly one worker.
//!
//! # Invariants
//!
//! - At most one consumer holds a given key at any time
//! - A key added N times before it is picked up is processed once
//! - The same key always maps to the same partition

mod backoff;
mod partition;
mod queue;

use std::time::Duration;

use thiserror::Error;

pub use backoff::BackoffPolicy;
pub use partition::{fnv1a_32, PartitionedQueue};
pub use queue::WorkQueue;

/// Reconciliation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Resource not found.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Concurrent modification; retrying may succeed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The resource is owned by someone else. Retrying cannot help.
    #[error("ownership conflict: {0}")]
    Ownership(String),

    /// Observed state contradicts what this loop created.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An external call failed.
    #[error("external call failed: {0}")]
    External(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    /// Returns true if the item should be re-queued.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Ownership(_))
    }
}

/// Default retry bound before a key is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 15;

/// Default first retry delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(5);

/// Default retry delay cap.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(1000);

/// Retry delay cap for garbage-collection queues.
pub const GC_BACKOFF_MAX: Duration = Duration::from_secs(180);
