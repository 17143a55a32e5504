//! Watch notifications delivered by external sources.

use crate::{BatchJob, JobRecord, NodeObject};

/// An add/update/delete notification for one object.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified { old: T, new: T },
    Deleted(T),
}

impl<T> WatchEvent<T> {
    /// The object as it is after the event (or was, for deletes).
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Deleted(obj) => obj,
            WatchEvent::Modified { new, .. } => new,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified { .. } => "modified",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}

/// Any event the scheduler or controller caches consume.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    Job(WatchEvent<JobRecord>),
    Node(WatchEvent<NodeObject>),
    BatchJob(WatchEvent<BatchJob>),
}
