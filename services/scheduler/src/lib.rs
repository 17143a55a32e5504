//! stride scheduler library.
//!
//! This crate exposes the scheduler's cache, policies and loop for use by
//! the binary and by integration tests.
//!
//! ## Architecture
//!
//! - **Cache**: ingests job and node watch events under a single lock
//! - **Snapshot**: an independent deep copy of schedulable nodes and jobs
//! - **Policy**: decides master/replica counts inside a snapshot
//! - **Commit**: writes changed allocations back to the job store
//! - **Scheduler**: the periodic loop tying the above together

pub mod cache;
pub mod conf;
pub mod config;
pub mod policy;
pub mod snapshot;
pub mod worker;
