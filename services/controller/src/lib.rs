//! stride controller library.
//!
//! Turns each job record's scheduled allocation into a concrete batch job
//! and tracks the job's lifecycle.
//!
//! ## Architecture
//!
//! - **Cache**: job records, their batch jobs and the node registry
//! - **Controller**: filters watch events and routes job keys to partitions
//! - **State machine**: one action per lifecycle state, run per job key
//! - **Updater**: creates or patches the batch job and writes state back
//! - **Topology**: the task layout for each job type
//!
//! ## Invariants
//!
//! - A job key is reconciled by at most one worker at a time
//! - Reconciling a batch job that already matches issues no write
//! - A batch job owned by a different record is never overwritten

pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod events;
pub mod state;
pub mod topology;
pub mod updater;
