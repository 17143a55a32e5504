//! # stride-id
//!
//! Validated object names and job keys for the stride scheduler.
//!
//! ## Design Principles
//!
//! - Names are user-controlled and validated once, at the edge
//! - Every name has a canonical string form with strict parsing
//! - Names are typed so a node name cannot be passed where a job name is expected
//!
//! ## Key Format
//!
//! Jobs are addressed by `{namespace}/{name}`:
//!
//! - `default/resnet-50`
//! - `team-a/bert.large`
//!
//! The same string is used as the work-queue key in the controller and as the
//! map key in scheduler snapshots, so its ordering is also the deterministic
//! tie-break order used by allocation policies.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

#[doc(hidden)]
pub use macros::validate_dns_name as __validate_dns_name;
