//! # stride-api
//!
//! Shared data model for the stride scheduler and controller.
//!
//! ## Contents
//!
//! - **Resources**: [`Quantity`] parsing and the [`Resource`] vector with
//!   tolerant and strict comparisons
//! - **Nodes**: [`NodeInfo`] derived from observed node objects, and the
//!   [`NodeRegistry`] that groups nodes into [`NodeTypeInfo`] equivalence classes
//! - **Jobs**: the user-facing [`JobRecord`] and the underlying [`BatchJob`]
//! - **Events**: [`WatchEvent`] notifications delivered by an external watch
//! - **Store**: the [`JobStore`] trait for writing scheduled allocations and
//!   lifecycle state back, plus an in-memory implementation
//!
//! ## Invariants
//!
//! - Resource components are non-negative in steady state
//! - A node type's representative resource is at most every member's
//!   allocatable resource
//! - Node-type classes are rebuilt wholesale; rebuilding twice yields the same classes

mod batch;
mod error;
mod event;
mod job;
mod meta;
mod node;
mod node_type;
mod quantity;
mod resource;
mod store;

pub use batch::*;
pub use error::*;
pub use event::*;
pub use job::*;
pub use meta::*;
pub use node::*;
pub use node_type::*;
pub use quantity::*;
pub use resource::*;
pub use store::*;

/// Label carrying a node's declared type.
pub const NODE_TYPE_LABEL: &str = "stride.dev/node-type";

/// Symbolic resource name meaning "one whole node of the role's node type".
pub const NODE_RESOURCE: &str = "stride.dev/node";

/// Node capacity entry with total GPU memory across all devices.
pub const GPU_MEMORY_RESOURCE: &str = "stride.dev/gpu-memory";

/// Node capacity entry with the number of GPU devices.
pub const GPU_NUMBER_RESOURCE: &str = "stride.dev/gpu-number";

/// Annotation holding the policy-specific custom-field document.
pub const CUSTOM_FIELDS_ANNOTATION: &str = "stride.dev/custom-fields";

/// Owner-reference kind used by batch jobs created for a job record.
pub const JOB_KIND: &str = "StrideJob";
