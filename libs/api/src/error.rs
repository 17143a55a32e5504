//! Error types for the shared data model.

use thiserror::Error;

/// Errors parsing a quantity string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity cannot be empty")]
    Empty,

    #[error("invalid quantity number in '{0}'")]
    InvalidNumber(String),

    #[error("unknown quantity suffix '{suffix}' in '{value}'")]
    UnknownSuffix { suffix: String, value: String },

    #[error("quantity '{0}' out of range")]
    OutOfRange(String),
}

/// Errors from resource arithmetic.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResourceError {
    /// Subtraction would drive a component below zero.
    #[error("resource is not sufficient: <{available}> sub <{requested}>")]
    Insufficient {
        available: String,
        requested: String,
    },
}

/// Errors translating a role's symbolic node request into concrete resources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("'{resource}' must be requested with quantity 1, got {quantity}")]
    InvalidNodeQuantity { resource: String, quantity: String },

    #[error("'{resource}' cannot be combined with other resources: {others:?}")]
    MixedResources {
        resource: String,
        others: Vec<String>,
    },

    #[error("'{resource}' requested without a node type")]
    MissingNodeType { resource: String },

    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),
}

/// Errors from the job-record store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Unavailable(_))
    }
}
