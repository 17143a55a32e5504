//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating names and keys.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The name is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The name exceeds the maximum length.
    #[error("{kind} too long: {len} > {max}")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },

    /// The name contains a character outside the allowed set.
    #[error("invalid character {ch:?} in {kind} '{value}'")]
    InvalidCharacter {
        kind: &'static str,
        ch: char,
        value: String,
    },

    /// The name must start and end with an alphanumeric character.
    #[error("{kind} '{value}' must start and end with an alphanumeric character")]
    InvalidBoundary { kind: &'static str, value: String },

    /// The job key is missing the `/` separator.
    #[error("job key '{0}' missing '/' separator")]
    MissingSeparator(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }
}
