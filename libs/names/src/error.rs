//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name string is empty.
    #[error("{kind} name cannot be empty")]
    Empty { kind: &'static str },

    /// The name exceeds the maximum length.
    #[error("{kind} name is {len} characters long, maximum is {max}")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },

    /// The name contains a character outside the allowed set.
    #[error("{kind} name contains invalid character {ch:?}")]
    InvalidCharacter { kind: &'static str, ch: char },

    /// The name does not start with an alphanumeric character.
    #[error("{kind} name must start with a letter or digit")]
    InvalidStart { kind: &'static str },
}

impl NameError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, NameError::Empty { .. })
    }

    /// The kind of resource whose name failed validation.
    pub fn kind(&self) -> &'static str {
        match self {
            NameError::Empty { kind }
            | NameError::TooLong { kind, .. }
            | NameError::InvalidCharacter { kind, .. }
            | NameError::InvalidStart { kind } => kind,
        }
    }
}
