//! Utility types for trait definitions.
use std::fmt;

use crate::meta::rule::Key;

/// Type to handle PIOL related errors
#[derive(Debug)]
pub enum PiolError {
    /// A metadata key was requested that the owning rule does not carry
    EntryNotFound(Key),

    /// Malformed caller input
    InvalidInput(String),

    /// Malformed on-disk data
    Format(String),

    /// I/O failure
    Io(std::io::Error),
}

impl fmt::Display for PiolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PiolError::EntryNotFound(k) => write!(f, "Entry not found: {:?}", k),
            PiolError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            PiolError::Format(e) => write!(f, "Format error: {}", e),
            PiolError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for PiolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PiolError::Io(e) => Some(e),
            PiolError::EntryNotFound(_) => None,
            PiolError::InvalidInput(_) => None,
            PiolError::Format(_) => None,
        }
    }
}

impl From<std::io::Error> for PiolError {
    fn from(e: std::io::Error) -> Self {
        PiolError::Io(e)
    }
}
