//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The user-supplied path or pattern cannot be tracked
    #[error("Invalid log source '{input}': {reason}")]
    InvalidSource { input: String, reason: String },

    /// Friendly id or description rejected
    #[error("Invalid {field}: {reason}")]
    InvalidMetadata { field: String, reason: String },

    /// Search predicate could not be compiled
    #[error("Invalid search query: {reason}")]
    InvalidQuery { reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
