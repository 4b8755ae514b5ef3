//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Message payload is not a valid protocol message
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
