//! Engine error types

use thiserror::Error;

/// Errors raised by a storage engine, either synchronously while building a
/// transaction or asynchronously by a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Unknown database, object store or index
    #[error("not found: {0}")]
    NotFound(String),

    /// A write collided with an existing key or a unique index
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Invalid key, key path or value
    #[error("invalid data: {0}")]
    Data(String),

    /// Write attempted in a read-only transaction
    #[error("transaction is read-only: {0}")]
    ReadOnly(String),

    /// The connection, transaction or cursor is not usable in its current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Requested version is lower than the stored version
    #[error("version error: requested {requested}, stored {stored}")]
    Version { requested: u32, stored: u32 },

    /// The upgrade or transaction was aborted
    #[error("aborted: {0}")]
    Aborted(String),

    /// Any other backend failure
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
