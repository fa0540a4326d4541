//! Error types for the data-access layer

use kvdao_core::EngineError;
use thiserror::Error;

/// Result type for data-access operations
pub type Result<T> = std::result::Result<T, DaoError>;

/// Errors returned by [`StoreClient`](crate::StoreClient) operations
#[derive(Debug, Error)]
pub enum DaoError {
    /// Opening (or deleting) the database failed
    #[error("database connection error: {0}")]
    Connection(EngineError),

    /// The sentinel store is missing; local data was wiped
    #[error("{0}")]
    SchemaCorrupted(String),

    /// Building the transaction failed (unknown store or index, closed session)
    #[error("transaction error: {0}")]
    Transaction(EngineError),

    /// A single request failed (key collision, invalid key, engine failure)
    #[error("request error: {0}")]
    Request(EngineError),

    /// Applying a schema plan failed; the upgrade was rolled back
    #[error("schema provisioning error: {0}")]
    Schema(EngineError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DaoError {
    /// The engine error behind this failure, if any.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            DaoError::Connection(e)
            | DaoError::Transaction(e)
            | DaoError::Request(e)
            | DaoError::Schema(e) => Some(e),
            DaoError::SchemaCorrupted(_) | DaoError::Config(_) | DaoError::Json(_) => None,
        }
    }

    /// Whether this is a key or unique-index collision.
    ///
    /// `add` reports collisions this way; they leave the store untouched.
    pub fn is_constraint(&self) -> bool {
        matches!(self.engine_error(), Some(EngineError::Constraint(_)))
    }
}
