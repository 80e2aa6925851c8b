//! Error types for feedback-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by `FeedbackLog` operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend rejected or failed the operation
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The backend cannot be reached at all
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Append-only violation: the record id already exists
    #[error("record already exists: {record_id}")]
    DuplicateRecord { record_id: String },

    /// A stored or supplied digest is not 64 hex characters
    #[error("invalid content digest: {digest}")]
    InvalidDigest { digest: String },

    /// Embedding length differs from the log's dimension
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Connection(msg) => StorageError::Unavailable(msg),
            other => StorageError::Backend(other.to_string()),
        }
    }
}
