//! Domain-level error taxonomy for codegate.

use feedback_state::StorageError;

use super::session::SessionState;

/// Errors that surface to callers. Stage failures, corrector failures and
/// storage outages are recorded in reports instead.
#[derive(Debug, thiserror::Error)]
pub enum CodegateError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("verification cancelled")]
    Cancelled,

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodegateError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Result type for codegate operations.
pub type Result<T> = std::result::Result<T, CodegateError>;
