//! State store error types.

use thiserror::Error;

/// Errors that can occur while loading or persisting fetch state.
#[derive(Error, Debug, Clone)]
pub enum StateError {
    /// Reading or writing the backing storage failed.
    #[error("State I/O error: {0}")]
    Io(String),

    /// Stored state could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store refused the operation.
    #[error("State store unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        StateError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Result type for state store operations.
pub type StateResult<T> = Result<T, StateError>;
