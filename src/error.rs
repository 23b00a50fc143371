//! Error types for the cloud tier.

use std::io;
use thiserror::Error as ThisError;

/// The result type used throughout the cloud tier.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for manifest, transfer and transport operations.
#[derive(Debug, ThisError)]
pub enum Error {
    /// An I/O error occurred against the local tier.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A manifest record or a transfer document is malformed.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The object store or the remote compute endpoint failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The requested object or key was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided, e.g. a local file number flagged as remote.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The version set is in a state that does not permit the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An outbound document could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether the failed operation may be re-issued unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corruption(format!("malformed document: {}", err))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Corruption(format!("invalid base64 payload: {}", err))
    }
}
