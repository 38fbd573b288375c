//! Error types for the state store.

use std::io;

use ownables_event_chain::ChainError;
use thiserror::Error;

/// Errors raised by state and chain stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no stored data for instance {0}")]
    NotFound(String),

    #[error("invalid instance id: {0:?}")]
    InvalidId(String),

    #[error("stored data for {id} is corrupt: {message}")]
    Corrupt { id: String, message: String },

    /// The persisted chain failed validation on load.
    #[error("stored chain failed validation: {0}")]
    Chain(#[from] ChainError),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
