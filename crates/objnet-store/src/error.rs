//! Error types for the store module.

use objnet_core::{CoreError, Digest};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object with this hash is stored.
    #[error("object not found: {0}")]
    NotFound(Digest),

    /// Stored data could not be interpreted.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Object encoding or decoding failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
