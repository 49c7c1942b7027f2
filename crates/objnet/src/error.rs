//! Error types for the node facade.

use objnet_core::CoreError;
use objnet_exchange::{ExchangeError, TransportError};
use objnet_store::StoreError;
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A transport could not be set up.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The object names an owner other than this node.
    #[error("object is owned by {0}, not this node")]
    NotOwner(String),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
