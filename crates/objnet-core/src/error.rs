//! Error types for objnet core.

use thiserror::Error;

/// Errors that can occur while building, encoding, signing or verifying objects.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("object is not signed")]
    MissingSignature,

    #[error("owner {owner} does not match signer {signer}")]
    OwnerMismatch { owner: String, signer: String },

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid type hint: {0}")]
    InvalidHint(String),

    #[error("key {0:?} has no type hint")]
    MissingHint(String),

    #[error("field {key:?} is not a valid {expected}")]
    TypeMismatch { key: String, expected: String },

    #[error("list mixes element types: {0}")]
    HeterogeneousList(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("malformed object: {0}")]
    MalformedObject(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

impl CoreError {
    pub(crate) fn mismatch(key: &str, expected: &str) -> Self {
        CoreError::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
