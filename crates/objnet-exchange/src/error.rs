//! Error types for the exchange module.

use objnet_core::CoreError;
use objnet_store::StoreError;
use thiserror::Error;

/// Errors raised by a transport while dialing, listening or moving frames.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    /// A frame could not be encoded or decoded as an object.
    #[error("codec error: {0}")]
    Codec(#[from] CoreError),

    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Nothing is listening at the dialed address.
    #[error("no listener at {0}")]
    NoListener(String),

    #[error("address {0} is already in use")]
    AddressInUse(String),

    #[error("listener closed")]
    ListenerClosed,
}

/// Errors that fail the handshake. All of them are terminal for the connection.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("nonce mismatch")]
    NonceMismatch,

    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage { expected: &'static str, got: String },

    #[error("handshake message signature invalid: {0}")]
    InvalidSignature(#[source] CoreError),

    /// The final message was signed by a different key than the first.
    #[error("handshake signer changed mid-handshake")]
    SignerChanged,

    #[error("malformed handshake message: {0}")]
    Malformed(#[source] CoreError),

    #[error("transport error during handshake: {0}")]
    Transport(#[from] TransportError),

    #[error("connection closed during handshake")]
    ConnectionClosed,

    #[error("handshake step timed out")]
    Timeout,

    #[error("handshake cancelled")]
    Cancelled,
}

/// Errors that can occur during exchange operations.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("cannot send to self")]
    SendToSelf,

    /// The resolver knows no address for the peer.
    #[error("no addresses for peer {0}")]
    NoAddresses(String),

    #[error("all addresses failed for peer {0}")]
    AllAddressesFailed(String),

    #[error("all addresses for peer {0} are blocked")]
    AllAddressesBlocked(String),

    #[error("unsupported address: {0}")]
    UnsupportedAddress(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("expected peer {expected}, handshake authenticated {actual}")]
    PeerKeyMismatch { expected: String, actual: String },

    #[error("invalid handler pattern: {0:?}")]
    InvalidPattern(String),

    #[error("exchange is shut down")]
    Shutdown,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    /// The response channel was dropped before a response arrived.
    #[error("response dropped")]
    ResponseDropped,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;
