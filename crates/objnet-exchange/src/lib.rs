//! # objnet exchange
//!
//! Authenticated delivery of objects between peers identified by key.
//!
//! ## Overview
//!
//! Peers are addressed as `peer:<fingerprint>` and resolved to concrete
//! transport addresses (`tcps:`, `mem:`). Every connection is authenticated by
//! a signed three-way handshake, kept as the single live connection for its
//! peer, and read by a background loop feeding the [`Exchange`].
//!
//! ## Key Properties
//!
//! - **One connection per peer**: redials replace and close the old connection
//! - **Relay fallback**: peers that cannot be dialed are reached through their
//!   `relay:` entries
//! - **Backoff**: failed addresses are skipped for an exponentially growing time
//! - **Cancellable**: every dial, handshake step, send and wait takes a [`Context`]
//!
//! ## Message Flow
//!
//! ```text
//! Dialer                              Acceptor
//!   |<------- handshake/syn ----------|
//!   |-------- handshake/syn-ack ----->|
//!   |<------- handshake/ack ----------|
//!   |======== objects (both ways) ====|
//! ```

pub mod address;
pub mod backoff;
pub mod connection;
pub mod context;
pub mod error;
pub mod exchange;
pub mod handshake;
pub mod keychain;
pub mod manager;
pub mod messages;
pub mod pattern;
pub mod resolver;
pub mod tcps;
pub mod transport;
pub mod wire;

pub use address::Address;
pub use backoff::{BackoffConfig, Blocklist, DialMetrics, MetricsSnapshot};
pub use connection::{Connection, Direction, Inbound};
pub use context::Context;
pub use error::{ExchangeError, HandshakeError, Result, TransportError};
pub use exchange::{
    Envelope, Exchange, ExchangeConfig, Handler, PendingResponse, SendOptions, Subscription,
};
pub use handshake::{Handshake, HandshakeState};
pub use keychain::Keychain;
pub use manager::{ConnectionConfig, ConnectionManager};
pub use messages::{Message, ObjectForwardRequest, ObjectRequest};
pub use pattern::TypePattern;
pub use resolver::{LookupCriteria, PeerInfo, Resolver, StaticResolver};
pub use tcps::TcpsTransport;
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Listener, Transport};
