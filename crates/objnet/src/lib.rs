//! # objnet
//!
//! Signed, content-addressed objects exchanged between peers that are
//! identified by key rather than by network address.
//!
//! ## Overview
//!
//! - **Objects**: typed value trees with canonical, order-independent hashes
//! - **Signatures**: Ed25519 over the canonical hash; private fields excluded
//! - **Exchange**: authenticated connections, relay fallback, request/response
//!
//! ## Usage
//!
//! ```rust,no_run
//! use objnet::{Context, Keypair, Node, NodeConfig, Object, SendOptions};
//!
//! async fn example(peer: &str) -> objnet::Result<()> {
//!     let node = Node::new(Keypair::generate(), NodeConfig::default())?;
//!     let ctx = Context::background();
//!     node.listen(&ctx, "tcps:127.0.0.1:0").await?;
//!
//!     let message = Object::new("test/msg").with_field("body", "hello");
//!     node.send(&ctx, message, peer, SendOptions::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `objnet::core` - values, objects, hashing, signatures, policies
//! - `objnet::store` - object storage
//! - `objnet::exchange` - transports, handshake, connections, exchange

pub mod error;
pub mod node;

// Re-export component crates
pub use objnet_core as core;
pub use objnet_exchange as exchange;
pub use objnet_store as store;

pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig};

// Re-export commonly used types
pub use objnet_core::{Digest, Effect, Keypair, Object, Policy, PublicKey, Value};
pub use objnet_exchange::{Context, Envelope, SendOptions, Subscription};
