//! # objnet testkit
//!
//! Testing utilities for objnet.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Hash vectors**: object pairs pinning which changes move a canonical hash
//! - **Generators**: Proptest strategies for values, objects and messages
//! - **Fixtures**: identities and an in-process network of exchanges
//!
//! ## Hash Vectors
//!
//! ```rust
//! use objnet_testkit::vectors::all_vectors;
//!
//! for vector in all_vectors() {
//!     assert!(vector.passes(), "{}", vector.name);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use objnet_testkit::generators::{message_from_params, MessageParams};
//!
//! proptest! {
//!     #[test]
//!     fn hash_is_deterministic(params: MessageParams) {
//!         let m1 = message_from_params(&params);
//!         let m2 = message_from_params(&params);
//!         prop_assert_eq!(m1.hash(), m2.hash());
//!     }
//! }
//! ```
//!
//! ## Test Networks
//!
//! ```rust,no_run
//! use objnet_testkit::fixtures::TestNetwork;
//!
//! async fn example() {
//!     let net = TestNetwork::new();
//!     let alice = net.spawn_peer("alice").await.unwrap();
//!     let bob = net.spawn_peer("bob").await.unwrap();
//!     // alice.exchange.send(..., &bob.peer_address(), ...)
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{multi_party_fixtures, TestFixture, TestNetwork, TestPeer};
pub use generators::{message_from_params, MessageParams};
pub use vectors::{all_vectors, verify_all_vectors, Expectation, HashVector, VectorReport};
