//! # objnet core
//!
//! Pure primitives for objnet: typed values, canonical hashing, objects,
//! signatures and policies.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over content-addressed data structures.
//!
//! ## Key Types
//!
//! - [`Value`] - The closed value tree every object is made of
//! - [`Hint`] - The type tag carried in every field key (`name:hint`)
//! - [`Object`] - A typed, content-addressed unit of data
//! - [`Digest`] - Content address (canonical Blake3 hash)
//! - [`PublicKey`] / [`Keypair`] - Peer identity
//! - [`Policy`] - Access rules attached to object metadata
//!
//! ## Canonical hashing
//!
//! Hashes are independent of map ordering, ignore private (`_`-prefixed) keys,
//! and treat a [`Value::Ref`] as interchangeable with the map it points to.
//! See the [`hash`] module.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod hint;
pub mod object;
pub mod policy;
pub mod signature;
pub mod types;
pub mod value;

pub use crypto::{Ed25519Signature, Keypair, PublicKey};
pub use error::{CoreError, Result};
pub use hash::{canonical_hash, hash_map};
pub use hint::{split_key, Hint, Kind};
pub use object::{Metadata, Object, REQUEST_ID_KEY};
pub use policy::{Effect, Policy};
pub use signature::{sign, verify, Signature, ALGORITHM_ED25519};
pub use types::Digest;
pub use value::{Map, Value};
