//! Peer resolution.
//!
//! Discovery itself lives outside this crate; the exchange only needs to turn
//! a key into the addresses it can be reached at.

use std::collections::HashMap;

use async_trait::async_trait;
use objnet_core::PublicKey;
use parking_lot::RwLock;

use crate::context::Context;
use crate::error::Result;

/// What to look a peer up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupCriteria {
    PublicKey(PublicKey),
}

/// Where a peer can be reached.
///
/// Addresses are concrete transport addresses or `relay:<key>` entries naming
/// peers that will forward objects to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub public_key: PublicKey,
    pub addresses: Vec<String>,
}

impl PeerInfo {
    pub fn new(public_key: PublicKey, addresses: Vec<String>) -> Self {
        Self {
            public_key,
            addresses,
        }
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, ctx: &Context, criteria: &LookupCriteria) -> Result<Vec<PeerInfo>>;
}

/// A resolver backed by a fixed, updatable table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    peers: RwLock<HashMap<PublicKey, PeerInfo>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a peer's entry.
    pub fn insert(&self, info: PeerInfo) {
        self.peers.write().insert(info.public_key, info);
    }

    pub fn remove(&self, key: &PublicKey) -> Option<PeerInfo> {
        self.peers.write().remove(key)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn lookup(&self, ctx: &Context, criteria: &LookupCriteria) -> Result<Vec<PeerInfo>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let peers = self.peers.read();
        Ok(match criteria {
            LookupCriteria::PublicKey(key) => peers.get(key).cloned().into_iter().collect(),
        })
    }
}
