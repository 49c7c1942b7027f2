//! Local identity keys.

use objnet_core::{Keypair, PublicKey};

/// The keys this node holds. The primary key signs outbound objects and
/// authenticates the node in handshakes.
#[derive(Debug, Clone)]
pub struct Keychain {
    primary: Keypair,
}

impl Keychain {
    pub fn new(primary: Keypair) -> Self {
        Self { primary }
    }

    pub fn primary_peer_key(&self) -> &Keypair {
        &self.primary
    }

    pub fn public_key(&self) -> PublicKey {
        self.primary.public_key()
    }
}
