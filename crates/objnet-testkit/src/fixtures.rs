//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: deterministic identities and an
//! in-process network of exchanges sharing one resolver.

use std::sync::Arc;

use objnet_core::{sign, Keypair, Object, PublicKey};
use objnet_exchange::{
    Address, Context, Exchange, ExchangeConfig, ExchangeError, Keychain, MemoryNetwork,
    MemoryTransport, PeerInfo, Resolver, StaticResolver,
};
use objnet_store::{MemoryStore, ObjectStore};

/// A test fixture with a keypair and memory store.
pub struct TestFixture {
    pub keypair: Keypair,
    pub store: MemoryStore,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self {
            keypair: Keypair::generate(),
            store: MemoryStore::new(),
        }
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(&seed),
            store: MemoryStore::new(),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// An unsigned `test/msg` owned by this fixture.
    pub fn make_message(&self, body: &str) -> Object {
        Object::new("test/msg")
            .with_owner(self.public_key())
            .with_field("body", body)
    }

    /// A signed `test/msg` owned by this fixture.
    pub fn make_signed(&self, body: &str) -> Object {
        let mut object = self.make_message(body);
        let _ = sign(&self.keypair, &mut object);
        object
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create multiple test fixtures for multi-party tests.
pub fn multi_party_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            TestFixture::with_seed(seed)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Networks
// ─────────────────────────────────────────────────────────────────────────────

/// A memory network and the resolver every peer on it shares.
#[derive(Clone)]
pub struct TestNetwork {
    pub network: Arc<MemoryNetwork>,
    pub resolver: Arc<StaticResolver>,
}

/// One exchange listening on a [`TestNetwork`].
pub struct TestPeer {
    pub keypair: Keypair,
    pub exchange: Arc<Exchange>,
    pub store: Arc<MemoryStore>,
    /// The bound `mem:` address.
    pub address: String,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            network: MemoryNetwork::new(),
            resolver: Arc::new(StaticResolver::new()),
        }
    }

    /// Start a peer listening on `mem:<name>` and register it with the resolver.
    pub async fn spawn_peer(&self, name: &str) -> Result<TestPeer, ExchangeError> {
        self.spawn_peer_with(name, ExchangeConfig::default()).await
    }

    pub async fn spawn_peer_with(
        &self,
        name: &str,
        config: ExchangeConfig,
    ) -> Result<TestPeer, ExchangeError> {
        let keypair = Keypair::generate();
        let store = Arc::new(MemoryStore::new());
        let exchange = Exchange::new(
            Keychain::new(keypair.clone()),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&self.resolver) as Arc<dyn Resolver>,
            vec![Arc::new(MemoryTransport::new(Arc::clone(&self.network)))],
            config,
        );
        let address = exchange
            .listen(&Context::background(), &format!("mem:{}", name))
            .await?;
        self.resolver
            .insert(PeerInfo::new(keypair.public_key(), vec![address.clone()]));

        Ok(TestPeer {
            keypair,
            exchange,
            store,
            address,
        })
    }

    /// Replace a peer's resolver entry.
    pub fn set_addresses(&self, key: PublicKey, addresses: Vec<String>) {
        self.resolver.insert(PeerInfo::new(key, addresses));
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPeer {
    pub fn key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// This peer's `peer:` address.
    pub fn peer_address(&self) -> String {
        Address::peer(&self.key())
    }

    /// This peer's `relay:` address.
    pub fn relay_address(&self) -> String {
        Address::relay(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objnet_core::verify;

    #[test]
    fn test_signed_fixture_verifies() {
        let fixture = TestFixture::new();
        let message = fixture.make_signed("hello");
        assert!(verify(&message).is_ok());
        assert!(verify(&fixture.make_message("hello")).is_err());
    }

    #[test]
    fn test_multi_party() {
        let parties = multi_party_fixtures(3);

        // Each party has unique keys
        let pks: Vec<_> = parties.iter().map(|p| p.public_key()).collect();
        assert_ne!(pks[0], pks[1]);
        assert_ne!(pks[1], pks[2]);
        assert_ne!(pks[0], pks[2]);
    }

    #[tokio::test]
    async fn test_spawned_peers_are_resolvable() {
        let net = TestNetwork::new();
        let alice = net.spawn_peer("alice").await.unwrap();
        let bob = net.spawn_peer("bob").await.unwrap();
        assert_eq!(alice.address, "mem:alice");
        assert!(net.network.is_listening("bob"));

        let conn = alice
            .exchange
            .manager()
            .get_connection(&Context::background(), &bob.key())
            .await
            .unwrap();
        assert_eq!(*conn.remote_key(), bob.key());
    }

    #[tokio::test]
    async fn test_duplicate_name_fails() {
        let net = TestNetwork::new();
        let _first = net.spawn_peer("same").await.unwrap();
        assert!(net.spawn_peer("same").await.is_err());
    }
}
