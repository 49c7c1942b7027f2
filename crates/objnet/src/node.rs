//! The node: one local peer with its store, resolver, transports and exchange.

use std::fmt;
use std::sync::Arc;

use objnet_core::{sign, Digest, Keypair, Object, PublicKey};
use objnet_exchange::{
    Address, Context, Exchange, ExchangeConfig, Handler, Keychain, MemoryNetwork, MemoryTransport,
    MetricsSnapshot, PeerInfo, PendingResponse, Resolver, SendOptions, StaticResolver, Subscription,
    TcpsTransport, Transport,
};
use objnet_store::{MemoryStore, ObjectStore};
use parking_lot::Mutex;
use tracing::info;

use crate::error::{NodeError, Result};

/// Configuration for a [`Node`].
#[derive(Clone)]
pub struct NodeConfig {
    pub exchange: ExchangeConfig,
    /// Serve `tcps:` addresses.
    pub tcps: bool,
    /// Join an in-process network under the `mem:` scheme.
    pub memory_network: Option<Arc<MemoryNetwork>>,
    /// Resolver shared with other nodes. A private one is created when unset.
    pub resolver: Option<Arc<StaticResolver>>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            tcps: true,
            memory_network: None,
            resolver: None,
        }
    }
}

impl NodeConfig {
    /// A config for nodes that only talk over an in-process network.
    pub fn memory(network: &Arc<MemoryNetwork>, resolver: &Arc<StaticResolver>) -> Self {
        Self {
            tcps: false,
            memory_network: Some(Arc::clone(network)),
            resolver: Some(Arc::clone(resolver)),
            ..Self::default()
        }
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("exchange", &self.exchange)
            .field("tcps", &self.tcps)
            .field("memory_network", &self.memory_network.is_some())
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

/// What this node publishes about itself to the resolver.
#[derive(Default)]
struct Advertised {
    addresses: Vec<String>,
    relays: Vec<PublicKey>,
}

/// A local peer.
///
/// Must be created inside a tokio runtime.
pub struct Node {
    keychain: Keychain,
    store: Arc<dyn ObjectStore>,
    resolver: Arc<StaticResolver>,
    exchange: Arc<Exchange>,
    advertised: Mutex<Advertised>,
}

impl Node {
    /// Create a node with a memory store and the transports named in `config`.
    pub fn new(keypair: Keypair, config: NodeConfig) -> Result<Self> {
        let mut transports: Vec<Arc<dyn Transport>> = Vec::new();
        if config.tcps {
            transports.push(Arc::new(TcpsTransport::new()?));
        }
        if let Some(network) = &config.memory_network {
            transports.push(Arc::new(MemoryTransport::new(Arc::clone(network))));
        }
        Ok(Self::with_transports(keypair, config, transports))
    }

    /// Create a node over an explicit set of transports.
    pub fn with_transports(
        keypair: Keypair,
        config: NodeConfig,
        transports: Vec<Arc<dyn Transport>>,
    ) -> Self {
        let keychain = Keychain::new(keypair);
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let resolver = config.resolver.unwrap_or_default();
        let schemes: Vec<String> = transports.iter().map(|t| t.scheme().to_string()).collect();

        let exchange = Exchange::new(
            keychain.clone(),
            Arc::clone(&store),
            Arc::clone(&resolver) as Arc<dyn Resolver>,
            transports,
            config.exchange,
        );
        info!(peer = %keychain.public_key(), transports = ?schemes, "node started");

        Self {
            keychain,
            store,
            resolver,
            exchange,
            advertised: Mutex::new(Advertised::default()),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keychain.public_key()
    }

    /// This node's `peer:` address.
    pub fn peer_address(&self) -> String {
        Address::peer(&self.public_key())
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<StaticResolver> {
        &self.resolver
    }

    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.exchange.metrics()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Addresses
    // ─────────────────────────────────────────────────────────────────────────

    /// Listen on a transport address and advertise the bound address.
    pub async fn listen(&self, ctx: &Context, address: &str) -> Result<String> {
        let bound = self.exchange.listen(ctx, address).await?;
        self.advertised.lock().addresses.push(bound.clone());
        self.announce();
        Ok(bound)
    }

    /// Advertise `relay` as a peer that forwards objects to this node.
    pub fn add_relay(&self, relay: PublicKey) {
        {
            let mut advertised = self.advertised.lock();
            if advertised.relays.contains(&relay) {
                return;
            }
            advertised.relays.push(relay);
        }
        self.announce();
    }

    fn announce(&self) {
        let addresses: Vec<String> = {
            let advertised = self.advertised.lock();
            advertised
                .addresses
                .iter()
                .cloned()
                .chain(advertised.relays.iter().map(Address::relay))
                .collect()
        };
        self.resolver
            .insert(PeerInfo::new(self.public_key(), addresses));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Objects
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn send(
        &self,
        ctx: &Context,
        object: Object,
        address: &str,
        options: SendOptions,
    ) -> Result<Option<PendingResponse>> {
        Ok(self.exchange.send(ctx, object, address, options).await?)
    }

    pub fn handle<H: Handler>(&self, pattern: &str, handler: H) -> Result<Subscription> {
        Ok(self.exchange.handle(pattern, handler)?)
    }

    /// Take ownership of an object, sign it, store it and send it.
    ///
    /// Returns the object's hash.
    pub async fn publish(&self, ctx: &Context, mut object: Object, address: &str) -> Result<Digest> {
        let local = self.public_key();
        match object.metadata.owner {
            Some(owner) if owner != local => {
                return Err(NodeError::NotOwner(owner.fingerprint()));
            }
            Some(_) => {}
            None => object.metadata.owner = Some(local),
        }
        sign(self.keychain.primary_peer_key(), &mut object)?;

        let hash = self.store.put(&object).await?;
        self.exchange
            .send(ctx, object, address, SendOptions::new())
            .await?;
        info!(hash = %hash, address = %address, "published object");
        Ok(hash)
    }

    /// Fetch an object from a peer and keep a copy in the local store.
    pub async fn fetch(&self, ctx: &Context, hash: Digest, address: &str) -> Result<Object> {
        let object = self.exchange.request_object(ctx, hash, address).await?;
        self.store.put(&object).await?;
        Ok(object)
    }

    /// Close every connection and stop listening.
    pub fn shutdown(&self) {
        self.exchange.shutdown();
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("peer", &self.public_key())
            .finish_non_exhaustive()
    }
}
