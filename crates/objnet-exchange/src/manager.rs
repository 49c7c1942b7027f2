//! Connection management.
//!
//! Keeps at most one live connection per peer, dials peers through the
//! resolver with backoff, authenticates every connection with the handshake,
//! and runs one read loop per connection feeding the exchange inbox.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use objnet_core::PublicKey;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::address::{Address, RELAY_SCHEME};
use crate::backoff::{BackoffConfig, Blocklist, DialMetrics};
use crate::connection::{Connection, ConnectionReader, Direction, Inbound};
use crate::context::Context;
use crate::error::{ExchangeError, Result};
use crate::handshake::{Handshake, DEFAULT_STEP_TIMEOUT};
use crate::keychain::Keychain;
use crate::resolver::{LookupCriteria, Resolver};
use crate::transport::{BoxedStream, Transport};
use crate::wire::{framed, DEFAULT_MAX_FRAME_SIZE};

/// Configuration for connection management.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for each handshake step.
    pub handshake_timeout: Duration,
    /// Timeout for opening the transport stream.
    pub dial_timeout: Duration,
    /// Largest frame accepted or sent.
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_STEP_TIMEOUT,
            dial_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Owns every live connection of one exchange.
pub struct ConnectionManager {
    keychain: Keychain,
    transports: HashMap<String, Arc<dyn Transport>>,
    resolver: Arc<dyn Resolver>,
    config: ConnectionConfig,
    blocklist: Blocklist,
    metrics: Arc<DialMetrics>,
    /// Live connections by authenticated peer key.
    connections: DashMap<PublicKey, Arc<Connection>>,
    /// Serializes dials to the same peer.
    dial_locks: DashMap<PublicKey, Arc<Mutex<()>>>,
    inbox: mpsc::Sender<Inbound>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        keychain: Keychain,
        transports: Vec<Arc<dyn Transport>>,
        resolver: Arc<dyn Resolver>,
        config: ConnectionConfig,
        backoff: BackoffConfig,
        inbox: mpsc::Sender<Inbound>,
    ) -> Arc<Self> {
        let transports = transports
            .into_iter()
            .map(|t| (t.scheme().to_string(), t))
            .collect();
        Arc::new(Self {
            keychain,
            transports,
            resolver,
            config,
            blocklist: Blocklist::new(backoff),
            metrics: Arc::new(DialMetrics::default()),
            connections: DashMap::new(),
            dial_locks: DashMap::new(),
            inbox,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_key(&self) -> PublicKey {
        self.keychain.public_key()
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    pub fn metrics(&self) -> &Arc<DialMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The transport serving a scheme.
    pub fn transport(&self, scheme: &str) -> Option<&Arc<dyn Transport>> {
        self.transports.get(scheme)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// The live connection to a peer, if any.
    pub fn connection(&self, key: &PublicKey) -> Option<Arc<Connection>> {
        self.connections
            .get(key)
            .map(|c| Arc::clone(c.value()))
            .filter(|c| !c.is_closed())
    }

    /// A live connection whose remote transport address is `address`.
    pub fn find_by_address(&self, address: &str) -> Option<Arc<Connection>> {
        self.connections
            .iter()
            .find(|entry| entry.value().address() == address && !entry.value().is_closed())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Keys of every peer with a live connection.
    pub fn connected_peers(&self) -> Vec<PublicKey> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| *entry.key())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dialing
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the live connection to `key`, dialing it if needed.
    ///
    /// Addresses come from the resolver and are tried in order. Blocked
    /// addresses are skipped; each failed dial blocks its address.
    #[instrument(skip(self, ctx), fields(peer = %key))]
    pub async fn get_connection(
        self: &Arc<Self>,
        ctx: &Context,
        key: &PublicKey,
    ) -> Result<Arc<Connection>> {
        if *key == self.local_key() {
            return Err(ExchangeError::SendToSelf);
        }
        if let Some(conn) = self.connection(key) {
            return Ok(conn);
        }

        let lock = Arc::clone(self.dial_locks.entry(*key).or_default().value());
        let result = match ctx.run(lock.lock()).await {
            Ok(_guard) => self.dial_peer(ctx, key).await,
            Err(e) => Err(e),
        };
        drop(lock);
        // Drop the lock entry unless another dial is waiting on it.
        self.dial_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Resolve and dial `key`. Callers hold the peer's dial lock.
    async fn dial_peer(self: &Arc<Self>, ctx: &Context, key: &PublicKey) -> Result<Arc<Connection>> {
        // Someone else may have connected while we waited.
        if let Some(conn) = self.connection(key) {
            debug!("reusing connection established while waiting");
            return Ok(conn);
        }

        let addresses: Vec<String> = self
            .resolver
            .lookup(ctx, &LookupCriteria::PublicKey(*key))
            .await?
            .into_iter()
            .filter(|info| info.public_key == *key)
            .flat_map(|info| info.addresses)
            .filter(|address| !is_relay_address(address))
            .collect();

        let peer = Address::peer(key);
        if addresses.is_empty() {
            return Err(ExchangeError::NoAddresses(peer));
        }

        let mut attempted = 0;
        for address in &addresses {
            if self.blocklist.is_blocked(address) {
                self.metrics.blocked_skip();
                debug!(address = %address, "skipping blocked address");
                continue;
            }
            attempted += 1;

            match self.establish(ctx, address, Some(key)).await {
                Ok((conn, reader)) => {
                    self.blocklist.reset(address);
                    self.blocklist.reset(&peer);
                    self.store(Arc::clone(&conn), reader);
                    return Ok(conn);
                }
                Err(e) => {
                    if let Some(done) = ctx.err() {
                        return Err(done);
                    }
                    let ttl = self.blocklist.record_failure(address);
                    warn!(address = %address, error = %e, backoff = ?ttl, "dial failed");
                }
            }
        }

        if attempted == 0 {
            return Err(ExchangeError::AllAddressesBlocked(peer));
        }
        let failures = self.blocklist.record_peer_failure(&peer);
        debug!(failures, "all addresses failed");
        Err(ExchangeError::AllAddressesFailed(peer))
    }

    /// Dial a concrete transport address, authenticate, and store the
    /// connection. If `expected` is set the remote must hold that key.
    #[instrument(skip(self, ctx, expected), fields(address = %address))]
    pub async fn dial_address(
        self: &Arc<Self>,
        ctx: &Context,
        address: &str,
        expected: Option<&PublicKey>,
    ) -> Result<Arc<Connection>> {
        match self.establish(ctx, address, expected).await {
            Ok((conn, reader)) => {
                self.blocklist.reset(address);
                self.store(Arc::clone(&conn), reader);
                Ok(conn)
            }
            Err(e) => {
                if ctx.err().is_none() {
                    self.blocklist.record_failure(address);
                }
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        ctx: &Context,
        address: &str,
        expected: Option<&PublicKey>,
    ) -> Result<(Arc<Connection>, ConnectionReader)> {
        let (scheme, target) = match Address::parse(address)? {
            Address::Transport { scheme, target } => (scheme, target),
            _ => return Err(ExchangeError::UnsupportedAddress(address.to_string())),
        };
        let transport = self
            .transport(&scheme)
            .ok_or_else(|| ExchangeError::UnsupportedAddress(address.to_string()))?;

        self.metrics.dial_attempt();
        let result = async {
            let stream = transport
                .dial(&ctx.with_timeout(self.config.dial_timeout), &target)
                .await?;
            let mut stream = framed(stream, self.config.max_frame_size);

            let keypair = self.keychain.primary_peer_key();
            let remote = Handshake::new(keypair, self.config.handshake_timeout)
                .outgoing(ctx, &mut stream)
                .await?;

            if remote == self.local_key() {
                return Err(ExchangeError::SendToSelf);
            }
            if let Some(expected) = expected {
                if remote != *expected {
                    return Err(ExchangeError::PeerKeyMismatch {
                        expected: expected.fingerprint(),
                        actual: remote.fingerprint(),
                    });
                }
            }
            Ok::<_, ExchangeError>(Connection::new(
                stream,
                remote,
                address.to_string(),
                Direction::Outbound,
            ))
        }
        .await;

        match &result {
            Ok((conn, _)) => {
                self.metrics.dial_success();
                info!(peer = %conn.remote_key(), address = %address, "connection established");
            }
            Err(_) => self.metrics.dial_failure(),
        }
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accepting
    // ─────────────────────────────────────────────────────────────────────────

    /// Authenticate an inbound stream and store the connection.
    pub async fn accept(
        self: &Arc<Self>,
        ctx: &Context,
        stream: BoxedStream,
        remote_address: String,
    ) -> Result<Arc<Connection>> {
        let mut stream = framed(stream, self.config.max_frame_size);
        let keypair = self.keychain.primary_peer_key();
        let remote = Handshake::new(keypair, self.config.handshake_timeout)
            .incoming(ctx, &mut stream)
            .await?;

        let (conn, reader) = Connection::new(stream, remote, remote_address, Direction::Inbound);
        info!(peer = %remote, address = %conn.address(), "accepted connection");
        self.store(Arc::clone(&conn), reader);
        Ok(conn)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Make `conn` the connection for its peer and start its read loop.
    ///
    /// Any connection it replaces is closed.
    pub fn store(self: &Arc<Self>, conn: Arc<Connection>, reader: ConnectionReader) {
        let key = *conn.remote_key();
        if let Some(old) = self.connections.insert(key, Arc::clone(&conn)) {
            if !Arc::ptr_eq(&old, &conn) {
                debug!(peer = %key, old = old.id(), new = conn.id(), "replacing connection");
                old.close();
            }
        }
        self.spawn_reader(conn, reader);
    }

    /// Drop `conn` from the table if it is still the stored connection.
    pub fn remove(&self, conn: &Arc<Connection>) {
        self.connections
            .remove_if(conn.remote_key(), |_, stored| Arc::ptr_eq(stored, conn));
    }

    /// Close every connection and stop all read loops.
    pub fn close_all(&self) {
        self.shutdown.cancel();
        for entry in self.connections.iter() {
            entry.value().close();
        }
        self.connections.clear();
    }

    fn spawn_reader(self: &Arc<Self>, conn: Arc<Connection>, reader: ConnectionReader) {
        let manager = Arc::downgrade(self);
        let inbox = self.inbox.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            read_loop(&conn, reader, &inbox, &shutdown).await;
            conn.close();
            remove_from(&manager, &conn);
        });
    }
}

fn remove_from(manager: &Weak<ConnectionManager>, conn: &Arc<Connection>) {
    if let Some(manager) = manager.upgrade() {
        manager.remove(conn);
    }
}

async fn read_loop(
    conn: &Arc<Connection>,
    mut reader: ConnectionReader,
    inbox: &mpsc::Sender<Inbound>,
    shutdown: &CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = conn.closed() => return,
            _ = shutdown.cancelled() => return,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(object)) => {
                let inbound = Inbound {
                    connection: Arc::clone(conn),
                    object,
                };
                if inbox.send(inbound).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                debug!(peer = %conn.remote_key(), error = %e, "read failed");
                return;
            }
            None => {
                debug!(peer = %conn.remote_key(), "connection closed by remote");
                return;
            }
        }
    }
}

fn is_relay_address(address: &str) -> bool {
    address
        .split_once(':')
        .is_some_and(|(scheme, _)| scheme == RELAY_SCHEME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandshakeError;
    use crate::messages::{Ack, Message, Syn};
    use crate::resolver::{PeerInfo, StaticResolver};
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};
    use futures::SinkExt;
    use objnet_core::{sign, Keypair, Object};

    struct Peer {
        manager: Arc<ConnectionManager>,
        inbox: mpsc::Receiver<Inbound>,
        key: PublicKey,
    }

    fn peer(network: &Arc<MemoryNetwork>, resolver: &Arc<StaticResolver>) -> Peer {
        let keypair = Keypair::generate();
        let key = keypair.public_key();
        let (tx, rx) = mpsc::channel(16);
        let manager = ConnectionManager::new(
            Keychain::new(keypair),
            vec![Arc::new(MemoryTransport::new(Arc::clone(network)))],
            Arc::clone(resolver) as Arc<dyn Resolver>,
            ConnectionConfig::default(),
            BackoffConfig::default(),
            tx,
        );
        Peer {
            manager,
            inbox: rx,
            key,
        }
    }

    /// Listen on `name` and accept every inbound stream in the background.
    async fn serve(peer: &Peer, name: &str) -> String {
        let transport = peer.manager.transport("mem").unwrap().clone();
        let mut listener = transport.listen(&Context::background(), name).await.unwrap();
        let address = listener.local_address();
        let manager = Arc::clone(&peer.manager);
        tokio::spawn(async move {
            while let Ok((stream, remote)) = listener.accept().await {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    let _ = manager.accept(&Context::background(), stream, remote).await;
                });
            }
        });
        address
    }

    #[tokio::test]
    async fn test_dial_reuses_connection() {
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let alice = peer(&network, &resolver);
        let mut bob = peer(&network, &resolver);

        let address = serve(&bob, "bob").await;
        resolver.insert(PeerInfo::new(bob.key, vec![address]));

        let ctx = Context::background();
        let first = alice.manager.get_connection(&ctx, &bob.key).await.unwrap();
        let second = alice.manager.get_connection(&ctx, &bob.key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(alice.manager.connected_peers(), vec![bob.key]);

        first
            .write(&ctx, Object::new("test/msg").with_field("body", "hi"))
            .await
            .unwrap();
        let inbound = bob.inbox.recv().await.unwrap();
        assert_eq!(inbound.object.object_type, "test/msg");
        assert_eq!(*inbound.connection.remote_key(), alice.key);
        assert_eq!(alice.manager.metrics().snapshot().dial_successes, 1);
    }

    #[tokio::test]
    async fn test_failed_handshake_is_not_stored() {
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let alice = peer(&network, &resolver);
        let liar = Keypair::generate();

        // Accepts one stream and answers the SynAck with the wrong nonce.
        let transport = alice.manager.transport("mem").unwrap().clone();
        let mut listener = transport.listen(&Context::background(), "liar").await.unwrap();
        let address = listener.local_address();
        let remote = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = framed(stream, DEFAULT_MAX_FRAME_SIZE);
            let mut syn = Syn {
                nonce: "expected".into(),
            }
            .to_object();
            sign(&liar, &mut syn).unwrap();
            stream.send(syn).await.unwrap();
            let _syn_ack = stream.next().await.unwrap().unwrap();
            let mut ack = Ack {
                nonce: "different".into(),
            }
            .to_object();
            sign(&liar, &mut ack).unwrap();
            stream.send(ack).await.unwrap();
            stream.next().await
        });

        let result = alice
            .manager
            .dial_address(&Context::background(), &address, None)
            .await;
        assert!(matches!(
            result,
            Err(ExchangeError::Handshake(HandshakeError::NonceMismatch))
        ));
        assert!(alice.manager.connected_peers().is_empty());
        assert!(alice.manager.find_by_address(&address).is_none());
        // The dialer dropped its end.
        assert!(remote.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dial_lock_released_after_dial() {
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let alice = peer(&network, &resolver);
        let bob = peer(&network, &resolver);
        let ghost = Keypair::generate().public_key();

        let address = serve(&bob, "bob").await;
        resolver.insert(PeerInfo::new(bob.key, vec![address]));
        resolver.insert(PeerInfo::new(ghost, vec!["mem:nowhere".into()]));

        let ctx = Context::background();
        alice.manager.get_connection(&ctx, &bob.key).await.unwrap();
        assert!(alice.manager.get_connection(&ctx, &ghost).await.is_err());
        assert!(alice.manager.dial_locks.is_empty());
    }

    #[tokio::test]
    async fn test_no_addresses() {
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let alice = peer(&network, &resolver);
        let stranger = Keypair::generate().public_key();

        let result = alice
            .manager
            .get_connection(&Context::background(), &stranger)
            .await;
        assert!(matches!(result, Err(ExchangeError::NoAddresses(_))));
    }

    #[tokio::test]
    async fn test_failed_dial_blocks_address() {
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let alice = peer(&network, &resolver);
        let ghost = Keypair::generate().public_key();
        resolver.insert(PeerInfo::new(ghost, vec!["mem:nowhere".into()]));

        let ctx = Context::background();
        let first = alice.manager.get_connection(&ctx, &ghost).await;
        assert!(matches!(first, Err(ExchangeError::AllAddressesFailed(_))));
        assert!(alice.manager.blocklist().is_blocked("mem:nowhere"));

        let second = alice.manager.get_connection(&ctx, &ghost).await;
        assert!(matches!(second, Err(ExchangeError::AllAddressesBlocked(_))));

        let metrics = alice.manager.metrics().snapshot();
        assert_eq!(metrics.dial_attempts, 1);
        assert_eq!(metrics.blocked_skips, 1);
    }

    #[tokio::test]
    async fn test_wrong_key_at_address_fails() {
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let alice = peer(&network, &resolver);
        let bob = peer(&network, &resolver);
        let claimed = Keypair::generate().public_key();

        let address = serve(&bob, "bob").await;
        let result = alice
            .manager
            .dial_address(&Context::background(), &address, Some(&claimed))
            .await;
        assert!(matches!(result, Err(ExchangeError::PeerKeyMismatch { .. })));
    }

    #[tokio::test]
    async fn test_send_to_self_is_rejected() {
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let alice = peer(&network, &resolver);
        let result = alice
            .manager
            .get_connection(&Context::background(), &alice.key)
            .await;
        assert!(matches!(result, Err(ExchangeError::SendToSelf)));
    }

    #[tokio::test]
    async fn test_store_replaces_and_closes_old() {
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let alice = peer(&network, &resolver);
        let bob = peer(&network, &resolver);
        let address = serve(&bob, "bob").await;

        let ctx = Context::background();
        let first = alice.manager.dial_address(&ctx, &address, None).await.unwrap();
        let second = alice.manager.dial_address(&ctx, &address, None).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_closed());
        assert!(Arc::ptr_eq(&alice.manager.connection(&bob.key).unwrap(), &second));
        assert!(Arc::ptr_eq(
            &alice.manager.find_by_address(&address).unwrap(),
            &second
        ));
    }

    #[tokio::test]
    async fn test_close_all() {
        let network = MemoryNetwork::new();
        let resolver = Arc::new(StaticResolver::new());
        let alice = peer(&network, &resolver);
        let bob = peer(&network, &resolver);
        let address = serve(&bob, "bob").await;

        let conn = alice
            .manager
            .dial_address(&Context::background(), &address, None)
            .await
            .unwrap();
        alice.manager.close_all();
        assert!(conn.is_closed());
        assert!(alice.manager.connected_peers().is_empty());
    }

    #[test]
    fn test_relay_addresses_are_not_dialable() {
        assert!(is_relay_address("relay:abc"));
        assert!(!is_relay_address("mem:relay"));
    }
}
