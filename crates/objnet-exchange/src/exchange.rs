//! The exchange: sending, receiving and dispatching signed objects.
//!
//! ## Send
//!
//! 1. Refuse to send to ourselves.
//! 2. Stamp the request id (if any) into `_requestID` and sign unsigned objects.
//! 3. `peer:` addresses go through the connection manager. If direct delivery
//!    fails the object is wrapped in a signed forward request and handed to one
//!    of the peer's `relay:` entries, connected relays first.
//! 4. Transport addresses are dialed directly, without relay fallback.
//!
//! ## Receive
//!
//! Read loops feed a single processing task. It verifies signatures, serves
//! object requests from the store, forwards or unwraps forward requests,
//! completes pending responses by request id, and fans everything else out
//! to matching handlers, each in its own task.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use objnet_core::{sign, verify, CoreError, Digest, Object, PublicKey};
use objnet_store::{ObjectStore, StoreError};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::address::Address;
use crate::backoff::{BackoffConfig, MetricsSnapshot};
use crate::connection::{Connection, Inbound};
use crate::context::Context;
use crate::error::{ExchangeError, Result, TransportError};
use crate::handshake::DEFAULT_STEP_TIMEOUT;
use crate::keychain::Keychain;
use crate::manager::{ConnectionConfig, ConnectionManager};
use crate::messages::{
    Message, ObjectForwardRequest, ObjectRequest, TYPE_ACK, TYPE_OBJECT_FORWARD,
    TYPE_OBJECT_REQUEST, TYPE_SYN, TYPE_SYN_ACK,
};
use crate::pattern::TypePattern;
use crate::resolver::{LookupCriteria, Resolver};
use crate::transport::Transport;
use crate::wire::DEFAULT_MAX_FRAME_SIZE;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for an [`Exchange`].
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Objects buffered between the read loops and the processing task.
    pub inbox_capacity: usize,
    /// Verify signatures on inbound objects that carry one.
    pub verify_signatures: bool,
    /// Drop inbound objects without a signature.
    pub require_signatures: bool,
    /// Sign outbound objects that are not yet signed.
    pub sign_outbound: bool,
    /// Timeout for each handshake step.
    pub handshake_timeout: Duration,
    /// Timeout for opening a transport stream. Also bounds relay forwarding
    /// and object serving.
    pub dial_timeout: Duration,
    /// Largest frame accepted or sent.
    pub max_frame_size: usize,
    pub backoff: BackoffConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 256,
            verify_signatures: true,
            require_signatures: false,
            sign_outbound: true,
            handshake_timeout: DEFAULT_STEP_TIMEOUT,
            dial_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ExchangeConfig {
    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout: self.handshake_timeout,
            dial_timeout: self.dial_timeout,
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Per-send options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    request_id: Option<String>,
    expect_response: bool,
    no_relay: bool,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for a response correlated by request id. A fresh id is generated
    /// when none is given.
    pub fn with_response(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self.expect_response = true;
        self
    }

    /// Mark the object as the response to `request_id`.
    pub fn as_response(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self.expect_response = false;
        self
    }

    /// Do not fall back to relays when direct delivery fails.
    pub fn no_relay(mut self) -> Self {
        self.no_relay = true;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelopes and handlers
// ─────────────────────────────────────────────────────────────────────────────

/// An inbound object as seen by handlers and response waiters.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The signer of a relayed object, otherwise the authenticated peer on
    /// the connection.
    pub sender: PublicKey,
    /// The relay that delivered the object, if it was forwarded.
    pub via: Option<PublicKey>,
    pub request_id: Option<String>,
    pub object: Object,
}

impl Envelope {
    fn new(sender: PublicKey, via: Option<PublicKey>, object: Object) -> Self {
        Self {
            sender,
            via,
            request_id: object.request_id().map(str::to_string),
            object,
        }
    }

    /// The `peer:` address to send a reply to.
    pub fn reply_address(&self) -> String {
        Address::peer(&self.sender)
    }
}

/// Handles inbound objects matching a registered pattern.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        (self)(envelope).await
    }
}

struct Registration {
    pattern: TypePattern,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
struct Handlers {
    next_id: AtomicU64,
    entries: RwLock<BTreeMap<u64, Registration>>,
}

impl Handlers {
    fn insert(&self, pattern: TypePattern, handler: Arc<dyn Handler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .insert(id, Registration { pattern, handler });
        id
    }

    fn matching(&self, object_type: &str) -> Vec<(TypePattern, Arc<dyn Handler>)> {
        self.entries
            .read()
            .values()
            .filter(|r| r.pattern.matches(object_type))
            .map(|r| (r.pattern.clone(), Arc::clone(&r.handler)))
            .collect()
    }
}

/// A handler registration. Cancelling it stops further deliveries.
pub struct Subscription {
    id: u64,
    pattern: TypePattern,
    handlers: Weak<Handlers>,
}

impl Subscription {
    pub fn pattern(&self) -> &TypePattern {
        &self.pattern
    }

    pub fn cancel(self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.entries.write().remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending responses
// ─────────────────────────────────────────────────────────────────────────────

type PendingMap = DashMap<String, oneshot::Sender<Envelope>>;

/// A registered wait for the response to a sent object.
///
/// The correlation entry is removed when the response arrives, when the
/// send context is done, or when this is dropped.
pub struct PendingResponse {
    request_id: String,
    receiver: oneshot::Receiver<Envelope>,
    pending: Arc<PendingMap>,
    _watch: DropGuard,
}

impl PendingResponse {
    fn register(pending: &Arc<PendingMap>, ctx: &Context, request_id: String) -> Self {
        let (sender, receiver) = oneshot::channel();
        pending.insert(request_id.clone(), sender);

        // Drop the entry once the send context is done.
        let finished = CancellationToken::new();
        let watch = finished.clone();
        let ctx = ctx.clone();
        let map = Arc::clone(pending);
        let id = request_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ctx.done() => {
                    map.remove(&id);
                }
                _ = watch.cancelled() => {}
            }
        });

        Self {
            request_id,
            receiver,
            pending: Arc::clone(pending),
            _watch: finished.drop_guard(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the response.
    pub async fn recv(&mut self, ctx: &Context) -> Result<Envelope> {
        let result = ctx.run(&mut self.receiver).await;
        match result {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(ExchangeError::ResponseDropped),
            Err(e) => {
                self.pending.remove(&self.request_id);
                Err(e)
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("request_id", &self.request_id)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exchange
// ─────────────────────────────────────────────────────────────────────────────

/// Where the answer to an inbound object should go.
enum ReplyPath {
    /// Back on the connection the object arrived on.
    Connection(Arc<Connection>),
    /// The object was unwrapped from a forward request sent by this relay.
    Relayed(PublicKey),
}

impl ReplyPath {
    fn relay(&self) -> Option<PublicKey> {
        match self {
            ReplyPath::Connection(_) => None,
            ReplyPath::Relayed(relay) => Some(*relay),
        }
    }
}

/// Sends, receives and dispatches objects for one local peer.
pub struct Exchange {
    keychain: Keychain,
    store: Arc<dyn ObjectStore>,
    resolver: Arc<dyn Resolver>,
    manager: Arc<ConnectionManager>,
    config: ExchangeConfig,
    handlers: Arc<Handlers>,
    pending: Arc<PendingMap>,
    /// Cancelled on shutdown; parent of every background context.
    root: Context,
}

impl Exchange {
    /// Create an exchange and start its processing task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        keychain: Keychain,
        store: Arc<dyn ObjectStore>,
        resolver: Arc<dyn Resolver>,
        transports: Vec<Arc<dyn Transport>>,
        config: ExchangeConfig,
    ) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let manager = ConnectionManager::new(
            keychain.clone(),
            transports,
            Arc::clone(&resolver),
            config.connection_config(),
            config.backoff.clone(),
            inbox_tx,
        );
        let root = Context::background();
        let exchange = Arc::new(Self {
            keychain,
            store,
            resolver,
            manager,
            config,
            handlers: Arc::new(Handlers::default()),
            pending: Arc::new(DashMap::new()),
            root: root.clone(),
        });

        tokio::spawn(process_loop(Arc::downgrade(&exchange), inbox_rx, root));
        exchange
    }

    pub fn local_key(&self) -> PublicKey {
        self.keychain.public_key()
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.manager.metrics().snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.err().is_some()
    }

    /// Close all connections, stop listeners and drop handlers and pending
    /// responses.
    pub fn shutdown(&self) {
        info!(peer = %self.local_key(), "exchange shutting down");
        self.root.cancel();
        self.manager.close_all();
        self.handlers.entries.write().clear();
        self.pending.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listening
    // ─────────────────────────────────────────────────────────────────────────

    /// Listen on a transport address and return the bound address.
    ///
    /// The listener runs until `ctx` is done or the exchange shuts down.
    pub async fn listen(&self, ctx: &Context, address: &str) -> Result<String> {
        if self.is_shut_down() {
            return Err(ExchangeError::Shutdown);
        }
        let (scheme, target) = match Address::parse(address)? {
            Address::Transport { scheme, target } => (scheme, target),
            _ => return Err(ExchangeError::UnsupportedAddress(address.to_string())),
        };
        let transport = self
            .manager
            .transport(&scheme)
            .cloned()
            .ok_or_else(|| ExchangeError::UnsupportedAddress(address.to_string()))?;

        let mut listener = transport.listen(ctx, &target).await?;
        let local = listener.local_address();
        info!(address = %local, "listening");

        let manager = Arc::clone(&self.manager);
        let root = self.root.clone();
        let ctx = ctx.clone();
        let bound = local.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = ctx.done() => break,
                    _ = root.done() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, remote)) => {
                        let manager = Arc::clone(&manager);
                        let root = root.clone();
                        tokio::spawn(async move {
                            if let Err(e) = manager.accept(&root, stream, remote.clone()).await {
                                debug!(address = %remote, error = %e, "inbound connection rejected");
                            }
                        });
                    }
                    Err(TransportError::ListenerClosed) => break,
                    Err(e) => warn!(address = %bound, error = %e, "accept failed"),
                }
            }
            debug!(address = %bound, "listener stopped");
        });

        Ok(local)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Send an object to an address.
    ///
    /// Returns a [`PendingResponse`] when `options` asked for one.
    #[instrument(skip(self, ctx, object, options), fields(address = %address, object_type = %object.object_type))]
    pub async fn send(
        &self,
        ctx: &Context,
        mut object: Object,
        address: &str,
        options: SendOptions,
    ) -> Result<Option<PendingResponse>> {
        if self.is_shut_down() {
            return Err(ExchangeError::Shutdown);
        }
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let target = Address::parse(address)?;
        if let Address::Peer(key) = &target {
            if *key == self.local_key() {
                return Err(ExchangeError::SendToSelf);
            }
        }

        let request_id = match (options.request_id, options.expect_response) {
            (Some(id), _) => Some(id),
            (None, true) => Some(Uuid::new_v4().to_string()),
            (None, false) => None,
        };
        if let Some(id) = &request_id {
            object.set_request_id(id.as_str());
        }
        if self.config.sign_outbound && object.metadata.signature.is_none() {
            sign(self.keychain.primary_peer_key(), &mut object)?;
        }

        // Register before writing so a fast reply cannot be missed.
        let pending = match (&request_id, options.expect_response) {
            (Some(id), true) => Some(PendingResponse::register(&self.pending, ctx, id.clone())),
            _ => None,
        };

        match target {
            Address::Peer(key) => self.send_to_peer(ctx, &key, object, options.no_relay).await?,
            Address::Relay(_) => {
                return Err(ExchangeError::UnsupportedAddress(address.to_string()));
            }
            Address::Transport { .. } => self.send_direct(ctx, address, object).await?,
        }
        Ok(pending)
    }

    /// Ask a peer for the object stored under `hash`. The reply is
    /// dispatched to handlers like any other object.
    pub async fn request(&self, ctx: &Context, hash: Digest, address: &str) -> Result<()> {
        let request = ObjectRequest { object_hash: hash }.to_object();
        self.send(ctx, request, address, SendOptions::new()).await?;
        Ok(())
    }

    /// Ask a peer for the object stored under `hash` and wait for it.
    pub async fn request_object(&self, ctx: &Context, hash: Digest, address: &str) -> Result<Object> {
        let request = ObjectRequest { object_hash: hash }.to_object();
        let mut pending = self
            .send(ctx, request, address, SendOptions::new().with_response(None))
            .await?
            .ok_or(ExchangeError::ResponseDropped)?;
        let envelope = pending.recv(ctx).await?;

        let received = envelope.object.hash();
        if received != hash {
            return Err(CoreError::MalformedObject(format!(
                "requested {}, received {}",
                hash.to_hex(),
                received.to_hex()
            ))
            .into());
        }
        Ok(envelope.object)
    }

    async fn send_to_peer(
        &self,
        ctx: &Context,
        key: &PublicKey,
        object: Object,
        no_relay: bool,
    ) -> Result<()> {
        let direct = match self.manager.get_connection(ctx, key).await {
            Ok(conn) => self.write(ctx, &conn, object.clone()).await,
            Err(e) => Err(e),
        };
        let err = match direct {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        // No fallback once the caller has given up.
        if let Some(done) = ctx.err() {
            return Err(done);
        }
        if no_relay || matches!(err, ExchangeError::SendToSelf) {
            return Err(err);
        }

        debug!(peer = %key, error = %err, "direct delivery failed, trying relays");
        match self.send_via_relay(ctx, key, object).await {
            None => Err(err),
            Some(result) => result,
        }
    }

    /// Wrap `object` in a forward request and hand it to one of the peer's
    /// relays. `None` when the peer has no usable relays.
    async fn send_via_relay(
        &self,
        ctx: &Context,
        key: &PublicKey,
        object: Object,
    ) -> Option<Result<()>> {
        let local = self.local_key();
        let infos = match self
            .resolver
            .lookup(ctx, &LookupCriteria::PublicKey(*key))
            .await
        {
            Ok(infos) => infos,
            Err(e) => return Some(Err(e)),
        };

        let mut relays: Vec<PublicKey> = Vec::new();
        for info in infos.into_iter().filter(|info| info.public_key == *key) {
            for address in &info.addresses {
                if let Ok(Address::Relay(relay)) = Address::parse(address) {
                    if relay != local && relay != *key && !relays.contains(&relay) {
                        relays.push(relay);
                    }
                }
            }
        }
        if relays.is_empty() {
            return None;
        }
        // Relays we are already connected to go first.
        relays.sort_by_key(|relay| self.manager.connection(relay).is_none());

        let mut wrapper = ObjectForwardRequest {
            recipient: *key,
            object,
        }
        .to_object();
        if let Err(e) = sign(self.keychain.primary_peer_key(), &mut wrapper) {
            return Some(Err(e.into()));
        }

        for relay in relays {
            if let Some(done) = ctx.err() {
                return Some(Err(done));
            }
            let result = match self.manager.get_connection(ctx, &relay).await {
                Ok(conn) => self.write(ctx, &conn, wrapper.clone()).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    self.manager.metrics().relay_send();
                    info!(peer = %key, relay = %relay, "delivered via relay");
                    return Some(Ok(()));
                }
                Err(e) => warn!(peer = %key, relay = %relay, error = %e, "relay failed"),
            }
        }
        Some(Err(ExchangeError::AllAddressesFailed(Address::peer(key))))
    }

    async fn send_direct(&self, ctx: &Context, address: &str, object: Object) -> Result<()> {
        let conn = match self.manager.find_by_address(address) {
            Some(conn) => conn,
            None => self.manager.dial_address(ctx, address, None).await?,
        };
        self.write(ctx, &conn, object).await
    }

    async fn write(&self, ctx: &Context, conn: &Connection, object: Object) -> Result<()> {
        conn.write(ctx, object).await?;
        self.manager.metrics().object_sent();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handlers
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a handler for object types matching `pattern`.
    pub fn handle<H: Handler>(&self, pattern: &str, handler: H) -> Result<Subscription> {
        let pattern = TypePattern::new(pattern)?;
        let id = self.handlers.insert(pattern.clone(), Arc::new(handler));
        debug!(pattern = %pattern, id, "handler registered");
        Ok(Subscription {
            id,
            pattern,
            handlers: Arc::downgrade(&self.handlers),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receiving
    // ─────────────────────────────────────────────────────────────────────────

    fn check_signature(&self, object: &Object) -> std::result::Result<(), CoreError> {
        match &object.metadata.signature {
            Some(_) if self.config.verify_signatures => verify(object),
            Some(_) => Ok(()),
            None if self.config.require_signatures => Err(CoreError::MissingSignature),
            None => Ok(()),
        }
    }

    fn process(self: &Arc<Self>, inbound: Inbound) {
        let Inbound { connection, object } = inbound;
        let hop = *connection.remote_key();
        self.manager.metrics().object_received();

        if let Err(e) = self.check_signature(&object) {
            warn!(peer = %hop, object_type = %object.object_type, error = %e, "dropping object");
            return;
        }
        self.route(ReplyPath::Connection(connection), hop, object);
    }

    /// Act on a verified object according to its type. `sender` is the peer
    /// the object came from, after any relay unwrapping.
    fn route(self: &Arc<Self>, path: ReplyPath, sender: PublicKey, object: Object) {
        match object.object_type.as_str() {
            TYPE_OBJECT_REQUEST => {
                let exchange = Arc::clone(self);
                tokio::spawn(async move { exchange.serve_request(path, sender, object).await });
            }
            TYPE_OBJECT_FORWARD => self.process_forward(sender, object),
            TYPE_SYN | TYPE_SYN_ACK | TYPE_ACK => {
                debug!(peer = %sender, object_type = %object.object_type, "ignoring stray handshake message");
            }
            _ => self.deliver(Envelope::new(sender, path.relay(), object)),
        }
    }

    async fn serve_request(&self, path: ReplyPath, peer: PublicKey, object: Object) {
        let request = match ObjectRequest::from_object(&object) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %peer, error = %e, "malformed object request");
                return;
            }
        };

        let mut reply = match self.store.get(&request.object_hash).await {
            Ok(found) => found,
            Err(StoreError::NotFound(hash)) => {
                debug!(peer = %peer, hash = %hash, "requested object not found");
                return;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "object lookup failed");
                return;
            }
        };
        let request_id = object.request_id().map(str::to_string);
        if let Some(id) = &request_id {
            reply.set_request_id(id.as_str());
        }

        let ctx = self.root.with_timeout(self.config.dial_timeout);
        let result = match path {
            ReplyPath::Connection(connection) => self.write(&ctx, &connection, reply).await,
            // The hop is a relay; address the requester so the reply can
            // take its own route back.
            ReplyPath::Relayed(_) => {
                let options = match request_id {
                    Some(id) => SendOptions::new().as_response(id),
                    None => SendOptions::new(),
                };
                self.send(&ctx, reply, &Address::peer(&peer), options)
                    .await
                    .map(|_| ())
            }
        };
        match result {
            Ok(()) => debug!(peer = %peer, hash = %request.object_hash, "served object"),
            Err(e) => warn!(peer = %peer, error = %e, "failed to serve object"),
        }
    }

    fn process_forward(self: &Arc<Self>, hop: PublicKey, object: Object) {
        let forward = match ObjectForwardRequest::from_object(&object) {
            Ok(forward) => forward,
            Err(e) => {
                warn!(peer = %hop, error = %e, "malformed forward request");
                return;
            }
        };

        if forward.recipient == self.local_key() {
            let inner = forward.object;
            if let Err(e) = self.check_signature(&inner) {
                warn!(relay = %hop, object_type = %inner.object_type, error = %e, "dropping relayed object");
                return;
            }
            let sender = inner
                .metadata
                .signature
                .as_ref()
                .map_or(hop, |signature| signature.signer);
            debug!(relay = %hop, peer = %sender, object_type = %inner.object_type, "unwrapped relayed object");
            self.route(ReplyPath::Relayed(hop), sender, inner);
            return;
        }

        // Pass the request on unchanged; the recipient unwraps it.
        let exchange = Arc::clone(self);
        tokio::spawn(async move {
            let recipient = forward.recipient;
            let ctx = exchange.root.with_timeout(exchange.config.dial_timeout);
            let result = match exchange.manager.get_connection(&ctx, &recipient).await {
                Ok(conn) => exchange.write(&ctx, &conn, object).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!(from = %hop, to = %recipient, "forwarded object"),
                Err(e) => warn!(from = %hop, to = %recipient, error = %e, "forward failed"),
            }
        });
    }

    fn deliver(&self, envelope: Envelope) {
        if let Some(id) = envelope.request_id.clone() {
            if let Some((_, waiter)) = self.pending.remove(&id) {
                if waiter.send(envelope).is_err() {
                    debug!(request_id = %id, "response waiter already gone");
                }
                return;
            }
        }
        self.dispatch(envelope);
    }

    fn dispatch(&self, envelope: Envelope) {
        let matching = self.handlers.matching(&envelope.object.object_type);
        if matching.is_empty() {
            debug!(object_type = %envelope.object.object_type, peer = %envelope.sender, "no handler");
            return;
        }
        for (pattern, handler) in matching {
            let envelope = envelope.clone();
            tokio::spawn(async move {
                let object_type = envelope.object.object_type.clone();
                match AssertUnwindSafe(handler.handle(envelope)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(pattern = %pattern, object_type = %object_type, error = %e, "handler failed");
                    }
                    Err(_) => {
                        warn!(pattern = %pattern, object_type = %object_type, "handler panicked");
                    }
                }
            });
        }
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.root.cancel();
        self.manager.close_all();
    }
}

async fn process_loop(exchange: Weak<Exchange>, mut inbox: mpsc::Receiver<Inbound>, root: Context) {
    loop {
        let inbound = tokio::select! {
            _ = root.done() => break,
            inbound = inbox.recv() => match inbound {
                Some(inbound) => inbound,
                None => break,
            },
        };
        let Some(strong) = exchange.upgrade() else {
            break;
        };
        strong.process(inbound);
    }
    debug!("exchange processing stopped");
}
