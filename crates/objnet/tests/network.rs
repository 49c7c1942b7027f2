//! End-to-end scenarios over the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use objnet::exchange::{Address, ExchangeError, MemoryNetwork, StaticResolver};
use objnet::{Context, Envelope, Keypair, Node, NodeConfig, NodeError, Object, SendOptions, Subscription};
use objnet_testkit::TestFixture;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Net {
    network: Arc<MemoryNetwork>,
    resolver: Arc<StaticResolver>,
}

impl Net {
    fn new() -> Self {
        init_tracing();
        Self {
            network: MemoryNetwork::new(),
            resolver: Arc::new(StaticResolver::new()),
        }
    }

    fn node(&self) -> Node {
        Node::new(
            Keypair::generate(),
            NodeConfig::memory(&self.network, &self.resolver),
        )
        .unwrap()
    }

    async fn listening(&self, name: &str) -> Node {
        let node = self.node();
        node.listen(&Context::background(), &format!("mem:{}", name))
            .await
            .unwrap();
        node
    }
}

fn collect(node: &Node, pattern: &str) -> (Subscription, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(16);
    let subscription = node
        .handle(pattern, move |envelope: Envelope| {
            let tx = tx.clone();
            async move {
                tx.send(envelope).await?;
                anyhow::Ok(())
            }
        })
        .unwrap();
    (subscription, rx)
}

#[tokio::test]
async fn a_sends_test_msg_to_b() {
    let net = Net::new();
    let a = net.listening("a").await;
    let b = net.listening("b").await;
    let (_sub, mut inbox) = collect(&b, "test/msg");

    let message = Object::new("test/msg").with_field("body", "hello from a");
    a.send(&Context::background(), message, &b.peer_address(), SendOptions::new())
        .await
        .unwrap();

    let envelope = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.sender, a.public_key());
    assert_eq!(
        envelope.object.data.get("body").and_then(|v| v.as_str()),
        Some("hello from a")
    );
    assert_eq!(a.metrics().objects_sent, 1);
    assert_eq!(b.metrics().objects_received, 1);
}

#[tokio::test]
async fn relay_reaches_peer_without_listener() {
    let net = Net::new();
    let a = net.listening("a").await;
    let relay = net.listening("relay").await;

    // B never listens; it keeps an outbound connection to the relay.
    let b = net.node();
    b.exchange()
        .manager()
        .get_connection(&Context::background(), &relay.public_key())
        .await
        .unwrap();
    b.add_relay(relay.public_key());
    let (_sub, mut inbox) = collect(&b, "test/msg");

    let message = Object::new("test/msg").with_field("body", "through the relay");
    a.send(&Context::background(), message, &b.peer_address(), SendOptions::new())
        .await
        .unwrap();

    let envelope = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.sender, a.public_key());
    assert_eq!(envelope.via, Some(relay.public_key()));
    assert_eq!(a.metrics().relay_sends, 1);
}

#[tokio::test]
async fn relay_fallback_after_direct_failure() {
    let net = Net::new();
    let a = net.listening("a").await;
    let relay = net.listening("relay").await;
    let b = net.node();
    b.exchange()
        .manager()
        .get_connection(&Context::background(), &relay.public_key())
        .await
        .unwrap();
    let (_sub, mut inbox) = collect(&b, "test/msg");

    // A stale direct address is tried first and fails.
    net.resolver.insert(objnet::exchange::PeerInfo::new(
        b.public_key(),
        vec!["mem:stale".into(), Address::relay(&relay.public_key())],
    ));

    a.send(
        &Context::background(),
        Object::new("test/msg"),
        &b.peer_address(),
        SendOptions::new(),
    )
    .await
    .unwrap();

    timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    let metrics = a.metrics();
    assert_eq!(metrics.dial_failures, 1);
    assert_eq!(metrics.relay_sends, 1);
    assert!(a.exchange().manager().blocklist().is_blocked("mem:stale"));
}

#[tokio::test]
async fn connection_is_reused() {
    let net = Net::new();
    let a = net.listening("a").await;
    let b = net.listening("b").await;
    let (_sub, mut inbox) = collect(&b, "test/*");
    let ctx = Context::background();

    a.send(&ctx, Object::new("test/one"), &b.peer_address(), SendOptions::new())
        .await
        .unwrap();
    let first = a.exchange().manager().connection(&b.public_key()).unwrap();

    a.send(&ctx, Object::new("test/two"), &b.peer_address(), SendOptions::new())
        .await
        .unwrap();
    let second = a.exchange().manager().connection(&b.public_key()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(a.metrics().dial_attempts, 1);

    let mut types = Vec::new();
    for _ in 0..2 {
        let envelope = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
        types.push(envelope.object.object_type);
    }
    types.sort();
    assert_eq!(types, vec!["test/one".to_string(), "test/two".to_string()]);
}

#[tokio::test]
async fn publish_then_fetch() {
    let net = Net::new();
    let a = net.listening("a").await;
    let b = net.listening("b").await;
    let c = net.listening("c").await;
    let (_sub, mut inbox) = collect(&b, "test/doc");

    let ctx = Context::background().with_timeout(WAIT);
    let doc = Object::new("test/doc").with_field("title", "shared");
    let hash = a.publish(&ctx, doc, &b.peer_address()).await.unwrap();

    let envelope = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.object.hash(), hash);
    assert_eq!(envelope.object.metadata.owner, Some(a.public_key()));

    let fetched = c.fetch(&ctx, hash, &a.peer_address()).await.unwrap();
    assert_eq!(fetched.hash(), hash);
    assert!(objnet::core::verify(&fetched).is_ok());
    assert_eq!(c.store().get(&hash).await.unwrap().hash(), hash);
}

#[tokio::test]
async fn fetch_through_relay() {
    let net = Net::new();
    let a = net.listening("a").await;
    let relay = net.listening("relay").await;

    // B is reachable only through the relay.
    let b = net.node();
    b.exchange()
        .manager()
        .get_connection(&Context::background(), &relay.public_key())
        .await
        .unwrap();
    b.add_relay(relay.public_key());
    let (_sub, mut seen_by_b) = collect(&b, "**");

    let doc = Object::new("test/doc").with_field("title", "behind a relay");
    let hash = b.store().put(&doc).await.unwrap();

    let ctx = Context::background().with_timeout(WAIT);
    let fetched = a.fetch(&ctx, hash, &b.peer_address()).await.unwrap();
    assert_eq!(fetched.hash(), hash);
    assert_eq!(a.store().get(&hash).await.unwrap().hash(), hash);
    assert_eq!(a.metrics().relay_sends, 1);
    assert!(seen_by_b.try_recv().is_err());
}

#[tokio::test]
async fn publish_rejects_foreign_owner() {
    let net = Net::new();
    let a = net.listening("a").await;
    let b = net.listening("b").await;
    let other = TestFixture::new();

    let result = a
        .publish(
            &Context::background(),
            other.make_message("not mine"),
            &b.peer_address(),
        )
        .await;
    assert!(matches!(result, Err(NodeError::NotOwner(_))));
}

#[tokio::test]
async fn cancelled_subscription_receives_nothing() {
    let net = Net::new();
    let a = net.listening("a").await;
    let b = net.listening("b").await;
    let (cancelled, mut dead) = collect(&b, "test/msg");
    let (_live, mut live) = collect(&b, "test/msg");
    cancelled.cancel();

    a.send(
        &Context::background(),
        Object::new("test/msg"),
        &b.peer_address(),
        SendOptions::new(),
    )
    .await
    .unwrap();

    timeout(WAIT, live.recv()).await.unwrap().unwrap();
    assert!(dead.try_recv().is_err());
}

#[tokio::test]
async fn unreachable_peer_backs_off() {
    let net = Net::new();
    let a = net.listening("a").await;
    let ghost = Keypair::generate().public_key();
    net.resolver.insert(objnet::exchange::PeerInfo::new(
        ghost,
        vec!["mem:nowhere".into()],
    ));
    let target = Address::peer(&ghost);
    let ctx = Context::background();

    let first = a
        .send(&ctx, Object::new("test/msg"), &target, SendOptions::new())
        .await;
    assert!(matches!(
        first,
        Err(NodeError::Exchange(ExchangeError::AllAddressesFailed(_)))
    ));

    let second = a
        .send(&ctx, Object::new("test/msg"), &target, SendOptions::new())
        .await;
    assert!(matches!(
        second,
        Err(NodeError::Exchange(ExchangeError::AllAddressesBlocked(_)))
    ));

    let blocklist = a.exchange().manager().blocklist();
    assert_eq!(blocklist.attempts("mem:nowhere"), 1);
    assert_eq!(blocklist.config().ttl_for(2), blocklist.config().ttl_for(1) * 2);
    assert_eq!(a.metrics().blocked_skips, 1);
}

#[tokio::test]
async fn unknown_peer_has_no_addresses() {
    let net = Net::new();
    let a = net.listening("a").await;
    let stranger = Keypair::generate().public_key();

    let result = a
        .send(
            &Context::background(),
            Object::new("test/msg"),
            &Address::peer(&stranger),
            SendOptions::new(),
        )
        .await;
    assert!(matches!(
        result,
        Err(NodeError::Exchange(ExchangeError::NoAddresses(_)))
    ));
}

#[tokio::test]
async fn cancelled_send_does_not_dial() {
    let net = Net::new();
    let a = net.listening("a").await;
    let b = net.listening("b").await;
    let ctx = Context::background();
    ctx.cancel();

    let result = a
        .send(&ctx, Object::new("test/msg"), &b.peer_address(), SendOptions::new())
        .await;
    assert!(matches!(
        result,
        Err(NodeError::Exchange(ExchangeError::Cancelled))
    ));
    assert_eq!(a.metrics().dial_attempts, 0);
}
