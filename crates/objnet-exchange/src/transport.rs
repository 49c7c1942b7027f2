//! Transport abstraction.
//!
//! A transport turns a scheme-specific target into a bidirectional byte
//! stream, and listens for inbound streams. Framing, authentication and peer
//! identity all live above this layer.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::context::Context;
use crate::error::{Result, TransportError};

/// A bidirectional byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Transport trait for dialing and listening on one address scheme.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// The address scheme this transport serves, e.g. `tcps`.
    fn scheme(&self) -> &str;

    /// Open a stream to `target` (the address without its scheme).
    async fn dial(&self, ctx: &Context, target: &str) -> Result<BoxedStream>;

    /// Start listening on `target`.
    async fn listen(&self, ctx: &Context, target: &str) -> Result<Box<dyn Listener>>;
}

/// A bound listener. Dropping it stops listening.
#[async_trait]
pub trait Listener: Send {
    /// The full address (with scheme) peers can dial.
    fn local_address(&self) -> String;

    /// Wait for the next inbound stream and the remote's address.
    async fn accept(&mut self) -> std::result::Result<(BoxedStream, String), TransportError>;
}

/// An in-process transport for testing.
///
/// Listeners register a name on a shared [`MemoryNetwork`]; dialing a name
/// hands the listener one end of a duplex pipe.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    pub const MEMORY_SCHEME: &str = "mem";

    /// Buffer size of each direction of a memory pipe.
    const PIPE_CAPACITY: usize = 64 * 1024;

    /// Pending inbound streams per listener.
    const BACKLOG: usize = 64;

    type Inbound = (DuplexStream, String);

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        listeners: Mutex<HashMap<String, mpsc::Sender<Inbound>>>,
        next_id: AtomicU64,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Whether something is listening on `name`.
        pub fn is_listening(&self, name: &str) -> bool {
            self.listeners.lock().contains_key(name)
        }

        fn next_name(&self, prefix: &str) -> String {
            format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
        }
    }

    /// In-memory transport implementation.
    #[derive(Clone)]
    pub struct MemoryTransport {
        network: Arc<MemoryNetwork>,
    }

    impl MemoryTransport {
        pub fn new(network: Arc<MemoryNetwork>) -> Self {
            Self { network }
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        fn scheme(&self) -> &str {
            MEMORY_SCHEME
        }

        async fn dial(&self, ctx: &Context, target: &str) -> Result<BoxedStream> {
            let sender = self
                .network
                .listeners
                .lock()
                .get(target)
                .cloned()
                .ok_or_else(|| TransportError::NoListener(format!("{}:{}", MEMORY_SCHEME, target)))?;

            let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
            let remote_address = format!("{}:{}", MEMORY_SCHEME, self.network.next_name("dialer"));
            ctx.run(sender.send((remote, remote_address)))
                .await?
                .map_err(|_| TransportError::NoListener(format!("{}:{}", MEMORY_SCHEME, target)))?;
            Ok(Box::new(local))
        }

        async fn listen(&self, _ctx: &Context, target: &str) -> Result<Box<dyn Listener>> {
            let name = if target == "*" {
                self.network.next_name("anon")
            } else {
                target.to_string()
            };

            let (tx, rx) = mpsc::channel(BACKLOG);
            {
                let mut listeners = self.network.listeners.lock();
                if listeners.contains_key(&name) {
                    return Err(TransportError::AddressInUse(format!(
                        "{}:{}",
                        MEMORY_SCHEME, name
                    ))
                    .into());
                }
                listeners.insert(name.clone(), tx);
            }

            Ok(Box::new(MemoryListener {
                name,
                incoming: rx,
                network: Arc::clone(&self.network),
            }))
        }
    }

    /// A listener registered on a memory network. Unregisters on drop.
    pub struct MemoryListener {
        name: String,
        incoming: mpsc::Receiver<Inbound>,
        network: Arc<MemoryNetwork>,
    }

    #[async_trait]
    impl Listener for MemoryListener {
        fn local_address(&self) -> String {
            format!("{}:{}", MEMORY_SCHEME, self.name)
        }

        async fn accept(&mut self) -> std::result::Result<(BoxedStream, String), TransportError> {
            match self.incoming.recv().await {
                Some((stream, remote)) => Ok((Box::new(stream), remote)),
                None => Err(TransportError::ListenerClosed),
            }
        }
    }

    impl Drop for MemoryListener {
        fn drop(&mut self) {
            self.network.listeners.lock().remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryNetwork, MemoryTransport};
    use super::*;
    use crate::error::ExchangeError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_memory_transport_dial_accept() {
        let network = MemoryNetwork::new();
        let transport = MemoryTransport::new(network.clone());
        let ctx = Context::background();

        let mut listener = transport.listen(&ctx, "bob").await.unwrap();
        assert_eq!(listener.local_address(), "mem:bob");

        let mut client = transport.dial(&ctx, "bob").await.unwrap();
        let (mut server, remote) = listener.accept().await.unwrap();
        assert!(remote.starts_with("mem:dialer-"));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_memory_transport_no_listener() {
        let transport = MemoryTransport::new(MemoryNetwork::new());
        let result = transport.dial(&Context::background(), "nobody").await;
        assert!(matches!(
            result,
            Err(ExchangeError::Transport(TransportError::NoListener(_)))
        ));
    }

    #[tokio::test]
    async fn test_memory_listener_unregisters_on_drop() {
        let network = MemoryNetwork::new();
        let transport = MemoryTransport::new(network.clone());
        let ctx = Context::background();

        let listener = transport.listen(&ctx, "carol").await.unwrap();
        assert!(network.is_listening("carol"));
        assert!(transport.listen(&ctx, "carol").await.is_err());

        drop(listener);
        assert!(!network.is_listening("carol"));
        assert!(transport.listen(&ctx, "carol").await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_listener_wildcard_name() {
        let transport = MemoryTransport::new(MemoryNetwork::new());
        let listener = transport.listen(&Context::background(), "*").await.unwrap();
        assert!(listener.local_address().starts_with("mem:anon-"));
    }
}
