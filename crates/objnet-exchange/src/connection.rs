//! An authenticated connection to one peer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use objnet_core::{Object, PublicKey};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{ExchangeError, Result};
use crate::wire::FramedStream;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The read half of a connection, drained by the manager's read loop.
pub type ConnectionReader = SplitStream<FramedStream>;

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A live, authenticated connection.
///
/// Writes are serialized through a FIFO async mutex, so objects are sent in
/// the order `write` was called.
pub struct Connection {
    id: u64,
    remote_key: PublicKey,
    address: String,
    direction: Direction,
    writer: Mutex<SplitSink<FramedStream, Object>>,
    closed: CancellationToken,
}

impl Connection {
    /// Wrap an authenticated framed stream. Returns the connection and its
    /// read half.
    pub fn new(
        stream: FramedStream,
        remote_key: PublicKey,
        address: String,
        direction: Direction,
    ) -> (Arc<Self>, ConnectionReader) {
        let (writer, reader) = stream.split();
        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_key,
            address,
            direction,
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
        });
        (connection, reader)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The key the handshake authenticated.
    pub fn remote_key(&self) -> &PublicKey {
        &self.remote_key
    }

    /// The transport address of the remote end.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Send one object. A failed write closes the connection.
    pub async fn write(&self, ctx: &Context, object: Object) -> Result<()> {
        if self.is_closed() {
            return Err(ExchangeError::ConnectionClosed);
        }
        let mut writer = ctx.run(self.writer.lock()).await?;
        if self.is_closed() {
            return Err(ExchangeError::ConnectionClosed);
        }
        match ctx.run(writer.send(object)).await? {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close();
                Err(e.into())
            }
        }
    }

    /// Mark the connection closed. The read loop stops and the manager drops it.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_key", &self.remote_key)
            .field("address", &self.address)
            .field("direction", &self.direction)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An object read from a connection.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub connection: Arc<Connection>,
    pub object: Object,
}
