//! Three-way mutual authentication handshake.
//!
//! The accepting side opens with a signed `Syn` carrying a fresh nonce. The
//! dialing side answers with a signed `SynAck` echoing it, and the accepting
//! side closes with a signed `Ack` echoing it again. Each side learns the
//! other's key from the signatures; the nonce binds the replies to this
//! connection.
//!
//! ```text
//!   accepting (incoming)            dialing (outgoing)
//!   Start                           Start
//!   SynSent      ── Syn{n} ──▶      SynWait
//!   SynAckWait   ◀─ SynAck{n} ──    SynAckSent
//!   AckSent      ── Ack{n} ──▶      AckWait
//!   Established                     Established
//! ```
//!
//! Any failure is terminal: the connection is dropped, never retried.

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use objnet_core::{sign, verify, Keypair, Object, PublicKey};
use tracing::debug;

use crate::context::Context;
use crate::error::{ExchangeError, HandshakeError};
use crate::messages::{random_nonce, Ack, Message, Syn, SynAck};
use crate::wire::FramedStream;

/// Default per-step timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    SynSent,
    SynWait,
    SynAckWait,
    SynAckSent,
    AckSent,
    AckWait,
    Established,
    Failed,
}

/// One run of the handshake over a framed stream.
pub struct Handshake<'a> {
    keypair: &'a Keypair,
    step_timeout: Duration,
    state: HandshakeState,
}

impl<'a> Handshake<'a> {
    pub fn new(keypair: &'a Keypair, step_timeout: Duration) -> Self {
        Self {
            keypair,
            step_timeout,
            state: HandshakeState::Start,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the accepting side. Returns the authenticated remote key.
    pub async fn incoming(
        &mut self,
        ctx: &Context,
        stream: &mut FramedStream,
    ) -> Result<PublicKey, HandshakeError> {
        let result = self.run_incoming(ctx, stream).await;
        self.finish(result)
    }

    /// Run the dialing side. Returns the authenticated remote key.
    pub async fn outgoing(
        &mut self,
        ctx: &Context,
        stream: &mut FramedStream,
    ) -> Result<PublicKey, HandshakeError> {
        let result = self.run_outgoing(ctx, stream).await;
        self.finish(result)
    }

    fn finish(
        &mut self,
        result: Result<PublicKey, HandshakeError>,
    ) -> Result<PublicKey, HandshakeError> {
        match &result {
            Ok(remote) => {
                self.state = HandshakeState::Established;
                debug!(peer = %remote, "handshake established");
            }
            Err(e) => {
                debug!(state = ?self.state, error = %e, "handshake failed");
                self.state = HandshakeState::Failed;
            }
        }
        result
    }

    async fn run_incoming(
        &mut self,
        ctx: &Context,
        stream: &mut FramedStream,
    ) -> Result<PublicKey, HandshakeError> {
        // 1. Open with a fresh nonce.
        let nonce = random_nonce();
        self.write(ctx, stream, &Syn { nonce: nonce.clone() }).await?;
        self.state = HandshakeState::SynSent;

        // 2. The reply must echo the nonce; its signer is the remote peer.
        self.state = HandshakeState::SynAckWait;
        let (syn_ack, remote): (SynAck, _) = self.read(ctx, stream).await?;
        if syn_ack.nonce != nonce {
            return Err(HandshakeError::NonceMismatch);
        }

        // 3. Confirm.
        self.write(ctx, stream, &Ack { nonce }).await?;
        self.state = HandshakeState::AckSent;
        Ok(remote)
    }

    async fn run_outgoing(
        &mut self,
        ctx: &Context,
        stream: &mut FramedStream,
    ) -> Result<PublicKey, HandshakeError> {
        // 1. Wait for the opening nonce.
        self.state = HandshakeState::SynWait;
        let (syn, remote): (Syn, _) = self.read(ctx, stream).await?;

        // 2. Echo it back.
        self.write(ctx, stream, &SynAck { nonce: syn.nonce.clone() }).await?;
        self.state = HandshakeState::SynAckSent;

        // 3. The confirmation must come from the same peer with the same nonce.
        self.state = HandshakeState::AckWait;
        let (ack, signer): (Ack, _) = self.read(ctx, stream).await?;
        if ack.nonce != syn.nonce {
            return Err(HandshakeError::NonceMismatch);
        }
        if signer != remote {
            return Err(HandshakeError::SignerChanged);
        }
        Ok(remote)
    }

    async fn write<M: Message>(
        &self,
        ctx: &Context,
        stream: &mut FramedStream,
        message: &M,
    ) -> Result<(), HandshakeError> {
        let mut object = message.to_object();
        sign(self.keypair, &mut object).map_err(HandshakeError::Malformed)?;
        self.step(ctx, stream.send(object)).await??;
        Ok(())
    }

    async fn read<M: Message>(
        &self,
        ctx: &Context,
        stream: &mut FramedStream,
    ) -> Result<(M, PublicKey), HandshakeError> {
        let object: Object = self
            .step(ctx, stream.next())
            .await?
            .ok_or(HandshakeError::ConnectionClosed)??;

        if object.object_type != M::TYPE {
            return Err(HandshakeError::UnexpectedMessage {
                expected: M::TYPE,
                got: object.object_type,
            });
        }
        verify(&object).map_err(HandshakeError::InvalidSignature)?;
        let signer = object
            .metadata
            .signature
            .as_ref()
            .map(|s| s.signer)
            .ok_or(HandshakeError::InvalidSignature(
                objnet_core::CoreError::MissingSignature,
            ))?;
        let message = M::from_object(&object).map_err(HandshakeError::Malformed)?;
        Ok((message, signer))
    }

    /// Bound one step by the context and the per-step timeout.
    async fn step<F, T>(&self, ctx: &Context, fut: F) -> Result<T, HandshakeError>
    where
        F: Future<Output = T>,
    {
        match ctx.run(tokio::time::timeout(self.step_timeout, fut)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_elapsed)) => Err(HandshakeError::Timeout),
            Err(ExchangeError::Timeout) => Err(HandshakeError::Timeout),
            Err(_) => Err(HandshakeError::Cancelled),
        }
    }
}
