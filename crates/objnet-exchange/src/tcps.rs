//! `tcps:` transport: TLS 1.3 over TCP.
//!
//! Each transport instance carries an ephemeral self-signed certificate. TLS
//! only provides confidentiality here; the handshake on top authenticates the
//! peer keys, so the client accepts any server certificate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Result, TransportError};
use crate::transport::{BoxedStream, Listener, Transport};

pub const TCPS_SCHEME: &str = "tcps";

/// Name baked into the self-signed certificate and sent as SNI.
const SERVER_NAME: &str = "objnet";

/// Upper bound on the server side of the TLS handshake.
const TLS_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

const BACKLOG: usize = 64;

fn tls_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Tls(e.to_string())
}

/// TLS-over-TCP transport.
#[derive(Clone)]
pub struct TcpsTransport {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
}

impl TcpsTransport {
    /// Create a transport with a fresh self-signed certificate.
    pub fn new() -> std::result::Result<Self, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let certified = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])
            .map_err(tls_error)?;
        let cert: CertificateDer<'static> = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));

        let server_config = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(tls_error)?
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .map_err(tls_error)?;

        let client_config = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(tls_error)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            .with_no_client_auth();

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
            connector: TlsConnector::from(Arc::new(client_config)),
        })
    }
}

#[async_trait]
impl Transport for TcpsTransport {
    fn scheme(&self) -> &str {
        TCPS_SCHEME
    }

    async fn dial(&self, ctx: &Context, target: &str) -> Result<BoxedStream> {
        let tcp = ctx
            .run(TcpStream::connect(target))
            .await?
            .map_err(TransportError::Io)?;
        tcp.set_nodelay(true).map_err(TransportError::Io)?;

        let server_name = ServerName::try_from(SERVER_NAME).map_err(tls_error)?;
        let tls = ctx
            .run(self.connector.connect(server_name, tcp))
            .await?
            .map_err(TransportError::Io)?;
        Ok(Box::new(tls))
    }

    async fn listen(&self, ctx: &Context, target: &str) -> Result<Box<dyn Listener>> {
        let listener = ctx
            .run(TcpListener::bind(target))
            .await?
            .map_err(TransportError::Io)?;
        let local = listener.local_addr().map_err(TransportError::Io)?;

        let (tx, rx) = mpsc::channel(BACKLOG);
        let acceptor = self.acceptor.clone();
        let task = tokio::spawn(accept_loop(listener, acceptor, tx));

        Ok(Box::new(TcpsListener {
            local,
            incoming: rx,
            task,
        }))
    }
}

type Inbound = (BoxedStream, String);

async fn accept_loop(listener: TcpListener, acceptor: TlsAcceptor, tx: mpsc::Sender<Inbound>) {
    loop {
        let (tcp, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "tcp accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        if tx.is_closed() {
            return;
        }

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let _ = tcp.set_nodelay(true);
            match tokio::time::timeout(TLS_ACCEPT_TIMEOUT, acceptor.accept(tcp)).await {
                Ok(Ok(tls)) => {
                    let stream: BoxedStream = Box::new(tls);
                    let _ = tx.send((stream, format!("{}:{}", TCPS_SCHEME, remote))).await;
                }
                Ok(Err(e)) => debug!(address = %remote, error = %e, "tls accept failed"),
                Err(_) => debug!(address = %remote, "tls accept timed out"),
            }
        });
    }
}

/// A bound TCP listener. Dropping it stops the accept loop.
pub struct TcpsListener {
    local: SocketAddr,
    incoming: mpsc::Receiver<Inbound>,
    task: JoinHandle<()>,
}

#[async_trait]
impl Listener for TcpsListener {
    fn local_address(&self) -> String {
        format!("{}:{}", TCPS_SCHEME, self.local)
    }

    async fn accept(&mut self) -> std::result::Result<(BoxedStream, String), TransportError> {
        self.incoming
            .recv()
            .await
            .ok_or(TransportError::ListenerClosed)
    }
}

impl Drop for TcpsListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
