//! TLS handshake against a candidate endpoint to capture its certificate chain.
//!
//! The client deliberately accepts whatever chain the server presents: trust
//! is decided per root program by the evaluator, so the handshake must not
//! reject an untrusted or expired chain before we get to see it. Handshake
//! signatures are still verified against the presented leaf key.

use crate::certificate::PeerCertificate;
use crate::url_policy::CandidateUrl;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Default bound on one fetch (DNS + connect + handshake).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-URL network faults. Never fatal to sibling URLs.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("connection to {host}:{port} failed: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS handshake with {host} failed: {reason}")]
    Handshake { host: String, reason: String },

    #[error("timed out after {}ms waiting for {host}", .elapsed.as_millis())]
    Timeout { host: String, elapsed: Duration },

    #[error("'{host}' cannot be used as a TLS server name: {reason}")]
    InvalidServerName { host: String, reason: String },
}

/// Anything that can produce a peer chain for a URL.
///
/// [`CertificateFetcher`] is the network implementation; tests substitute
/// canned chains.
pub trait CertificateSource: Send + Sync + 'static {
    fn fetch(
        &self,
        url: &CandidateUrl,
        timeout: Duration,
    ) -> impl Future<Output = Result<PeerCertificate, FetchError>> + Send;
}

/// Opens one TLS connection per call and returns the presented chain.
#[derive(Clone)]
pub struct CertificateFetcher {
    connector: TlsConnector,
}

impl std::fmt::Debug for CertificateFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateFetcher").finish_non_exhaustive()
    }
}

impl CertificateFetcher {
    /// Build a fetcher on the `ring` crypto provider.
    pub fn new() -> Result<Self, rustls::Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = Arc::new(CaptureChainVerifier {
            provider: provider.clone(),
        });
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    async fn handshake(&self, url: &CandidateUrl) -> Result<PeerCertificate, FetchError> {
        let host = url.host();
        let port = url.port();

        let server_name = ServerName::try_from(host.clone()).map_err(|e| {
            FetchError::InvalidServerName {
                host: host.clone(),
                reason: e.to_string(),
            }
        })?;

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| FetchError::Connection {
                host: host.clone(),
                port,
                reason: format!("DNS resolution failed: {}", e),
            })?
            .collect();

        let tcp = connect_any(&addrs)
            .await
            .map_err(|e| FetchError::Connection {
                host: host.clone(),
                port,
                reason: e.to_string(),
            })?;

        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| FetchError::Handshake {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        let (_, conn) = tls.get_ref();
        let chain: Vec<Vec<u8>> = conn
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
            .unwrap_or_default();
        if chain.is_empty() {
            return Err(FetchError::Handshake {
                host,
                reason: "server presented no certificates".into(),
            });
        }

        PeerCertificate::from_der_chain(host.clone(), chain).map_err(|e| FetchError::Handshake {
            host,
            reason: e.to_string(),
        })
        // `tls` is dropped here, closing the socket.
    }
}

/// Connect to each resolved address in turn and keep the first that answers.
/// The error is the last address's, or `NotFound` when there were none.
async fn connect_any(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(tcp) => return Ok(tcp),
            Err(e) => {
                tracing::debug!(%addr, error = %e, "address unreachable");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "name resolved to no addresses")
    }))
}

impl CertificateSource for CertificateFetcher {
    async fn fetch(
        &self,
        url: &CandidateUrl,
        timeout: Duration,
    ) -> Result<PeerCertificate, FetchError> {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.handshake(url)).await;
        let elapsed = started.elapsed();
        match result {
            Ok(Ok(peer)) => {
                tracing::debug!(
                    url = %url,
                    chain_len = peer.chain().len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "fetched peer chain"
                );
                Ok(peer)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FetchError::Timeout {
                host: url.host(),
                elapsed,
            }),
        }
    }
}

/// Accepts any server chain so it can be scored after the handshake.
#[derive(Debug)]
struct CaptureChainVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for CaptureChainVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::url_policy::validate;

    #[tokio::test]
    async fn refused_connection_is_connection_error() {
        let fetcher = CertificateFetcher::new().unwrap();
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = validate(&format!("https://127.0.0.1:{port}/")).unwrap();
        match fetcher.fetch(&url, Duration::from_secs(5)).await {
            Err(FetchError::Connection { port: p, .. }) => assert_eq!(p, port),
            other => panic!("expected Connection error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn unresolvable_host_is_connection_error() {
        let fetcher = CertificateFetcher::new().unwrap();
        let url = validate("https://does-not-exist.invalid/").unwrap();
        let err = fetcher
            .fetch(&url, Duration::from_secs(10))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Connection { .. } | FetchError::Timeout { .. }
        ));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept the TCP connection but never answer the ClientHello.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let fetcher = CertificateFetcher::new().unwrap();
        let url = validate(&format!("https://127.0.0.1:{port}/")).unwrap();
        let err = fetcher
            .fetch(&url, Duration::from_millis(200))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }), "{err}");
        server.abort();
    }

    #[tokio::test]
    async fn plaintext_server_is_handshake_error() {
        use tokio::io::AsyncWriteExt;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")
                .await;
            let _ = socket.shutdown().await;
        });

        let fetcher = CertificateFetcher::new().unwrap();
        let url = validate(&format!("https://127.0.0.1:{port}/")).unwrap();
        let err = fetcher
            .fetch(&url, Duration::from_secs(5))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, FetchError::Handshake { .. }), "{err}");
        server.abort();
    }

    #[tokio::test]
    async fn later_address_is_tried_when_first_refuses() {
        let closed = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap();

        let tcp = connect_any(&[closed, open]).await.unwrap();
        assert_eq!(tcp.peer_addr().unwrap(), open);

        let err = connect_any(&[closed]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        let err = connect_any(&[]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
