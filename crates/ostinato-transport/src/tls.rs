//! TLS 1.3 framed channels over TCP.
//!
//! Point-to-point transport for ring control messages and bulk blob bytes.
//! Every node presents the shared ring certificate
//! (see [`keystore`](crate::keystore)); clients accept it without hostname
//! verification, so transport privacy comes from possession of the ring
//! secret rather than from a PKI.
//!
//! ## Framing
//!
//! Control messages travel as `[length: 4 LE][cbor bytes]` with the length
//! capped at [`MAX_CONTROL_FRAME`]. After a `SendFileReq` control exchange
//! the same channel carries raw file bytes, written in chunks of at most
//! [`FILE_CHUNK_SIZE`](crate::FILE_CHUNK_SIZE) until the announced size is
//! exhausted.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsStream};
pub use tokio_rustls::TlsConnector;

use crate::envelope::Envelope;
use crate::keystore::{RingCredentials, TLS_SERVER_NAME};
use crate::{Result, TransportError, MAX_CONTROL_FRAME};

/// Build the server-side TLS configuration from the ring credentials.
///
/// # Errors
///
/// Returns [`TransportError::Tls`] if the configuration is rejected by
/// rustls (e.g. an unusable key).
pub fn server_config(creds: &RingCredentials) -> Result<rustls::ServerConfig> {
    let provider = rustls::crypto::ring::default_provider();
    rustls::ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(format!("server TLS version config failed: {e}")))?
        .with_no_client_auth()
        .with_single_cert(creds.certs().to_vec(), creds.key())
        .map_err(|e| TransportError::Tls(format!("server TLS config failed: {e}")))
}

/// Build the client-side TLS configuration.
///
/// The verifier accepts any server certificate: the shared ring certificate
/// is a possession secret, not an identity, and hostname checks are
/// deliberately disabled.
pub fn client_config() -> Result<rustls::ClientConfig> {
    let provider = rustls::crypto::ring::default_provider();
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(format!("client TLS version config failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipRingVerification))
        .with_no_client_auth();
    Ok(config)
}

/// Build a reusable TLS connector for outbound connections.
pub fn connector() -> Result<TlsConnector> {
    Ok(TlsConnector::from(Arc::new(client_config()?)))
}

/// Open a fresh TLS connection to a peer.
///
/// # Errors
///
/// Returns [`TransportError::Connection`] if the TCP connect or the TLS
/// handshake fails.
pub async fn connect(addr: SocketAddr, connector: &TlsConnector) -> Result<SecureChannel> {
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::Connection(format!("connect {addr}: {e}")))?;
    let name = ServerName::try_from(TLS_SERVER_NAME)
        .map_err(|e| TransportError::Tls(format!("server name: {e}")))?;
    let stream = connector
        .connect(name, tcp)
        .await
        .map_err(|e| TransportError::Connection(format!("TLS handshake with {addr}: {e}")))?;
    Ok(SecureChannel {
        stream: TlsStream::from(stream),
    })
}

/// Listener accepting TLS channels from ring peers.
pub struct RingListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl RingListener {
    /// Bind the listener and prepare the TLS acceptor.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the socket cannot be bound; this is
    /// a fatal startup error for the daemon.
    pub async fn bind(addr: SocketAddr, creds: &RingCredentials) -> Result<Self> {
        let config = server_config(creds)?;
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Io(format!("bind {addr}: {e}")))?;
        Ok(Self {
            inner,
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// Accept the next connection and complete the TLS handshake.
    pub async fn accept(&self) -> Result<(SecureChannel, SocketAddr)> {
        let (tcp, peer) = self
            .inner
            .accept()
            .await
            .map_err(|e| TransportError::Io(format!("accept: {e}")))?;
        let stream = self
            .acceptor
            .accept(tcp)
            .await
            .map_err(|e| TransportError::Connection(format!("TLS handshake from {peer}: {e}")))?;
        Ok((
            SecureChannel {
                stream: TlsStream::from(stream),
            },
            peer,
        ))
    }
}

/// A single TLS channel pairing one request with at most one response,
/// optionally followed by a raw byte stream.
pub struct SecureChannel {
    stream: TlsStream<TcpStream>,
}

impl SecureChannel {
    /// Write one framed control envelope.
    pub async fn send(&mut self, env: &Envelope) -> Result<()> {
        let bytes = env.encode()?;
        let len = bytes.len() as u32;
        self.stream.write_all(&len.to_le_bytes()).await?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one framed control envelope.
    ///
    /// Returns `Ok(None)` on a clean end of stream before any frame bytes,
    /// which is how fire-and-forget peers signal "no response".
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_CONTROL_FRAME {
            return Err(TransportError::ProtocolViolation(format!(
                "control frame of {len} bytes exceeds limit {MAX_CONTROL_FRAME}"
            )));
        }
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(Some(Envelope::decode(&buf)?))
    }

    /// Write one raw chunk of a bulk transfer.
    pub async fn send_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.stream.write_all(chunk).await?;
        Ok(())
    }

    /// Read raw bulk bytes into `buf`. Returns 0 at end of stream.
    pub async fn recv_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf).await?)
    }

    /// Flush and close the write side.
    pub async fn finish(&mut self) -> Result<()> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// TLS certificate verifier that accepts any server certificate.
///
/// The ring certificate is a shared secret; a peer that completes the
/// handshake at all is holding it. Hostname and chain verification are
/// disabled on purpose.
#[derive(Debug)]
struct SkipRingVerification;

impl rustls::client::danger::ServerCertVerifier for SkipRingVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;

    #[test]
    fn test_client_config_builds() {
        assert!(client_config().is_ok());
        assert!(connector().is_ok());
    }

    #[test]
    fn test_server_config_builds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let creds = RingCredentials::generate(dir.path()).expect("generate");
        assert!(server_config(&creds).is_ok());
    }

    #[tokio::test]
    async fn test_loopback_request_response() {
        let dir = tempfile::tempdir().expect("tempdir");
        let creds = RingCredentials::generate(dir.path()).expect("generate");

        let listener = RingListener::bind("127.0.0.1:0".parse().expect("addr"), &creds)
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            let (mut chan, _peer) = listener.accept().await.expect("accept");
            let req = chan.recv().await.expect("recv").expect("frame");
            assert_eq!(req.payload, Payload::Ping);
            let reply = Envelope::new(
                7,
                "sig",
                Payload::GenericResp {
                    success: true,
                    message: None,
                },
            );
            chan.send(&reply).await.expect("send reply");
        });

        let connector = connector().expect("connector");
        let mut chan = connect(addr, &connector).await.expect("connect");
        chan.send(&Envelope::new(1, "sig", Payload::Ping))
            .await
            .expect("send");
        let reply = chan.recv().await.expect("recv").expect("reply");
        assert_eq!(reply.source_id, 7);

        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_loopback_bulk_stream() {
        let dir = tempfile::tempdir().expect("tempdir");
        let creds = RingCredentials::generate(dir.path()).expect("generate");

        let listener = RingListener::bind("127.0.0.1:0".parse().expect("addr"), &creds)
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let server = tokio::spawn(async move {
            let (mut chan, _peer) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = chan.recv_chunk(&mut buf).await.expect("chunk");
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            assert_eq!(received, expected);
        });

        let connector = connector().expect("connector");
        let mut chan = connect(addr, &connector).await.expect("connect");
        for chunk in payload.chunks(1024) {
            chan.send_chunk(chunk).await.expect("send chunk");
        }
        chan.finish().await.expect("finish");

        server.await.expect("server task");
    }
}
