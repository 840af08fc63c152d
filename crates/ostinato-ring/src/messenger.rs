//! The RPC seam between the overlay engine and the network.
//!
//! The engine talks to peers only through the [`Messenger`] trait, so the
//! protocol logic can be exercised against an in-memory mesh without
//! sockets. The production implementation, [`TlsMessenger`], opens one TLS
//! connection per request against the peer's listener.

use std::future::Future;
use std::path::Path;

use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use ostinato_transport::envelope::{Envelope, Payload};
use ostinato_transport::tls::{self, TlsConnector};
use ostinato_transport::{Result as TransportResult, FILE_CHUNK_SIZE};
use ostinato_types::NodeRef;

/// Network I/O as the overlay engine sees it.
///
/// Transient failures are swallowed: a request that cannot be delivered or
/// answered yields `None`, and the engine's stabilization turns persistent
/// failures into topology repair.
pub trait Messenger: Send + Sync + 'static {
    /// Deliver one envelope and wait for at most one response. `None`
    /// covers unreachable peers, handshake failures, fire-and-forget
    /// messages and undecodable replies alike.
    fn request(
        &self,
        target: &NodeRef,
        env: Envelope,
    ) -> impl Future<Output = Option<Envelope>> + Send;

    /// Perform a bulk blob transfer: deliver the `SendFileReq` envelope,
    /// wait for the receiver's ack, then stream the file at `path`.
    /// Returns whether the receiver acknowledged and the bytes were sent.
    fn push_blob(
        &self,
        target: &NodeRef,
        env: Envelope,
        path: &Path,
    ) -> impl Future<Output = bool> + Send;
}

/// Production messenger: a fresh TLS connection per request.
pub struct TlsMessenger {
    connector: TlsConnector,
}

impl TlsMessenger {
    /// Build the messenger with the ring's client TLS configuration.
    pub fn new() -> TransportResult<Self> {
        Ok(Self {
            connector: tls::connector()?,
        })
    }

    async fn do_request(&self, target: &NodeRef, env: &Envelope) -> TransportResult<Option<Envelope>> {
        let mut chan = tls::connect(target.addr(), &self.connector).await?;
        chan.send(env).await?;
        chan.recv().await
    }

    async fn do_push_blob(
        &self,
        target: &NodeRef,
        env: &Envelope,
        path: &Path,
    ) -> TransportResult<bool> {
        let mut chan = tls::connect(target.addr(), &self.connector).await?;
        chan.send(env).await?;

        let acked = matches!(
            chan.recv().await?,
            Some(Envelope {
                payload: Payload::GenericResp { success: true, .. },
                ..
            })
        );
        if !acked {
            return Ok(false);
        }

        let mut file = tokio::fs::File::open(path).await?;
        let mut buf = [0u8; FILE_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            chan.send_chunk(&buf[..n]).await?;
        }
        chan.finish().await?;
        Ok(true)
    }
}

impl Messenger for TlsMessenger {
    async fn request(&self, target: &NodeRef, env: Envelope) -> Option<Envelope> {
        match self.do_request(target, &env).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(peer = %target, error = %e, "request failed");
                None
            }
        }
    }

    async fn push_blob(&self, target: &NodeRef, env: Envelope, path: &Path) -> bool {
        match self.do_push_blob(target, &env, path).await {
            Ok(true) => {
                info!(peer = %target, "blob sent");
                true
            }
            Ok(false) => {
                debug!(peer = %target, "peer declined blob transfer");
                false
            }
            Err(e) => {
                debug!(peer = %target, error = %e, "blob transfer failed");
                false
            }
        }
    }
}
