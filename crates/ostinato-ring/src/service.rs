//! Long-lived node tasks.
//!
//! Three tasks run for the lifetime of the process: the TLS listener
//! (spawning one short-lived task per accepted connection), the
//! stabilization timer, and the multicast discovery listener. All of them
//! borrow the same [`RingNode`] through an `Arc`.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use ostinato_transport::envelope::Payload;
use ostinato_transport::tls::{RingListener, SecureChannel};
use ostinato_transport::multicast;
use ostinato_types::NodeRef;

use crate::messenger::Messenger;
use crate::node::RingNode;
use crate::{Result, DISCOVERY_DEBOUNCE_MS, PING_INTERVAL_SECS};

/// Accept loop: one short-lived handler task per connection.
pub async fn serve<M: Messenger>(node: Arc<RingNode<M>>, listener: RingListener) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "node listening with TLS");
    }
    loop {
        match listener.accept().await {
            Ok((chan, peer)) => {
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    handle_connection(node, chan, peer).await;
                });
            }
            Err(e) => {
                debug!(error = %e, "failed to accept connection");
            }
        }
    }
}

/// Read exactly one request from the channel, dispatch it, and reply on the
/// same channel when the handler produces a response.
async fn handle_connection<M: Messenger>(
    node: Arc<RingNode<M>>,
    mut chan: SecureChannel,
    peer: std::net::SocketAddr,
) {
    let env = match chan.recv().await {
        Ok(Some(env)) => env,
        Ok(None) => return,
        Err(e) => {
            debug!(%peer, error = %e, "received invalid message");
            let reply = node.protocol_error_reply().await;
            if let Err(e) = chan.send(&reply).await {
                debug!(%peer, error = %e, "failed to send error reply");
            }
            return;
        }
    };

    debug!(
        %peer,
        source = env.source_id,
        kind = ?env.kind,
        "received message"
    );

    if matches!(env.payload, Payload::SendFileReq { .. }) {
        node.handle_blob_push(&env, &mut chan).await;
        return;
    }

    if let Some(reply) = node.handle_rpc(env).await {
        if let Err(e) = chan.send(&reply).await {
            debug!(%peer, error = %e, "failed to send reply");
        }
    }
}

/// Stabilization timer: one tick every [`PING_INTERVAL_SECS`].
pub async fn run_stabilizer<M: Messenger>(node: Arc<RingNode<M>>) {
    loop {
        tokio::time::sleep(Duration::from_secs(PING_INTERVAL_SECS)).await;
        node.stabilize_tick().await;
    }
}

/// Multicast discovery listener.
///
/// Screens each datagram, builds the sender's reference from the packet
/// source address and the fixed ring port, and schedules the adoption on a
/// separate task after a short debounce; the receive loop itself never
/// blocks.
pub async fn run_discovery<M: Messenger>(
    node: Arc<RingNode<M>>,
    group: Ipv4Addr,
    port: u16,
) -> Result<()> {
    let socket = multicast::bind_listener(group, port)?;
    let auto = node.self_ref().await;
    info!(%group, port, "discovery listener ready");

    let mut buf = [0u8; 2048];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!(error = %e, "discovery receive failed");
                continue;
            }
        };
        let Some(env) = multicast::screen_datagram(&buf[..len]) else {
            continue;
        };
        if env.source_id == auto.node_id {
            // Our own probe looped back through the group.
            continue;
        }

        let discovered = NodeRef::new(src.ip(), auto.port, env.source_id, auto.id_bitlen);
        debug!(node = %discovered, "discovery probe received");

        let node = Arc::clone(&node);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(DISCOVERY_DEBOUNCE_MS)).await;
            node.join_node(discovered).await;
        });
    }
}
